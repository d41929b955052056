//! Long-lived negotiation sessions
//!
//! A session owns one shipment for the lifetime of the negotiation. It waits
//! for triggers from its counterpart, turns each into a protocol step and
//! ends when the shipment reaches a terminal status, when no trigger arrives
//! in time, or when it is cancelled.
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::{NegotiationError, Result};
use crate::node::Node;
use crate::protocol::Admitted;
use crate::record::{DeliveryMode, Quote, ShipmentStatus};
use crate::types::{AttachmentDigest, RecordId};

/// One step requested of a running session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    Respond { quote: Quote, responder: String },
    Accept { responder: String, mode: DeliveryMode },
    DocUpload(AttachmentDigest),
    UpdateStatus(ShipmentStatus),
    CancelByRequestor,
    CancelByResponder,
}

struct TriggerRequest {
    trigger: Trigger,
    respond_to: oneshot::Sender<Result<Admitted>>,
}

#[derive(Clone)]
pub struct SessionHandle {
    record_id: RecordId,
    triggers: mpsc::Sender<TriggerRequest>,
    cancel: Arc<watch::Sender<bool>>,
}

impl SessionHandle {
    pub fn record_id(&self) -> RecordId {
        self.record_id
    }

    /// Hand `trigger` to the session and wait for the step's outcome.
    pub async fn send(&self, trigger: Trigger) -> Result<Admitted> {
        let (respond_to, response) = oneshot::channel();
        self.triggers
            .send(TriggerRequest {
                trigger,
                respond_to,
            })
            .await
            .map_err(|_| NegotiationError::SessionClosed)?;
        response.await.map_err(|_| NegotiationError::SessionClosed)?
    }

    /// Ask the session to stop. A step already handed to the sequencer still
    /// completes.
    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }
}

/// Start a session for `record_id` on its own task, waiting at most the
/// node's configured trigger timeout between triggers. The task resolves to
/// the terminal status reached, or to `Timeout`, `Cancelled` or `SessionClosed`.
pub fn spawn_session(
    node: Arc<Node>,
    record_id: RecordId,
) -> (SessionHandle, JoinHandle<Result<ShipmentStatus>>) {
    let trigger_timeout = node.config().trigger_timeout();
    spawn_session_with_timeout(node, record_id, trigger_timeout)
}

pub fn spawn_session_with_timeout(
    node: Arc<Node>,
    record_id: RecordId,
    trigger_timeout: Duration,
) -> (SessionHandle, JoinHandle<Result<ShipmentStatus>>) {
    let (triggers, incoming) = mpsc::channel(8);
    let (cancel, cancelled) = watch::channel(false);

    let task = tokio::spawn(run(node, record_id, trigger_timeout, incoming, cancelled));

    (
        SessionHandle {
            record_id,
            triggers,
            cancel: Arc::new(cancel),
        },
        task,
    )
}

async fn run(
    node: Arc<Node>,
    record_id: RecordId,
    trigger_timeout: Duration,
    mut incoming: mpsc::Receiver<TriggerRequest>,
    mut cancelled: watch::Receiver<bool>,
) -> Result<ShipmentStatus> {
    info!(record_id = %record_id, party = %node.me().name, "Session started");

    let outcome = loop {
        let status = node.query_by_id(&record_id)?.status;
        if status.is_terminal() {
            break Ok(status);
        }

        tokio::select! {
            biased;
            changed = cancelled.changed() => {
                match changed {
                    Ok(()) if *cancelled.borrow() => {
                        warn!(record_id = %record_id, %status, "Session cancelled");
                        break Err(NegotiationError::Cancelled);
                    }
                    Ok(()) => {}
                    Err(_) => break Err(NegotiationError::SessionClosed),
                }
            }
            next = timeout(trigger_timeout, incoming.recv()) => {
                match next {
                    Err(_) => {
                        warn!(
                            record_id = %record_id,
                            %status,
                            timeout_secs = trigger_timeout.as_secs_f64(),
                            "No trigger arrived in time"
                        );
                        break Err(NegotiationError::Timeout);
                    }
                    Ok(None) => break Err(NegotiationError::SessionClosed),
                    Ok(Some(request)) => {
                        debug!(record_id = %record_id, trigger = ?request.trigger, "Trigger received");
                        let result = step(&node, record_id, request.trigger).await;
                        if request.respond_to.send(result).is_err() {
                            debug!(record_id = %record_id, "Trigger sender went away");
                        }
                    }
                }
            }
        }
    };

    info!(record_id = %record_id, outcome = ?outcome, "Session ended");
    outcome
}

async fn step(node: &Node, record_id: RecordId, trigger: Trigger) -> Result<Admitted> {
    match trigger {
        Trigger::Respond { quote, responder } => node.respond(record_id, quote, &responder).await,
        Trigger::Accept { responder, mode } => node.accept(record_id, &responder, mode).await,
        Trigger::DocUpload(digest) => node.doc_upload(record_id, digest).await,
        Trigger::UpdateStatus(status) => node.update_status(record_id, status).await,
        Trigger::CancelByRequestor => node.cancel_by_requestor(record_id).await,
        Trigger::CancelByResponder => node.cancel_by_responder(record_id).await,
    }
}
