//! Sequencing authority
//!
//! Admission is the only way the record store changes. A transition is
//! admitted when every input it consumes is still current and the contract
//! accepts it against those inputs; anything else is rejected whole.
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::contract;
use crate::error::{NegotiationError, Result};
use crate::record::ShipmentRecord;
use crate::store::RecordStore;
use crate::transition::Transition;
use crate::types::TxId;

#[async_trait::async_trait]
pub trait SequencingAuthority: Send + Sync {
    /// Consume every input of `transition` and make its outputs current, or
    /// fail with `Conflict` if any input was already consumed.
    async fn admit(&self, transition: Transition) -> Result<TxId>;
}

/// Admits transitions directly against a local record store.
pub struct LocalSequencer {
    store: Arc<RecordStore>,
}

impl LocalSequencer {
    pub fn new(store: Arc<RecordStore>) -> Self {
        Self { store }
    }

    fn resolve_inputs(&self, transition: &Transition) -> Result<Vec<ShipmentRecord>> {
        let mut inputs = Vec::with_capacity(transition.inputs.len());
        for input in &transition.inputs {
            let row = self
                .store
                .version(input)?
                .ok_or(NegotiationError::NotFound(input.record_id))?;
            if !row.is_current() {
                return Err(NegotiationError::Conflict {
                    record_id: input.record_id,
                    attempts: 1,
                });
            }
            inputs.push(row.record);
        }
        Ok(inputs)
    }
}

#[async_trait::async_trait]
impl SequencingAuthority for LocalSequencer {
    async fn admit(&self, transition: Transition) -> Result<TxId> {
        let tx_id = transition.id()?;
        if self.store.is_admitted(&tx_id)? {
            debug!(tx_id = %tx_id, "Transition already admitted");
            return Ok(tx_id);
        }

        // the submitter already verified, but only against what it read
        let inputs = self.resolve_inputs(&transition)?;
        contract::verify(&transition, &inputs)?;
        self.store.apply(&transition)?;

        if let Some(output) = transition.output() {
            info!(
                record_id = %output.record_id,
                tx_id = %tx_id,
                command = %transition.command,
                status = %output.status,
                "Admitted transition"
            );
        }
        Ok(tx_id)
    }
}

struct AdmitRequest {
    transition: Transition,
    respond_to: oneshot::Sender<Result<TxId>>,
}

/// Cloneable front for a sequencer running in its own task.
#[derive(Clone)]
pub struct SequencerHandle {
    requests: mpsc::Sender<AdmitRequest>,
}

#[async_trait::async_trait]
impl SequencingAuthority for SequencerHandle {
    async fn admit(&self, transition: Transition) -> Result<TxId> {
        let (respond_to, response) = oneshot::channel();
        self.requests
            .send(AdmitRequest {
                transition,
                respond_to,
            })
            .await
            .map_err(|_| NegotiationError::SessionClosed)?;

        // no timeout: a submitted transition cannot be withdrawn
        response.await.map_err(|_| NegotiationError::SessionClosed)?
    }
}

/// Run `authority` as a dedicated task that admits one transition at a time,
/// in arrival order. The task ends once every handle is dropped.
pub fn spawn_sequencer<A>(authority: A, queue_depth: usize) -> (SequencerHandle, JoinHandle<()>)
where
    A: SequencingAuthority + 'static,
{
    let (requests, mut incoming) = mpsc::channel::<AdmitRequest>(queue_depth.max(1));

    let task = tokio::spawn(async move {
        info!(queue_depth, "Sequencer started");
        while let Some(request) = incoming.recv().await {
            let result = authority.admit(request.transition).await;
            if let Err(e) = &result {
                debug!(error = %e, "Admission rejected");
            }
            if request.respond_to.send(result).is_err() {
                warn!("Submitter went away before its admission result was delivered");
            }
        }
        info!("Sequencer stopped");
    });

    (SequencerHandle { requests }, task)
}
