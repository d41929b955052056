//! Node API for shipment negotiation
//!
//! A node acts for exactly one party. Every operation that changes a shipment
//! is signed with that party's key, so a node can only take the steps its
//! party is entitled to; the contract rejects the rest.
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::info;

use crate::attachment::{AttachmentStore, SledAttachmentStore};
use crate::config::NodeConfig;
use crate::directory::PartyDirectory;
use crate::error::{AttachmentError, NegotiationError, Result, ValidationError};
use crate::invocation::Invocation;
use crate::protocol::{Admitted, Proposal, Protocol, Recovered};
use crate::record::{
    DeliveryMode, Dimensions, Quote, ShipmentDraft, ShipmentRecord, ShipmentStatus,
};
use crate::sequencer::{LocalSequencer, SequencingAuthority, spawn_sequencer};
use crate::store::{RecordStore, VersionRow};
use crate::transition::Command;
use crate::types::{AttachmentDigest, Party, RecordId, TxId};

/// The services every node on one ledger shares.
#[derive(Clone)]
pub struct Ledger {
    pub store: Arc<RecordStore>,
    pub sequencer: Arc<dyn SequencingAuthority>,
    pub directory: Arc<dyn PartyDirectory>,
    pub attachments: Arc<dyn AttachmentStore>,
}

impl Ledger {
    /// Open the database under `config.data_dir` and start its sequencer task.
    pub fn open(
        config: &NodeConfig,
        directory: Arc<dyn PartyDirectory>,
    ) -> Result<(Self, JoinHandle<()>)> {
        let path = config.ledger_path();
        let db = Arc::new(sled::open(&path)?);
        info!(path = %path.display(), "Opened ledger");

        let store = Arc::new(RecordStore::new(db.clone())?);
        let attachments = Arc::new(SledAttachmentStore::new(db)?);
        let (sequencer, task) = spawn_sequencer(
            LocalSequencer::new(store.clone()),
            config.sequencer_queue_depth,
        );

        Ok((
            Self {
                store,
                sequencer: Arc::new(sequencer),
                directory,
                attachments,
            },
            task,
        ))
    }
}

pub struct Node {
    identity: Party,
    ledger: Ledger,
    protocol: Protocol,
    config: NodeConfig,
}

impl Node {
    pub fn new(identity: Party, ledger: Ledger, config: NodeConfig) -> Self {
        let protocol = Protocol::new(
            ledger.store.clone(),
            ledger.sequencer.clone(),
            identity.clone(),
            config.max_conflict_retries,
        );
        Self {
            identity,
            ledger,
            protocol,
            config,
        }
    }

    /// The party this node signs for.
    pub fn me(&self) -> &Party {
        &self.identity
    }

    /// Every other party the directory knows about.
    pub fn peers(&self) -> Vec<Party> {
        self.ledger
            .directory
            .parties()
            .into_iter()
            .filter(|party| party != &self.identity)
            .collect()
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    fn resolve(&self, name: &str) -> Result<Party> {
        self.ledger
            .directory
            .resolve(name)
            .ok_or_else(|| NegotiationError::UnknownParty(name.to_string()))
    }

    /// Open a new shipment with this node as requestor and every named
    /// counterparty invited to respond.
    pub async fn post(
        &self,
        dimensions: Dimensions,
        source: &str,
        destination: &str,
        counterparties: &[String],
    ) -> Result<Admitted> {
        let mut draft = ShipmentDraft::new()
            .set_requestor(self.identity.clone())
            .set_dimensions(
                dimensions.length,
                dimensions.width,
                dimensions.height,
                dimensions.weight,
            )
            .set_source(source)
            .set_destination(destination);
        for name in counterparties {
            draft = draft.invite(self.resolve(name)?);
        }

        self.protocol.create(draft.finalise()?).await
    }

    /// Record `responder`'s quote, replacing any earlier quote of theirs.
    pub async fn respond(
        &self,
        record_id: RecordId,
        quote: Quote,
        responder: &str,
    ) -> Result<Admitted> {
        let responder = self.resolve(responder)?;

        self.protocol
            .advance(record_id, |current| {
                Ok(Proposal::new(
                    Command::Respond {
                        responder: responder.key,
                    },
                    current.with_response(&responder.key, quote),
                ))
            })
            .await
    }

    /// Close the negotiation on `responder`'s quote for `mode`.
    pub async fn accept(
        &self,
        record_id: RecordId,
        responder: &str,
        mode: DeliveryMode,
    ) -> Result<Admitted> {
        let party = self.resolve(responder)?;

        self.protocol
            .advance(record_id, |current| {
                if !current.is_responder(&party.key) {
                    return Err(ValidationError::NotParticipant {
                        command: "accept",
                        party: party.name.clone(),
                    }
                    .into());
                }
                Ok(Proposal::new(
                    Command::Accept {
                        responder: party.key,
                        mode,
                    },
                    current.accepted(&party.key, mode)?,
                ))
            })
            .await
    }

    /// Attach a previously uploaded proof-of-delivery document.
    pub async fn doc_upload(
        &self,
        record_id: RecordId,
        digest: AttachmentDigest,
    ) -> Result<Admitted> {
        if !self.ledger.attachments.contains(&digest)? {
            return Err(AttachmentError::Missing(digest).into());
        }

        self.protocol
            .advance(record_id, |current| {
                Ok(
                    Proposal::new(Command::DocUpload { digest }, current.with_receipt(digest))
                        .attach(digest),
                )
            })
            .await
    }

    /// Move an uploaded shipment to `picked`, or a picked one to `delivered`.
    pub async fn update_status(
        &self,
        record_id: RecordId,
        status: ShipmentStatus,
    ) -> Result<Admitted> {
        let command = match status {
            ShipmentStatus::Picked => Command::Picked,
            ShipmentStatus::Delivered => Command::Delivered,
            other => {
                return Err(ValidationError::MalformedArgument {
                    name: "status",
                    value: other.to_string(),
                }
                .into());
            }
        };

        self.protocol
            .advance(record_id, |current| {
                Ok(Proposal::new(command.clone(), current.with_status(status)))
            })
            .await
    }

    pub async fn cancel_by_requestor(&self, record_id: RecordId) -> Result<Admitted> {
        self.protocol
            .advance(record_id, |current| {
                Ok(Proposal::new(
                    Command::CancelByRequestor,
                    current.with_status(ShipmentStatus::CancelledByRequestor),
                ))
            })
            .await
    }

    pub async fn cancel_by_responder(&self, record_id: RecordId) -> Result<Admitted> {
        self.protocol
            .advance(record_id, |current| {
                Ok(Proposal::new(
                    Command::CancelByResponder,
                    current.with_status(ShipmentStatus::CancelledByResponder),
                ))
            })
            .await
    }

    /// Run the named protocol with positional string arguments.
    pub async fn invoke(&self, name: &str, args: &[&str]) -> Result<TxId> {
        let invocation = Invocation::parse(name, args)?;
        info!(
            party = %self.identity.name,
            protocol = name,
            record_id = ?invocation.record_id().map(|id| id.to_string()),
            "Invoking protocol"
        );

        let admitted = match invocation {
            Invocation::Post {
                dimensions,
                source,
                destination,
                counterparties,
            } => {
                self.post(dimensions, &source, &destination, &counterparties)
                    .await?
            }
            Invocation::Respond {
                record_id,
                quote,
                responder,
            } => self.respond(record_id, quote, &responder).await?,
            Invocation::Accept {
                record_id,
                responder,
                mode,
            } => self.accept(record_id, &responder, mode).await?,
            Invocation::DocUpload { record_id, digest } => {
                self.doc_upload(record_id, digest).await?
            }
            Invocation::UpdateStatus { record_id, status } => {
                self.update_status(record_id, status).await?
            }
            Invocation::CancelByRequestor { record_id } => {
                self.cancel_by_requestor(record_id).await?
            }
            Invocation::CancelByResponder { record_id } => {
                self.cancel_by_responder(record_id).await?
            }
        };
        Ok(admitted.tx_id)
    }

    pub fn query_all(&self) -> Result<Vec<ShipmentRecord>> {
        self.ledger.store.query_all()
    }

    pub fn query_by_status(&self, status: ShipmentStatus) -> Result<Vec<ShipmentRecord>> {
        self.ledger.store.query_by_status(status)
    }

    /// The current version of a shipment, or `NotFound`.
    pub fn query_by_id(&self, record_id: &RecordId) -> Result<ShipmentRecord> {
        self.ledger.store.current(record_id)
    }

    /// Every version of a shipment, oldest first.
    pub fn history(&self, record_id: &RecordId) -> Result<Vec<VersionRow>> {
        self.ledger.store.history(record_id)
    }

    pub fn upload_attachment(&self, bytes: &[u8]) -> Result<AttachmentDigest> {
        self.ledger.attachments.upload(bytes)
    }

    pub fn fetch_attachment(&self, digest: &AttachmentDigest) -> Result<Vec<u8>> {
        self.ledger.attachments.fetch(digest)
    }

    /// Settle the steps this ledger left unfinished when it last stopped.
    pub fn resume_pending(&self) -> Result<Vec<Recovered>> {
        self.protocol.resume()
    }
}
