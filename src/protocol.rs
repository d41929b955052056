//! Negotiation protocol: drives one record forward one transition at a time
//!
//! Each step reads the current version, lets the caller plan the next one,
//! builds and verifies the transition, checkpoints it and hands it to the
//! sequencing authority. A conflict means someone else advanced the record
//! first; the step is then replanned from the fresh version, a bounded number
//! of times.
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::builder::TransactionBuilder;
use crate::error::{NegotiationError, Result};
use crate::record::{ShipmentRecord, StateRef};
use crate::sequencer::SequencingAuthority;
use crate::store::{Checkpoint, RecordStore};
use crate::transition::{Command, Transition};
use crate::types::{AttachmentDigest, Party, RecordId, TimeStamp, TxId};

/// Progress markers for a single protocol step. Only ever logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Resolving,
    Generating,
    Signing,
    Verifying,
    Checkpointing,
    Sequencing,
    Recorded,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Resolving => "resolving",
            Stage::Generating => "generating",
            Stage::Signing => "signing",
            Stage::Verifying => "verifying",
            Stage::Checkpointing => "checkpointing",
            Stage::Sequencing => "sequencing",
            Stage::Recorded => "recorded",
        };
        f.write_str(name)
    }
}

/// What a step wants to do with the version it was shown.
#[derive(Debug, Clone)]
pub struct Proposal {
    pub command: Command,
    pub output: ShipmentRecord,
    pub attachments: Vec<AttachmentDigest>,
}

impl Proposal {
    pub fn new(command: Command, output: ShipmentRecord) -> Self {
        Self {
            command,
            output,
            attachments: vec![],
        }
    }

    pub fn attach(mut self, digest: AttachmentDigest) -> Self {
        self.attachments.push(digest);
        self
    }
}

/// A transition the authority admitted, with the version it made current.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admitted {
    pub tx_id: TxId,
    pub record: ShipmentRecord,
}

/// How a checkpoint left behind by an interrupted step was settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recovered {
    /// The transition made it onto the ledger before the interruption.
    Admitted { tx_id: TxId, record_id: RecordId },
    /// Nothing was admitted and the expected input is still current; the step
    /// can be replanned from it.
    Resubmittable(Checkpoint),
    /// Another transition consumed the expected input in the meantime.
    Superseded(Checkpoint),
}

fn stage(record_id: &RecordId, stage: Stage) {
    debug!(record_id = %record_id, stage = %stage, "Protocol stage");
}

pub struct Protocol {
    store: Arc<RecordStore>,
    sequencer: Arc<dyn SequencingAuthority>,
    identity: Party,
    max_retries: u32,
}

impl Protocol {
    pub fn new(
        store: Arc<RecordStore>,
        sequencer: Arc<dyn SequencingAuthority>,
        identity: Party,
        max_retries: u32,
    ) -> Self {
        Self {
            store,
            sequencer,
            identity,
            max_retries,
        }
    }

    /// Post a freshly drafted record as the genesis of a new shipment.
    pub async fn create(&self, record: ShipmentRecord) -> Result<Admitted> {
        let record_id = record.record_id;

        stage(&record_id, Stage::Generating);
        stage(&record_id, Stage::Signing);
        let builder = TransactionBuilder::new(Command::Post).signer(&self.identity);

        stage(&record_id, Stage::Verifying);
        let transition = builder.build(&self.store, |_| Ok(vec![record.clone()]))?;

        let tx_id = self.submit(transition, record_id, None).await?;
        stage(&record_id, Stage::Recorded);
        Ok(Admitted { tx_id, record })
    }

    /// Advance `record_id` by one transition planned by `plan` from its
    /// current version. Conflicts are retried against the new current version
    /// up to the configured limit.
    pub async fn advance<F>(&self, record_id: RecordId, plan: F) -> Result<Admitted>
    where
        F: Fn(&ShipmentRecord) -> Result<Proposal>,
    {
        let max_attempts = self.max_retries.saturating_add(1);
        let mut attempt = 1;
        loop {
            match self.step(record_id, &plan).await {
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    warn!(
                        record_id = %record_id,
                        attempt,
                        max_attempts,
                        "Input consumed by a competing transition, retrying"
                    );
                    attempt += 1;
                }
                Err(e) if e.is_retryable() => {
                    warn!(record_id = %record_id, attempts = attempt, "Giving up after conflicts");
                    return Err(NegotiationError::Conflict {
                        record_id,
                        attempts: attempt,
                    });
                }
                outcome => return outcome,
            }
        }
    }

    async fn step<F>(&self, record_id: RecordId, plan: &F) -> Result<Admitted>
    where
        F: Fn(&ShipmentRecord) -> Result<Proposal>,
    {
        stage(&record_id, Stage::Resolving);
        let current = self.store.current(&record_id)?;

        stage(&record_id, Stage::Generating);
        let proposal = plan(&current)?;

        stage(&record_id, Stage::Signing);
        let mut builder = TransactionBuilder::new(proposal.command)
            .input(current.state_ref())
            .signer(&self.identity);
        for digest in proposal.attachments {
            builder = builder.attach(digest);
        }

        stage(&record_id, Stage::Verifying);
        let output = proposal.output;
        let transition = builder.build(&self.store, |_| Ok(vec![output.clone()]))?;

        let tx_id = self
            .submit(transition, record_id, Some(current.state_ref()))
            .await?;
        stage(&record_id, Stage::Recorded);
        Ok(Admitted {
            tx_id,
            record: output,
        })
    }

    async fn submit(
        &self,
        transition: Transition,
        record_id: RecordId,
        expected: Option<StateRef>,
    ) -> Result<TxId> {
        let tx_id = transition.id()?;

        stage(&record_id, Stage::Checkpointing);
        self.store.put_checkpoint(&Checkpoint {
            tx_id: tx_id.clone(),
            record_id,
            expected,
            command: transition.command.name().to_string(),
            written_at: TimeStamp::new(),
        })?;

        stage(&record_id, Stage::Sequencing);
        let result = self.sequencer.admit(transition).await;

        match &result {
            // the outcome is unknown, keep the checkpoint for resumption
            Err(NegotiationError::SessionClosed) => {}
            _ => self.store.clear_checkpoint(&tx_id)?,
        }
        result
    }

    /// Settle every checkpoint left by a step that never heard back from the
    /// authority, by reading the store rather than resubmitting.
    pub fn resume(&self) -> Result<Vec<Recovered>> {
        let mut recovered = Vec::new();
        for checkpoint in self.store.pending_checkpoints()? {
            let outcome = if self.store.is_admitted(&checkpoint.tx_id)? {
                info!(
                    record_id = %checkpoint.record_id,
                    tx_id = %checkpoint.tx_id,
                    command = %checkpoint.command,
                    "Interrupted transition was admitted"
                );
                Recovered::Admitted {
                    tx_id: checkpoint.tx_id.clone(),
                    record_id: checkpoint.record_id,
                }
            } else {
                let still_current = match &checkpoint.expected {
                    Some(expected) => self.store.is_current(expected)?,
                    None => true,
                };
                if still_current {
                    info!(
                        record_id = %checkpoint.record_id,
                        command = %checkpoint.command,
                        "Interrupted transition was not admitted, input still current"
                    );
                    Recovered::Resubmittable(checkpoint.clone())
                } else {
                    warn!(
                        record_id = %checkpoint.record_id,
                        command = %checkpoint.command,
                        "Interrupted transition was overtaken by a competing one"
                    );
                    Recovered::Superseded(checkpoint.clone())
                }
            };
            self.store.clear_checkpoint(&checkpoint.tx_id)?;
            recovered.push(outcome);
        }
        Ok(recovered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Quote, ShipmentDraft, ShipmentStatus};
    use crate::sequencer::LocalSequencer;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::tempdir;

    /// Lets a competing transition in ahead of the first `interleave` admissions.
    struct Contended {
        inner: LocalSequencer,
        store: Arc<RecordStore>,
        rival: Party,
        interleave: AtomicU32,
    }

    #[async_trait::async_trait]
    impl SequencingAuthority for Contended {
        async fn admit(&self, transition: Transition) -> Result<TxId> {
            if self.interleave.load(Ordering::SeqCst) > 0 {
                self.interleave.fetch_sub(1, Ordering::SeqCst);
                let current = self.store.current(&transition.inputs[0].record_id)?;
                let price = 50 + u64::from(self.interleave.load(Ordering::SeqCst));
                let rival = TransactionBuilder::new(Command::Respond {
                    responder: self.rival.key,
                })
                .input(current.state_ref())
                .signer(&self.rival)
                .build(&self.store, |inputs| {
                    Ok(vec![
                        inputs[0].with_response(&self.rival.key, Quote::new(Some(price), None)),
                    ])
                })?;
                self.inner.admit(rival).await?;
            }
            self.inner.admit(transition).await
        }
    }

    struct Fixture {
        store: Arc<RecordStore>,
        amazon: Party,
        auto1: Party,
        auto2: Party,
        record: ShipmentRecord,
        _dir: tempfile::TempDir,
    }

    async fn fixture() -> anyhow::Result<Fixture> {
        let dir = tempdir()?;
        let store = Arc::new(RecordStore::open(dir.path().join("protocol.db"))?);
        let (amazon, auto1, auto2) = (
            Party::new("amazon"),
            Party::new("auto1"),
            Party::new("auto2"),
        );
        let record = ShipmentDraft::new()
            .set_requestor(amazon.clone())
            .set_source("krpuram")
            .set_destination("marathahalli")
            .invite(auto1.clone())
            .invite(auto2.clone())
            .finalise()?;

        let requestor = Protocol::new(
            store.clone(),
            Arc::new(LocalSequencer::new(store.clone())),
            amazon.clone(),
            0,
        );
        requestor.create(record.clone()).await?;

        Ok(Fixture {
            store,
            amazon,
            auto1,
            auto2,
            record,
            _dir: dir,
        })
    }

    fn contended(f: &Fixture, retries: u32, interleave: u32) -> Protocol {
        let sequencer = Contended {
            inner: LocalSequencer::new(f.store.clone()),
            store: f.store.clone(),
            rival: f.auto2.clone(),
            interleave: AtomicU32::new(interleave),
        };
        Protocol::new(f.store.clone(), Arc::new(sequencer), f.auto1.clone(), retries)
    }

    fn respond(responder: Party) -> impl Fn(&ShipmentRecord) -> Result<Proposal> {
        move |current: &ShipmentRecord| {
            Ok(Proposal::new(
                Command::Respond {
                    responder: responder.key,
                },
                current.with_response(&responder.key, Quote::new(Some(100), Some(200))),
            ))
        }
    }

    #[tokio::test]
    async fn conflict_is_retried_from_the_fresh_version() -> anyhow::Result<()> {
        let f = fixture().await?;
        let protocol = contended(&f, 3, 1);

        let admitted = protocol
            .advance(f.record.record_id, respond(f.auto1.clone()))
            .await?;

        let current = f.store.current(&f.record.record_id)?;
        assert_eq!(current, admitted.record);
        assert_eq!(current.status, ShipmentStatus::ResponseReceived);
        // the rival's quote survived the retry
        assert_eq!(current.responses.len(), 2);
        assert!(f.store.pending_checkpoints()?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn retries_are_bounded() -> anyhow::Result<()> {
        let f = fixture().await?;
        let protocol = contended(&f, 2, u32::MAX);

        let err = protocol
            .advance(f.record.record_id, respond(f.auto1.clone()))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            NegotiationError::Conflict { attempts: 3, .. }
        ));
        Ok(())
    }

    #[tokio::test]
    async fn planning_errors_are_not_retried() -> anyhow::Result<()> {
        let f = fixture().await?;
        let protocol = contended(&f, 3, 0);

        let err = protocol
            .advance(f.record.record_id, |current| {
                Ok(Proposal::new(
                    Command::Picked,
                    current.with_status(ShipmentStatus::Picked),
                ))
            })
            .await
            .unwrap_err();

        assert!(matches!(err, NegotiationError::Validation(_)));
        assert_eq!(f.store.current(&f.record.record_id)?, f.record);
        Ok(())
    }

    #[tokio::test]
    async fn resume_settles_leftover_checkpoints() -> anyhow::Result<()> {
        let f = fixture().await?;
        let sequencer = LocalSequencer::new(f.store.clone());

        // admitted, but the checkpoint was never cleared
        let admitted = TransactionBuilder::new(Command::Respond {
            responder: f.auto1.key,
        })
        .input(f.record.state_ref())
        .signer(&f.auto1)
        .build(&f.store, |inputs| {
            Ok(vec![
                inputs[0].with_response(&f.auto1.key, Quote::new(Some(100), None)),
            ])
        })?;
        let admitted_id = admitted.id()?;
        f.store.put_checkpoint(&Checkpoint {
            tx_id: admitted_id.clone(),
            record_id: f.record.record_id,
            expected: Some(f.record.state_ref()),
            command: "respond".into(),
            written_at: TimeStamp::new(),
        })?;
        sequencer.admit(admitted).await?;

        // never reached the authority, and its input is gone now
        let stale = Checkpoint {
            tx_id: TxId::of(b"stale"),
            record_id: f.record.record_id,
            expected: Some(f.record.state_ref()),
            command: "cancel-by-requestor".into(),
            written_at: TimeStamp::new(),
        };
        f.store.put_checkpoint(&stale)?;

        // never reached the authority, input still current
        let current = f.store.current(&f.record.record_id)?;
        let pending = Checkpoint {
            tx_id: TxId::of(b"pending"),
            record_id: f.record.record_id,
            expected: Some(current.state_ref()),
            command: "accept".into(),
            written_at: TimeStamp::new(),
        };
        f.store.put_checkpoint(&pending)?;

        let protocol = Protocol::new(
            f.store.clone(),
            Arc::new(LocalSequencer::new(f.store.clone())),
            f.amazon.clone(),
            3,
        );
        let recovered = protocol.resume()?;

        assert_eq!(recovered.len(), 3);
        assert!(recovered.contains(&Recovered::Admitted {
            tx_id: admitted_id,
            record_id: f.record.record_id,
        }));
        assert!(recovered.contains(&Recovered::Superseded(stale)));
        assert!(recovered.contains(&Recovered::Resubmittable(pending)));
        assert!(f.store.pending_checkpoints()?.is_empty());
        Ok(())
    }
}
