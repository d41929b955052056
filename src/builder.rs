//! Transaction assembly
use crate::contract;
use crate::error::{NegotiationError, Result};
use crate::record::{ShipmentRecord, StateRef};
use crate::store::RecordStore;
use crate::transition::{Command, Transition};
use crate::types::{AttachmentDigest, Party};

// used for constructing a transition before it is submitted
pub struct TransactionBuilder {
    transition: Transition,
}

impl TransactionBuilder {
    pub fn new(command: Command) -> Self {
        Self {
            transition: Transition::new(command),
        }
    }

    pub fn input(mut self, state: StateRef) -> Self {
        self.transition.inputs.push(state);
        self
    }

    pub fn signer(mut self, party: &Party) -> Self {
        self.transition.sign(party);
        self
    }

    pub fn attach(mut self, digest: AttachmentDigest) -> Self {
        self.transition.attachments.push(digest);
        self
    }

    /// Resolve every input against the current versions in `store`, let
    /// `compute` derive the outputs from them and check the result against the
    /// contract. The store is only read.
    pub fn build<F>(self, store: &RecordStore, compute: F) -> Result<Transition>
    where
        F: FnOnce(&[ShipmentRecord]) -> Result<Vec<ShipmentRecord>>,
    {
        let mut transition = self.transition;

        let mut inputs = Vec::with_capacity(transition.inputs.len());
        for state in &transition.inputs {
            let row = store
                .version(state)?
                .ok_or(NegotiationError::NotFound(state.record_id))?;
            if !row.is_current() {
                return Err(NegotiationError::Conflict {
                    record_id: state.record_id,
                    attempts: 1,
                });
            }
            inputs.push(row.record);
        }

        transition.outputs = compute(&inputs)?;
        contract::verify(&transition, &inputs)?;
        Ok(transition)
    }
}
