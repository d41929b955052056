//! Transitions: the unit of change admitted onto the ledger
use std::collections::BTreeSet;
use std::fmt;

use chrono::Utc;

use crate::error::Result;
use crate::record::{DeliveryMode, ShipmentRecord, StateRef};
use crate::types::{AttachmentDigest, Party, PartyKey, TimeStamp, TxId};

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub enum Command {
    #[n(0)]
    Post,
    #[n(1)]
    Respond {
        #[n(0)]
        responder: PartyKey,
    },
    #[n(2)]
    Accept {
        #[n(0)]
        responder: PartyKey,
        #[n(1)]
        mode: DeliveryMode,
    },
    #[n(3)]
    DocUpload {
        #[n(0)]
        digest: AttachmentDigest, // content address of the proof document
    },
    #[n(4)]
    Picked,
    #[n(5)]
    Delivered,
    #[n(6)]
    CancelByRequestor,
    #[n(7)]
    CancelByResponder,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Post => "post",
            Command::Respond { .. } => "respond",
            Command::Accept { .. } => "accept",
            Command::DocUpload { .. } => "doc-upload",
            Command::Picked => "picked",
            Command::Delivered => "delivered",
            Command::CancelByRequestor => "cancel-by-requestor",
            Command::CancelByResponder => "cancel-by-responder",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct Transition {
    #[n(0)]
    pub inputs: Vec<StateRef>,
    #[n(1)]
    pub outputs: Vec<ShipmentRecord>,
    #[n(2)]
    pub command: Command,
    #[n(3)]
    pub signers: BTreeSet<PartyKey>,
    #[n(4)]
    pub attachments: Vec<AttachmentDigest>,
    #[n(5)]
    pub timestamp: TimeStamp<Utc>, // issued when the transition is assembled
}

impl Transition {
    pub fn new(command: Command) -> Self {
        Self {
            inputs: vec![],
            outputs: vec![],
            command,
            signers: BTreeSet::new(),
            attachments: vec![],
            timestamp: TimeStamp::new(),
        }
    }

    pub fn sign(&mut self, party: &Party) {
        self.signers.insert(party.key);
    }

    pub fn is_signed_by(&self, key: &PartyKey) -> bool {
        self.signers.contains(key)
    }

    /// Encode into CBOR and derive the transaction id from the encoding.
    pub fn build(&self) -> Result<(TxId, Vec<u8>)> {
        let cbor = minicbor::to_vec(self)?;
        let id = TxId::of(&cbor);

        Ok((id, cbor))
    }

    pub fn id(&self) -> Result<TxId> {
        Ok(self.build()?.0)
    }

    /// The single record this transition advances or creates.
    pub fn output(&self) -> Option<&ShipmentRecord> {
        self.outputs.first()
    }
}
