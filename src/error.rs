//! Error taxonomy for shipment negotiation
use crate::record::{DeliveryMode, ShipmentStatus};
use crate::types::{AttachmentDigest, RecordId};

/// A contract rule violation or a malformed protocol argument.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{command}: expected {expected} input state(s), found {actual}")]
    InputCount {
        command: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("{command}: expected {expected} output state(s), found {actual}")]
    OutputCount {
        command: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("{command}: input status '{actual}' is not a valid predecessor")]
    Predecessor {
        command: &'static str,
        actual: ShipmentStatus,
    },
    #[error("{command}: output status must be '{expected}', found '{actual}'")]
    OutputStatus {
        command: &'static str,
        expected: ShipmentStatus,
        actual: ShipmentStatus,
    },
    #[error("{command}: signer set lacks the {role}'s key")]
    MissingSigner {
        command: &'static str,
        role: &'static str,
    },
    #[error("{command}: {party} is not a participant of this shipment")]
    NotParticipant { command: &'static str, party: String },
    #[error("{command}: resolved inputs do not match the referenced states")]
    UnresolvedInput { command: &'static str },
    #[error("{command}: record id changed between input and output")]
    RecordIdChanged { command: &'static str },
    #[error("{command}: output reuses the input's version token")]
    VersionNotAdvanced { command: &'static str },
    #[error("{command}: immutable attribute '{field}' changed")]
    ImmutableChanged {
        command: &'static str,
        field: &'static str,
    },
    #[error("post: a new shipment must start with no responses and no acceptance")]
    DirtyGenesis,
    #[error("respond: the responder's quote was not recorded in the output")]
    ResponseNotRecorded,
    #[error("respond: a quote must offer at least one delivery mode")]
    EmptyQuote,
    #[error("{command}: responses map must be unchanged apart from the responder's entry")]
    ResponsesTampered { command: &'static str },
    #[error("accept: responder {responder} has no {mode} quote on this shipment")]
    UnknownQuote {
        responder: String,
        mode: DeliveryMode,
    },
    #[error("accept: accepted responder, price or mode does not match the chosen quote")]
    AcceptanceMismatch,
    #[error("{command}: acceptance terms must be carried over unchanged")]
    AcceptanceChanged { command: &'static str },
    #[error("doc-upload: receipt digest is not set to {expected}")]
    ReceiptMismatch { expected: AttachmentDigest },
    #[error("doc-upload: receipt {digest} is not attached to the transition")]
    ReceiptNotAttached { digest: AttachmentDigest },
    #[error("{command}: receipt digest must be carried over unchanged")]
    ReceiptChanged { command: &'static str },
    #[error("missing argument '{0}'")]
    MissingArgument(&'static str),
    #[error("malformed argument '{name}': {value}")]
    MalformedArgument { name: &'static str, value: String },
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AttachmentError {
    #[error("attachment {0} is not present in the attachment store")]
    Missing(AttachmentDigest),
    #[error("attachment digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch {
        expected: AttachmentDigest,
        actual: AttachmentDigest,
    },
    #[error("malformed attachment digest '{0}'")]
    MalformedDigest(String),
}

#[derive(thiserror::Error, Debug)]
pub enum NegotiationError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),
    #[error("shipment {record_id} was consumed by a competing transition (after {attempts} attempt(s))")]
    Conflict { record_id: RecordId, attempts: u32 },
    #[error("no current shipment with id {0}")]
    NotFound(RecordId),
    #[error(transparent)]
    Attachment(#[from] AttachmentError),
    #[error("party '{0}' cannot be resolved")]
    UnknownParty(String),
    #[error("unrecognised protocol '{0}'")]
    UnknownProtocol(String),
    #[error("timed out waiting for a counterpart trigger")]
    Timeout,
    #[error("the session was cancelled")]
    Cancelled,
    #[error("the session or sequencer channel is closed")]
    SessionClosed,
    #[error("database error: {0}")]
    Storage(#[from] sled::Error),
    #[error("encoding error: {0}")]
    Encoding(String),
}

impl NegotiationError {
    /// Only sequencing conflicts are worth a fresh read and another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, NegotiationError::Conflict { .. })
    }
}

impl<E: std::fmt::Display> From<minicbor::encode::Error<E>> for NegotiationError {
    fn from(value: minicbor::encode::Error<E>) -> Self {
        NegotiationError::Encoding(value.to_string())
    }
}

impl From<minicbor::decode::Error> for NegotiationError {
    fn from(value: minicbor::decode::Error) -> Self {
        NegotiationError::Encoding(value.to_string())
    }
}

pub type Result<T> = std::result::Result<T, NegotiationError>;
