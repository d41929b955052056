//! Record store and local index over sled
//!
//! Layout, one tree per concern:
//! - `versions`:    record id ++ version token -> [`VersionRow`]
//! - `by_status`:   status code ++ record id ++ version token -> ()   (current rows only)
//! - `by_record`:   record id -> version token                       (current rows only)
//! - `transitions`: tx id -> CBOR [`Transition`]
//! - `checkpoints`: tx id -> [`Checkpoint`]
//!
//! Versions, both indexes and the transition log only change together inside
//! [`RecordStore::apply`], which runs as a single sled transaction.
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use sled::Transactional;
use sled::transaction::{
    ConflictableTransactionError, TransactionError, TransactionResult, TransactionalTree, abort,
};
use tracing::{debug, info};

use crate::error::{NegotiationError, Result};
use crate::record::{ShipmentRecord, ShipmentStatus, StateRef};
use crate::transition::Transition;
use crate::types::{RecordId, TimeStamp, TxId, VersionToken};

/// One persisted version of a shipment.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct VersionRow {
    #[n(0)]
    pub record: ShipmentRecord,
    #[n(1)]
    pub produced_by: TxId,
    #[n(2)]
    pub consumed_by: Option<TxId>, // None while the version is current
    #[n(3)]
    pub recorded_at: TimeStamp<Utc>,
}

impl VersionRow {
    pub fn is_current(&self) -> bool {
        self.consumed_by.is_none()
    }
}

/// Written before a transition is submitted and removed once the sequencer answers.
#[derive(Debug, Clone, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub struct Checkpoint {
    #[n(0)]
    pub tx_id: TxId,
    #[n(1)]
    pub record_id: RecordId,
    #[n(2)]
    pub expected: Option<StateRef>, // None for a genesis transition
    #[n(3)]
    pub command: String,
    #[n(4)]
    pub written_at: TimeStamp<Utc>,
}

pub struct RecordStore {
    versions: sled::Tree,
    by_status: sled::Tree,
    by_record: sled::Tree,
    transitions: sled::Tree,
    checkpoints: sled::Tree,
}

fn version_key(record_id: &RecordId, version: &VersionToken) -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(record_id.as_bytes());
    key.extend_from_slice(version.as_bytes());
    key
}

fn status_key(status: ShipmentStatus, record_id: &RecordId, version: &VersionToken) -> Vec<u8> {
    let mut key = Vec::with_capacity(33);
    key.push(status.code());
    key.extend_from_slice(&version_key(record_id, version));
    key
}

fn split_version_key(key: &[u8]) -> Option<(RecordId, VersionToken)> {
    let record: [u8; 16] = key.get(..16)?.try_into().ok()?;
    let version: [u8; 16] = key.get(16..32)?.try_into().ok()?;
    Some((
        RecordId::from_bytes(record),
        VersionToken::from_bytes(version),
    ))
}

fn decode_row(bytes: &[u8]) -> Result<VersionRow> {
    Ok(minicbor::decode(bytes)?)
}

// errors raised inside a sled transaction closure must abort it
fn encode_in_tx<T: minicbor::Encode<()>>(
    value: &T,
) -> std::result::Result<Vec<u8>, ConflictableTransactionError<NegotiationError>> {
    minicbor::to_vec(value).or_else(|e| abort(NegotiationError::from(e)))
}

fn decode_in_tx(
    bytes: &[u8],
) -> std::result::Result<VersionRow, ConflictableTransactionError<NegotiationError>> {
    decode_row(bytes).or_else(abort)
}

/// Mark `input` superseded by `tx_id`. Fails with a conflict if another
/// transition already consumed it.
pub(crate) fn consume(
    versions: &TransactionalTree,
    by_status: &TransactionalTree,
    by_record: &TransactionalTree,
    input: &StateRef,
    tx_id: &TxId,
) -> std::result::Result<(), ConflictableTransactionError<NegotiationError>> {
    let key = version_key(&input.record_id, &input.version);
    let Some(bytes) = versions.get(&key)? else {
        return abort(NegotiationError::NotFound(input.record_id));
    };
    let mut row = decode_in_tx(&bytes)?;
    if !row.is_current() {
        return abort(NegotiationError::Conflict {
            record_id: input.record_id,
            attempts: 1,
        });
    }

    row.consumed_by = Some(tx_id.clone());
    versions.insert(key, encode_in_tx(&row)?)?;
    by_status.remove(status_key(
        row.record.status,
        &input.record_id,
        &input.version,
    ))?;
    by_record.remove(input.record_id.as_bytes().to_vec())?;
    Ok(())
}

/// Append `output` as the current version of its record.
pub(crate) fn put(
    versions: &TransactionalTree,
    by_status: &TransactionalTree,
    by_record: &TransactionalTree,
    output: &ShipmentRecord,
    tx_id: &TxId,
    recorded_at: &TimeStamp<Utc>,
) -> std::result::Result<(), ConflictableTransactionError<NegotiationError>> {
    // a record keeps a single current version: any survivor here was not consumed by this transition
    if by_record.get(output.record_id.as_bytes())?.is_some() {
        return abort(NegotiationError::Conflict {
            record_id: output.record_id,
            attempts: 1,
        });
    }

    let row = VersionRow {
        record: output.clone(),
        produced_by: tx_id.clone(),
        consumed_by: None,
        recorded_at: recorded_at.clone(),
    };
    versions.insert(
        version_key(&output.record_id, &output.version),
        encode_in_tx(&row)?,
    )?;
    by_status.insert(
        status_key(output.status, &output.record_id, &output.version),
        &b""[..],
    )?;
    by_record.insert(
        output.record_id.as_bytes().to_vec(),
        output.version.as_bytes().to_vec(),
    )?;
    Ok(())
}

impl RecordStore {
    pub fn new(instance: Arc<sled::Db>) -> Result<Self> {
        Ok(Self {
            versions: instance.open_tree("versions")?,
            by_status: instance.open_tree("by_status")?,
            by_record: instance.open_tree("by_record")?,
            transitions: instance.open_tree("transitions")?,
            checkpoints: instance.open_tree("checkpoints")?,
        })
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path.as_ref())?;
        info!(path = %path.as_ref().display(), "Opened record store");
        Self::new(Arc::new(db))
    }

    /// Consume every input and make every output current, all or nothing.
    ///
    /// Replaying an already admitted transition is a no-op that returns its id.
    pub(crate) fn apply(&self, transition: &Transition) -> Result<TxId> {
        let (tx_id, cbor) = transition.build()?;
        let recorded_at = TimeStamp::new();

        let outcome: TransactionResult<bool, NegotiationError> = (
            &self.versions,
            &self.by_status,
            &self.by_record,
            &self.transitions,
        )
            .transaction(|(versions, by_status, by_record, transitions)| {
                if transitions.get(tx_id.as_str().as_bytes())?.is_some() {
                    return Ok(false);
                }
                for input in &transition.inputs {
                    consume(versions, by_status, by_record, input, &tx_id)?;
                }
                for output in &transition.outputs {
                    put(versions, by_status, by_record, output, &tx_id, &recorded_at)?;
                }
                transitions.insert(tx_id.as_str().as_bytes(), cbor.as_slice())?;
                Ok(true)
            });

        match outcome {
            Ok(true) => {
                debug!(tx_id = %tx_id, "Applied transition");
                Ok(tx_id)
            }
            Ok(false) => {
                debug!(tx_id = %tx_id, "Transition already applied");
                Ok(tx_id)
            }
            Err(TransactionError::Abort(e)) => Err(e),
            Err(TransactionError::Storage(e)) => Err(e.into()),
        }
    }

    fn row(&self, record_id: &RecordId, version: &VersionToken) -> Result<Option<VersionRow>> {
        match self.versions.get(version_key(record_id, version))? {
            Some(bytes) => Ok(Some(decode_row(&bytes)?)),
            None => Ok(None),
        }
    }

    /// The version referenced by `state`, current or not.
    pub fn version(&self, state: &StateRef) -> Result<Option<VersionRow>> {
        self.row(&state.record_id, &state.version)
    }

    pub fn is_current(&self, state: &StateRef) -> Result<bool> {
        Ok(self.version(state)?.is_some_and(|row| row.is_current()))
    }

    /// Current version of `record_id`, or `NotFound`.
    pub fn current(&self, record_id: &RecordId) -> Result<ShipmentRecord> {
        self.query_by_record_id(record_id)?
            .pop()
            .ok_or(NegotiationError::NotFound(*record_id))
    }

    /// All current versions of `record_id` (zero or one).
    pub fn query_by_record_id(&self, record_id: &RecordId) -> Result<Vec<ShipmentRecord>> {
        let Some(version) = self.by_record.get(record_id.as_bytes())? else {
            return Ok(vec![]);
        };
        let version = <[u8; 16]>::try_from(&version[..])
            .map_err(|_| NegotiationError::Encoding("corrupt record index entry".into()))?;
        Ok(self
            .row(record_id, &VersionToken::from_bytes(version))?
            .map(|row| row.record)
            .into_iter()
            .collect())
    }

    /// Current versions in `status`, read through the status index.
    pub fn query_by_status(&self, status: ShipmentStatus) -> Result<Vec<ShipmentRecord>> {
        let mut records = Vec::new();
        for item in self.by_status.scan_prefix([status.code()]) {
            let (key, _) = item?;
            let (record_id, version) = split_version_key(&key[1..])
                .ok_or_else(|| NegotiationError::Encoding("corrupt status index entry".into()))?;
            if let Some(row) = self.row(&record_id, &version)? {
                records.push(row.record);
            }
        }
        Ok(records)
    }

    /// Every current record.
    pub fn query_all(&self) -> Result<Vec<ShipmentRecord>> {
        let mut records = Vec::new();
        for item in self.by_record.iter() {
            let (key, _) = item?;
            let record = <[u8; 16]>::try_from(&key[..])
                .map_err(|_| NegotiationError::Encoding("corrupt record index entry".into()))?;
            records.extend(self.query_by_record_id(&RecordId::from_bytes(record))?);
        }
        Ok(records)
    }

    /// Every version of `record_id`, oldest first.
    pub fn history(&self, record_id: &RecordId) -> Result<Vec<VersionRow>> {
        let mut rows = Vec::new();
        for item in self.versions.scan_prefix(record_id.as_bytes()) {
            let (_, value) = item?;
            rows.push(decode_row(&value)?);
        }
        Ok(rows)
    }

    /// An admitted transition by id.
    pub fn transition(&self, tx_id: &TxId) -> Result<Option<Transition>> {
        match self.transitions.get(tx_id.as_str().as_bytes())? {
            Some(bytes) => Ok(Some(minicbor::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn is_admitted(&self, tx_id: &TxId) -> Result<bool> {
        Ok(self.transitions.contains_key(tx_id.as_str().as_bytes())?)
    }

    pub fn put_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        self.checkpoints.insert(
            checkpoint.tx_id.as_str().as_bytes(),
            minicbor::to_vec(checkpoint)?,
        )?;
        self.checkpoints.flush()?;
        Ok(())
    }

    pub fn clear_checkpoint(&self, tx_id: &TxId) -> Result<()> {
        self.checkpoints.remove(tx_id.as_str().as_bytes())?;
        Ok(())
    }

    pub fn pending_checkpoints(&self) -> Result<Vec<Checkpoint>> {
        let mut pending = Vec::new();
        for item in self.checkpoints.iter() {
            let (_, value) = item?;
            pending.push(minicbor::decode(&value)?);
        }
        Ok(pending)
    }
}
