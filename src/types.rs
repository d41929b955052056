//! Identifier and timestamp newtypes shared across the ledger
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use uuid7::{Uuid, uuid7};

use crate::error::{AttachmentError, ValidationError};
use crate::utils;

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

/// Stable identity of a logical shipment, shared by all of its versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordId(Uuid);

/// Distinguishes one version of a shipment from every other version.
///
/// UUIDv7 tokens sort by creation time, which the store relies on to list a
/// record's history in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VersionToken(Uuid);

macro_rules! uuid_newtype {
    ($name:ident, $arg:literal) => {
        impl $name {
            pub fn new() -> Self {
                Self(uuid7())
            }
            pub fn as_bytes(&self) -> &[u8; 16] {
                self.0.as_bytes()
            }
            pub fn from_bytes(bytes: [u8; 16]) -> Self {
                Self(Uuid::from(bytes))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl FromStr for $name {
            type Err = ValidationError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim()
                    .parse::<Uuid>()
                    .map(Self)
                    .map_err(|_| ValidationError::MalformedArgument {
                        name: $arg,
                        value: s.to_string(),
                    })
            }
        }

        impl<C> minicbor::Encode<C> for $name {
            fn encode<W: minicbor::encode::Write>(
                &self,
                e: &mut minicbor::Encoder<W>,
                ctx: &mut C,
            ) -> Result<(), minicbor::encode::Error<W::Error>> {
                minicbor::Encode::encode(self.0.as_bytes(), e, ctx)
            }
        }

        impl<'b, C> minicbor::Decode<'b, C> for $name {
            fn decode(
                d: &mut minicbor::Decoder<'b>,
                _: &mut C,
            ) -> Result<Self, minicbor::decode::Error> {
                let bytes: [u8; 16] = d.decode()?;

                Ok(Self(Uuid::from(bytes)))
            }
        }
    };
}

uuid_newtype!(RecordId, "recordId");
uuid_newtype!(VersionToken, "versionToken");

/// Public key material identifying a party. Rendered as bech32m.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, minicbor::Encode, minicbor::Decode,
)]
#[cbor(array)]
pub struct PartyKey(#[n(0)] [u8; 16]);

impl PartyKey {
    pub fn generate() -> Self {
        Self(*uuid7().as_bytes())
    }
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for PartyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match utils::party_key_to_bech32(&self.0) {
            Ok(encoded) => f.write_str(&encoded),
            Err(_) => f.write_str(&hex::encode(self.0)),
        }
    }
}

impl FromStr for PartyKey {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        utils::party_key_from_bech32(s)
            .map(Self)
            .map_err(|_| ValidationError::MalformedArgument {
                name: "partyKey",
                value: s.to_string(),
            })
    }
}

/// A negotiating identity. Two parties are the same party iff their keys match;
/// the display name is informational only.
#[derive(Debug, Clone, minicbor::Encode, minicbor::Decode)]
pub struct Party {
    #[n(0)]
    pub name: String,
    #[n(1)]
    pub key: PartyKey,
}

impl Party {
    /// Mint a fresh identity under the given display name.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            key: PartyKey::generate(),
        }
    }
    pub fn with_key(name: &str, key: PartyKey) -> Self {
        Self {
            name: name.to_string(),
            key,
        }
    }

    /// Same key under the same display name.
    pub fn is_identical(&self, other: &Party) -> bool {
        self.key == other.key && self.name == other.name
    }
}

/// Element-wise [`Party::is_identical`] over two party lists.
pub fn identical_parties(a: &[Party], b: &[Party]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.is_identical(y))
}

impl PartialEq for Party {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Party {}

impl std::hash::Hash for Party {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl fmt::Display for Party {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.key)
    }
}

/// SHA-256 (hex) of a CBOR-encoded transition.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, minicbor::Encode, minicbor::Decode,
)]
#[cbor(array)]
pub struct TxId(#[n(0)] String);

impl TxId {
    pub fn of(encoded: &[u8]) -> Self {
        Self(sha256::digest(encoded))
    }
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Content address of an attachment: the SHA-256 of its bytes.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, minicbor::Encode, minicbor::Decode,
)]
#[cbor(array)]
pub struct AttachmentDigest(#[n(0)] [u8; 32]);

impl AttachmentDigest {
    pub fn of(bytes: &[u8]) -> Self {
        let mut digest = [0u8; 32];
        // sha256 always yields 64 hex characters
        let _ = hex::decode_to_slice(sha256::digest(bytes), &mut digest);
        Self(digest)
    }
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for AttachmentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for AttachmentDigest {
    type Err = AttachmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut digest = [0u8; 32];
        hex::decode_to_slice(s.trim(), &mut digest)
            .map_err(|_| AttachmentError::MalformedDigest(s.to_string()))?;
        Ok(Self(digest))
    }
}
