//! The versioned shipment record and its lifecycle vocabulary
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;
use crate::types::{AttachmentDigest, Party, PartyKey, RecordId, VersionToken};

#[derive(
    minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
pub enum ShipmentStatus {
    #[n(0)]
    Initiated,
    #[n(1)]
    ResponseReceived,
    #[n(2)]
    Accepted,
    #[n(3)]
    Uploaded,
    #[n(4)]
    Picked,
    #[n(5)]
    Delivered,
    #[n(6)]
    CancelledByRequestor,
    #[n(7)]
    CancelledByResponder,
}

impl ShipmentStatus {
    pub const ALL: [ShipmentStatus; 8] = [
        ShipmentStatus::Initiated,
        ShipmentStatus::ResponseReceived,
        ShipmentStatus::Accepted,
        ShipmentStatus::Uploaded,
        ShipmentStatus::Picked,
        ShipmentStatus::Delivered,
        ShipmentStatus::CancelledByRequestor,
        ShipmentStatus::CancelledByResponder,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ShipmentStatus::Initiated => "initiated",
            ShipmentStatus::ResponseReceived => "response-received",
            ShipmentStatus::Accepted => "accepted",
            ShipmentStatus::Uploaded => "uploaded",
            ShipmentStatus::Picked => "picked",
            ShipmentStatus::Delivered => "delivered",
            ShipmentStatus::CancelledByRequestor => "initiator-cancelled",
            ShipmentStatus::CancelledByResponder => "responder-cancelled",
        }
    }

    /// Single byte used as the status index prefix.
    pub fn code(&self) -> u8 {
        match self {
            ShipmentStatus::Initiated => 0,
            ShipmentStatus::ResponseReceived => 1,
            ShipmentStatus::Accepted => 2,
            ShipmentStatus::Uploaded => 3,
            ShipmentStatus::Picked => 4,
            ShipmentStatus::Delivered => 5,
            ShipmentStatus::CancelledByRequestor => 6,
            ShipmentStatus::CancelledByResponder => 7,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ShipmentStatus::Delivered
                | ShipmentStatus::CancelledByRequestor
                | ShipmentStatus::CancelledByResponder
        )
    }

    /// Edges of the lifecycle graph leaving this status.
    pub fn successors(&self) -> &'static [ShipmentStatus] {
        use ShipmentStatus::*;
        match self {
            Initiated => &[ResponseReceived, CancelledByRequestor, CancelledByResponder],
            ResponseReceived => &[ResponseReceived, Accepted],
            Accepted => &[Uploaded, CancelledByRequestor, CancelledByResponder],
            Uploaded => &[Picked],
            Picked => &[Delivered],
            Delivered | CancelledByRequestor | CancelledByResponder => &[],
        }
    }

    pub fn can_advance_to(&self, next: ShipmentStatus) -> bool {
        self.successors().contains(&next)
    }
}

impl fmt::Display for ShipmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShipmentStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        ShipmentStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == wanted)
            .ok_or(ValidationError::MalformedArgument {
                name: "status",
                value: s.to_string(),
            })
    }
}

#[derive(
    minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
pub enum DeliveryMode {
    #[n(0)]
    Shared,
    #[n(1)]
    Dedicated,
}

impl fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryMode::Shared => f.write_str("shared"),
            DeliveryMode::Dedicated => f.write_str("dedicated"),
        }
    }
}

impl FromStr for DeliveryMode {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "shared" => Ok(DeliveryMode::Shared),
            "dedicated" => Ok(DeliveryMode::Dedicated),
            _ => Err(ValidationError::MalformedArgument {
                name: "deliveryMode",
                value: s.to_string(),
            }),
        }
    }
}

/// A responder's price offer. A mode left as `None` is not offered.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Quote {
    #[n(0)]
    pub shared: Option<u64>,
    #[n(1)]
    pub dedicated: Option<u64>,
}

impl Quote {
    pub fn new(shared: Option<u64>, dedicated: Option<u64>) -> Self {
        Self { shared, dedicated }
    }
    pub fn price_for(&self, mode: DeliveryMode) -> Option<u64> {
        match mode {
            DeliveryMode::Shared => self.shared,
            DeliveryMode::Dedicated => self.dedicated,
        }
    }
    pub fn is_empty(&self) -> bool {
        self.shared.is_none() && self.dedicated.is_none()
    }
}

// rendered as `shared-dedicated`, an unoffered mode is left blank
impl fmt::Display for Quote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let price = |p: Option<u64>| p.map(|p| p.to_string()).unwrap_or_default();
        write!(f, "{}-{}", price(self.shared), price(self.dedicated))
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Dimensions {
    #[n(0)]
    pub length: u32,
    #[n(1)]
    pub width: u32,
    #[n(2)]
    pub height: u32,
    #[n(3)]
    pub weight: u32,
}

/// Points at one version of one shipment.
#[derive(
    minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
pub struct StateRef {
    #[n(0)]
    pub record_id: RecordId,
    #[n(1)]
    pub version: VersionToken,
}

impl fmt::Display for StateRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.record_id, self.version)
    }
}

/// One immutable version of a shipment negotiation.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct ShipmentRecord {
    #[n(0)]
    pub record_id: RecordId,
    #[n(1)]
    pub version: VersionToken,
    #[n(2)]
    pub dimensions: Dimensions,
    #[n(3)]
    pub receipt_digest: Option<AttachmentDigest>,
    #[n(4)]
    pub source: String,
    #[n(5)]
    pub destination: String,
    #[n(6)]
    pub requestor: Party,
    #[n(7)]
    pub accepted_responder: Option<Party>,
    #[n(8)]
    pub final_price: Option<u64>,
    #[n(9)]
    pub delivery_mode: Option<DeliveryMode>,
    #[n(10)]
    pub status: ShipmentStatus,
    #[n(11)]
    pub responses: BTreeMap<PartyKey, Quote>,
    #[n(12)]
    pub participants: Vec<Party>, // requestor first, then every invited responder
}

impl ShipmentRecord {
    pub fn state_ref(&self) -> StateRef {
        StateRef {
            record_id: self.record_id,
            version: self.version,
        }
    }

    pub fn participant(&self, key: &PartyKey) -> Option<&Party> {
        self.participants.iter().find(|p| &p.key == key)
    }

    pub fn is_participant(&self, key: &PartyKey) -> bool {
        self.participant(key).is_some()
    }

    /// A responder is any participant other than the requestor.
    pub fn is_responder(&self, key: &PartyKey) -> bool {
        key != &self.requestor.key && self.is_participant(key)
    }

    pub fn quote_from(&self, responder: &PartyKey) -> Option<&Quote> {
        self.responses.get(responder)
    }

    /// Responses keyed by the responder's display name, quotes rendered as `shared-dedicated`.
    pub fn responses_by_name(&self) -> BTreeMap<String, String> {
        self.responses
            .iter()
            .map(|(key, quote)| {
                let name = self
                    .participant(key)
                    .map(|p| p.name.clone())
                    .unwrap_or_else(|| key.to_string());
                (name, quote.to_string())
            })
            .collect()
    }

    // every successor keeps the record id and gets a fresh version token
    fn next_version(&self) -> Self {
        let mut next = self.clone();
        next.version = VersionToken::new();
        next
    }

    pub fn with_status(&self, status: ShipmentStatus) -> Self {
        let mut next = self.next_version();
        next.status = status;
        next
    }

    /// Record (or overwrite) one responder's quote.
    pub fn with_response(&self, responder: &PartyKey, quote: Quote) -> Self {
        let mut next = self.with_status(ShipmentStatus::ResponseReceived);
        next.responses.insert(*responder, quote);
        next
    }

    /// Close the negotiation on the responder's quote for `mode`.
    pub fn accepted(
        &self,
        responder: &PartyKey,
        mode: DeliveryMode,
    ) -> Result<Self, ValidationError> {
        let unknown = || ValidationError::UnknownQuote {
            responder: responder.to_string(),
            mode,
        };
        let price = self
            .quote_from(responder)
            .and_then(|quote| quote.price_for(mode))
            .ok_or_else(unknown)?;
        let party = self.participant(responder).cloned().ok_or_else(unknown)?;

        let mut next = self.with_status(ShipmentStatus::Accepted);
        next.accepted_responder = Some(party);
        next.final_price = Some(price);
        next.delivery_mode = Some(mode);
        Ok(next)
    }

    pub fn with_receipt(&self, digest: AttachmentDigest) -> Self {
        let mut next = self.with_status(ShipmentStatus::Uploaded);
        next.receipt_digest = Some(digest);
        next
    }
}

// Also used for constructing new shipments before they are posted
#[derive(Debug, Default, Clone)]
pub struct ShipmentDraft {
    requestor: Option<Party>,
    dimensions: Dimensions,
    source: Option<String>,
    destination: Option<String>,
    responders: Vec<Party>,
}

impl ShipmentDraft {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_requestor(mut self, requestor: Party) -> Self {
        self.requestor = Some(requestor);
        self
    }
    pub fn set_dimensions(mut self, length: u32, width: u32, height: u32, weight: u32) -> Self {
        self.dimensions = Dimensions {
            length,
            width,
            height,
            weight,
        };
        self
    }
    pub fn set_source(mut self, source: &str) -> Self {
        self.source = Some(source.to_string());
        self
    }
    pub fn set_destination(mut self, destination: &str) -> Self {
        self.destination = Some(destination.to_string());
        self
    }
    pub fn invite(mut self, responder: Party) -> Self {
        self.responders.push(responder);
        self
    }

    /// Checks required fields and mints the genesis version with status `initiated`.
    pub fn finalise(self) -> Result<ShipmentRecord, ValidationError> {
        let requestor = self
            .requestor
            .ok_or(ValidationError::MissingArgument("requestor"))?;
        let source = self
            .source
            .filter(|s| !s.trim().is_empty())
            .ok_or(ValidationError::MissingArgument("source"))?;
        let destination = self
            .destination
            .filter(|s| !s.trim().is_empty())
            .ok_or(ValidationError::MissingArgument("destination"))?;

        let mut participants = vec![requestor.clone()];
        for responder in self.responders {
            if !participants.contains(&responder) {
                participants.push(responder);
            }
        }
        if participants.len() < 2 {
            return Err(ValidationError::MissingArgument("counterpartyIdentity"));
        }

        Ok(ShipmentRecord {
            record_id: RecordId::new(),
            version: VersionToken::new(),
            dimensions: self.dimensions,
            receipt_digest: None,
            source,
            destination,
            requestor,
            accepted_responder: None,
            final_price: None,
            delivery_mode: None,
            status: ShipmentStatus::Initiated,
            responses: BTreeMap::new(),
            participants,
        })
    }
}
