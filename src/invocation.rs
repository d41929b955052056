//! Parsing of named protocol invocations with positional string arguments
use std::str::FromStr;

use crate::error::{NegotiationError, Result, ValidationError};
use crate::record::{DeliveryMode, Dimensions, Quote, ShipmentStatus};
use crate::types::{AttachmentDigest, RecordId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    Post {
        dimensions: Dimensions,
        source: String,
        destination: String,
        counterparties: Vec<String>,
    },
    Respond {
        record_id: RecordId,
        quote: Quote,
        responder: String,
    },
    Accept {
        record_id: RecordId,
        responder: String,
        mode: DeliveryMode,
    },
    DocUpload {
        record_id: RecordId,
        digest: AttachmentDigest,
    },
    UpdateStatus {
        record_id: RecordId,
        status: ShipmentStatus,
    },
    CancelByRequestor {
        record_id: RecordId,
    },
    CancelByResponder {
        record_id: RecordId,
    },
}

struct Args<'a> {
    values: &'a [&'a str],
}

impl<'a> Args<'a> {
    fn text(&self, index: usize, name: &'static str) -> std::result::Result<&'a str, ValidationError> {
        self.values
            .get(index)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
            .ok_or(ValidationError::MissingArgument(name))
    }

    fn parse<T: FromStr>(
        &self,
        index: usize,
        name: &'static str,
    ) -> std::result::Result<T, ValidationError> {
        let value = self.text(index, name)?;
        value
            .parse()
            .map_err(|_| ValidationError::MalformedArgument {
                name,
                value: value.to_string(),
            })
    }

    // an empty or `-` price leaves that mode unoffered
    fn price(&self, index: usize, name: &'static str) -> std::result::Result<Option<u64>, ValidationError> {
        let value = self.values.get(index).map(|value| value.trim()).unwrap_or("");
        if value.is_empty() || value == "-" {
            return Ok(None);
        }
        value
            .parse()
            .map(Some)
            .map_err(|_| ValidationError::MalformedArgument {
                name,
                value: value.to_string(),
            })
    }
}

// Post, post, doc-upload and DocUpload all name the same protocol
fn normalise(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

impl Invocation {
    pub fn parse(name: &str, values: &[&str]) -> Result<Self> {
        let args = Args { values };

        let invocation = match normalise(name).as_str() {
            "post" => {
                let dimensions = Dimensions {
                    length: args.parse(0, "length")?,
                    width: args.parse(1, "width")?,
                    height: args.parse(2, "height")?,
                    weight: args.parse(3, "weight")?,
                };
                let source = args.text(4, "source")?.to_string();
                let destination = args.text(5, "destination")?.to_string();
                args.text(6, "counterpartyIdentity")?;
                let counterparties = values[6..]
                    .iter()
                    .map(|name| name.trim())
                    .filter(|name| !name.is_empty())
                    .map(str::to_string)
                    .collect();
                Invocation::Post {
                    dimensions,
                    source,
                    destination,
                    counterparties,
                }
            }
            "respond" => {
                let record_id = args.parse(0, "recordId")?;
                let quote = Quote::new(
                    args.price(1, "sharedPrice")?,
                    args.price(2, "dedicatedPrice")?,
                );
                let responder = args.text(3, "responderId")?.to_string();
                Invocation::Respond {
                    record_id,
                    quote,
                    responder,
                }
            }
            "accept" => Invocation::Accept {
                record_id: args.parse(0, "recordId")?,
                responder: args.text(1, "responderId")?.to_string(),
                mode: args.parse(2, "deliveryMode")?,
            },
            "docupload" => Invocation::DocUpload {
                record_id: args.parse(0, "recordId")?,
                digest: args.parse(1, "attachmentDigest")?,
            },
            "updatestatus" => Invocation::UpdateStatus {
                record_id: args.parse(0, "recordId")?,
                status: args.parse(1, "status")?,
            },
            "cancelbyrequestor" => Invocation::CancelByRequestor {
                record_id: args.parse(0, "recordId")?,
            },
            "cancelbyresponder" => Invocation::CancelByResponder {
                record_id: args.parse(0, "recordId")?,
            },
            _ => return Err(NegotiationError::UnknownProtocol(name.to_string())),
        };
        Ok(invocation)
    }

    pub fn record_id(&self) -> Option<RecordId> {
        match self {
            Invocation::Post { .. } => None,
            Invocation::Respond { record_id, .. }
            | Invocation::Accept { record_id, .. }
            | Invocation::DocUpload { record_id, .. }
            | Invocation::UpdateStatus { record_id, .. }
            | Invocation::CancelByRequestor { record_id }
            | Invocation::CancelByResponder { record_id } => Some(*record_id),
        }
    }
}
