//! Contract verification for shipment transitions
//!
//! `verify` is a pure function of the transition and its resolved inputs. It
//! never touches storage or the network, so the builder, the sequencer and
//! tests can all run it freely. A rejection names the first rule broken.
use crate::error::ValidationError;
use crate::record::{ShipmentRecord, ShipmentStatus};
use crate::transition::{Command, Transition};
use crate::types::{PartyKey, identical_parties};

use ShipmentStatus::*;

/// Check `tx` against the rule set for its command. `inputs` are the records
/// that `tx.inputs` resolve to, in the same order.
pub fn verify(tx: &Transition, inputs: &[ShipmentRecord]) -> Result<(), ValidationError> {
    match &tx.command {
        Command::Post => verify_post(tx, inputs),
        Command::Respond { responder } => verify_respond(tx, inputs, responder),
        Command::Accept { responder, mode } => {
            let (input, output) = single_step(tx, inputs, &[ResponseReceived], Accepted)?;
            require_signer(tx, &input.requestor.key, "requestor")?;

            let price = input
                .quote_from(responder)
                .and_then(|quote| quote.price_for(*mode))
                .ok_or_else(|| ValidationError::UnknownQuote {
                    responder: input
                        .participant(responder)
                        .map(|p| p.name.clone())
                        .unwrap_or_else(|| responder.to_string()),
                    mode: *mode,
                })?;
            let accepted = match (&output.accepted_responder, input.participant(responder)) {
                (Some(chosen), Some(invited)) => chosen.is_identical(invited),
                _ => false,
            };
            if !accepted
                || output.final_price != Some(price)
                || output.delivery_mode != Some(*mode)
            {
                return Err(ValidationError::AcceptanceMismatch);
            }
            preserve_responses(tx, input, output)?;
            preserve_receipt(tx, input, output)
        }
        Command::DocUpload { digest } => {
            let (input, output) = single_step(tx, inputs, &[Accepted], Uploaded)?;
            let uploader = tx.signers.iter().any(|key| {
                key == &input.requestor.key
                    || input.accepted_responder.as_ref().map(|p| &p.key) == Some(key)
            });
            if !uploader {
                return Err(ValidationError::MissingSigner {
                    command: tx.command.name(),
                    role: "uploader",
                });
            }
            if output.receipt_digest != Some(*digest) {
                return Err(ValidationError::ReceiptMismatch { expected: *digest });
            }
            if !tx.attachments.contains(digest) {
                return Err(ValidationError::ReceiptNotAttached { digest: *digest });
            }
            preserve_responses(tx, input, output)?;
            preserve_acceptance(tx, input, output)
        }
        Command::Picked => carry_over(tx, single_step(tx, inputs, &[Uploaded], Picked)?),
        Command::Delivered => carry_over(tx, single_step(tx, inputs, &[Picked], Delivered)?),
        Command::CancelByRequestor => {
            let step = single_step(tx, inputs, &[Initiated, Accepted], CancelledByRequestor)?;
            require_signer(tx, &step.0.requestor.key, "requestor")?;
            carry_over(tx, step)
        }
        Command::CancelByResponder => {
            let step = single_step(tx, inputs, &[Initiated, Accepted], CancelledByResponder)?;
            let input = step.0;
            // once accepted, only the chosen responder may walk away
            let signed = match &input.accepted_responder {
                Some(accepted) => tx.is_signed_by(&accepted.key),
                None => tx.signers.iter().any(|key| input.is_responder(key)),
            };
            if !signed {
                return Err(ValidationError::MissingSigner {
                    command: tx.command.name(),
                    role: "responder",
                });
            }
            carry_over(tx, step)
        }
    }
}

fn verify_post(tx: &Transition, inputs: &[ShipmentRecord]) -> Result<(), ValidationError> {
    let command = tx.command.name();
    if !tx.inputs.is_empty() || !inputs.is_empty() {
        return Err(ValidationError::InputCount {
            command,
            expected: 0,
            actual: tx.inputs.len().max(inputs.len()),
        });
    }
    let output = single_output(tx)?;
    if output.status != Initiated {
        return Err(ValidationError::OutputStatus {
            command,
            expected: Initiated,
            actual: output.status,
        });
    }
    if !output.responses.is_empty()
        || output.accepted_responder.is_some()
        || output.final_price.is_some()
        || output.delivery_mode.is_some()
        || output.receipt_digest.is_some()
    {
        return Err(ValidationError::DirtyGenesis);
    }
    if !output.is_participant(&output.requestor.key) {
        return Err(ValidationError::NotParticipant {
            command,
            party: output.requestor.to_string(),
        });
    }
    require_signer(tx, &output.requestor.key, "requestor")
}

fn verify_respond(
    tx: &Transition,
    inputs: &[ShipmentRecord],
    responder: &PartyKey,
) -> Result<(), ValidationError> {
    let command = tx.command.name();
    let (input, output) = single_step(tx, inputs, &[Initiated, ResponseReceived], ResponseReceived)?;
    if !input.is_responder(responder) {
        return Err(ValidationError::NotParticipant {
            command,
            party: responder.to_string(),
        });
    }
    require_signer(tx, responder, "responder")?;

    let quote = output
        .quote_from(responder)
        .ok_or(ValidationError::ResponseNotRecorded)?;
    if quote.is_empty() {
        return Err(ValidationError::EmptyQuote);
    }
    let others = |record: &ShipmentRecord| {
        record
            .responses
            .iter()
            .filter(|(key, _)| *key != responder)
            .map(|(key, quote)| (*key, *quote))
            .collect::<Vec<_>>()
    };
    if others(input) != others(output) {
        return Err(ValidationError::ResponsesTampered { command });
    }
    preserve_acceptance(tx, input, output)?;
    preserve_receipt(tx, input, output)
}

fn single_output(tx: &Transition) -> Result<&ShipmentRecord, ValidationError> {
    match tx.outputs.as_slice() {
        [output] => Ok(output),
        outputs => Err(ValidationError::OutputCount {
            command: tx.command.name(),
            expected: 1,
            actual: outputs.len(),
        }),
    }
}

/// Shared shape of every non-genesis command: one input in an allowed status,
/// one output in `next`, same record, new version, immutable attributes intact.
fn single_step<'a>(
    tx: &'a Transition,
    inputs: &'a [ShipmentRecord],
    allowed: &[ShipmentStatus],
    next: ShipmentStatus,
) -> Result<(&'a ShipmentRecord, &'a ShipmentRecord), ValidationError> {
    let command = tx.command.name();
    let input = match (tx.inputs.as_slice(), inputs) {
        ([reference], [input]) if *reference == input.state_ref() => input,
        ([_], [_]) => return Err(ValidationError::UnresolvedInput { command }),
        (references, _) => {
            return Err(ValidationError::InputCount {
                command,
                expected: 1,
                actual: references.len(),
            });
        }
    };
    let output = single_output(tx)?;

    if !allowed.contains(&input.status) {
        return Err(ValidationError::Predecessor {
            command,
            actual: input.status,
        });
    }
    if output.status != next {
        return Err(ValidationError::OutputStatus {
            command,
            expected: next,
            actual: output.status,
        });
    }
    if output.record_id != input.record_id {
        return Err(ValidationError::RecordIdChanged { command });
    }
    if output.version == input.version {
        return Err(ValidationError::VersionNotAdvanced { command });
    }

    let immutable = [
        ("dimensions", output.dimensions == input.dimensions),
        ("source", output.source == input.source),
        ("destination", output.destination == input.destination),
        ("requestor", output.requestor.is_identical(&input.requestor)),
        (
            "participants",
            identical_parties(&output.participants, &input.participants),
        ),
    ];
    if let Some((field, _)) = immutable.into_iter().find(|(_, same)| !same) {
        return Err(ValidationError::ImmutableChanged { command, field });
    }

    Ok((input, output))
}

fn require_signer(
    tx: &Transition,
    key: &PartyKey,
    role: &'static str,
) -> Result<(), ValidationError> {
    if tx.is_signed_by(key) {
        Ok(())
    } else {
        Err(ValidationError::MissingSigner {
            command: tx.command.name(),
            role,
        })
    }
}

fn preserve_responses(
    tx: &Transition,
    input: &ShipmentRecord,
    output: &ShipmentRecord,
) -> Result<(), ValidationError> {
    if input.responses == output.responses {
        Ok(())
    } else {
        Err(ValidationError::ResponsesTampered {
            command: tx.command.name(),
        })
    }
}

fn preserve_acceptance(
    tx: &Transition,
    input: &ShipmentRecord,
    output: &ShipmentRecord,
) -> Result<(), ValidationError> {
    let same_responder = match (&input.accepted_responder, &output.accepted_responder) {
        (Some(before), Some(after)) => before.is_identical(after),
        (None, None) => true,
        _ => false,
    };
    if same_responder
        && input.final_price == output.final_price
        && input.delivery_mode == output.delivery_mode
    {
        Ok(())
    } else {
        Err(ValidationError::AcceptanceChanged {
            command: tx.command.name(),
        })
    }
}

fn preserve_receipt(
    tx: &Transition,
    input: &ShipmentRecord,
    output: &ShipmentRecord,
) -> Result<(), ValidationError> {
    if input.receipt_digest == output.receipt_digest {
        Ok(())
    } else {
        Err(ValidationError::ReceiptChanged {
            command: tx.command.name(),
        })
    }
}

// status-only commands must leave everything else untouched
fn carry_over(
    tx: &Transition,
    (input, output): (&ShipmentRecord, &ShipmentRecord),
) -> Result<(), ValidationError> {
    preserve_responses(tx, input, output)?;
    preserve_acceptance(tx, input, output)?;
    preserve_receipt(tx, input, output)
}
