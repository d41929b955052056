//! Property-based tests for the shipment lifecycle
//!
//! Random sequences of commands, each signed by the party entitled to issue
//! it, are pushed through the contract and the sequencer. Whatever the
//! sequence, the statuses actually reached must form a path through the
//! lifecycle graph and the store must hold exactly one current version.

use std::sync::Arc;

use proptest::prelude::*;
use shipment_negotiation::{
    contract,
    record::{DeliveryMode, Quote, ShipmentDraft, ShipmentRecord, ShipmentStatus},
    sequencer::{LocalSequencer, SequencingAuthority},
    store::RecordStore,
    transition::{Command, Transition},
    types::{AttachmentDigest, Party},
};
use tempfile::tempdir;

#[derive(Debug, Clone)]
enum Action {
    Respond {
        responder: usize,
        shared: Option<u64>,
        dedicated: Option<u64>,
    },
    Accept {
        responder: usize,
        dedicated: bool,
    },
    Upload,
    Picked,
    Delivered,
    CancelByRequestor,
    CancelByResponder {
        responder: usize,
    },
}

/// Strategy to generate one command, responders picked by index
fn action_strategy() -> impl Strategy<Value = Action> {
    let price = prop::option::of(1u64..10_000);
    prop_oneof![
        3 => (0usize..3, price.clone(), price).prop_map(|(responder, shared, dedicated)| {
            Action::Respond { responder, shared, dedicated }
        }),
        2 => (0usize..3, any::<bool>()).prop_map(|(responder, dedicated)| {
            Action::Accept { responder, dedicated }
        }),
        2 => Just(Action::Upload),
        2 => Just(Action::Picked),
        2 => Just(Action::Delivered),
        1 => Just(Action::CancelByRequestor),
        1 => (0usize..3).prop_map(|responder| Action::CancelByResponder { responder }),
    ]
}

struct Parties {
    requestor: Party,
    responders: Vec<Party>,
}

fn parties() -> Parties {
    Parties {
        requestor: Party::new("amazon"),
        responders: vec![Party::new("auto1"), Party::new("auto2"), Party::new("auto3")],
    }
}

fn genesis(parties: &Parties) -> ShipmentRecord {
    let mut draft = ShipmentDraft::new()
        .set_requestor(parties.requestor.clone())
        .set_dimensions(10, 10, 10, 10)
        .set_source("krpuram")
        .set_destination("marathahalli");
    for responder in &parties.responders {
        draft = draft.invite(responder.clone());
    }
    draft.finalise().expect("valid draft")
}

/// Build the transition `action` asks for from `current`, or `None` when the
/// action cannot even be expressed (accepting a quote that does not exist).
fn propose(parties: &Parties, current: &ShipmentRecord, action: &Action) -> Option<Transition> {
    let (command, output, signer) = match action {
        Action::Respond {
            responder,
            shared,
            dedicated,
        } => {
            let party = &parties.responders[*responder];
            (
                Command::Respond {
                    responder: party.key,
                },
                current.with_response(&party.key, Quote::new(*shared, *dedicated)),
                party,
            )
        }
        Action::Accept {
            responder,
            dedicated,
        } => {
            let party = &parties.responders[*responder];
            let mode = if *dedicated {
                DeliveryMode::Dedicated
            } else {
                DeliveryMode::Shared
            };
            let output = current.accepted(&party.key, mode).ok()?;
            (
                Command::Accept {
                    responder: party.key,
                    mode,
                },
                output,
                &parties.requestor,
            )
        }
        Action::Upload => {
            let digest = AttachmentDigest::of(b"proof of pickup");
            let mut tx = Transition::new(Command::DocUpload { digest });
            tx.inputs.push(current.state_ref());
            tx.outputs.push(current.with_receipt(digest));
            tx.attachments.push(digest);
            tx.sign(&parties.requestor);
            return Some(tx);
        }
        Action::Picked => (
            Command::Picked,
            current.with_status(ShipmentStatus::Picked),
            &parties.requestor,
        ),
        Action::Delivered => (
            Command::Delivered,
            current.with_status(ShipmentStatus::Delivered),
            &parties.requestor,
        ),
        Action::CancelByRequestor => (
            Command::CancelByRequestor,
            current.with_status(ShipmentStatus::CancelledByRequestor),
            &parties.requestor,
        ),
        Action::CancelByResponder { responder } => (
            Command::CancelByResponder,
            current.with_status(ShipmentStatus::CancelledByResponder),
            &parties.responders[*responder],
        ),
    };

    let mut tx = Transition::new(command);
    tx.inputs.push(current.state_ref());
    tx.outputs.push(output);
    tx.sign(signer);
    Some(tx)
}

// PROPERTY TESTS
proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: accepted commands only ever walk edges of the lifecycle graph
    ///
    /// Every command the contract accepts moves the record along exactly one
    /// edge, and nothing is accepted once a terminal status is reached.
    #[test]
    fn prop_accepted_commands_follow_the_graph(
        actions in prop::collection::vec(action_strategy(), 1..=25)
    ) {
        let parties = parties();
        let mut current = genesis(&parties);
        let mut path = vec![current.status];

        for action in &actions {
            let Some(tx) = propose(&parties, &current, action) else {
                continue;
            };
            let verdict = contract::verify(&tx, std::slice::from_ref(&current));

            if current.status.is_terminal() {
                prop_assert!(verdict.is_err(), "terminal status {} was advanced", current.status);
                continue;
            }
            if verdict.is_ok() {
                let next = tx.outputs[0].clone();
                prop_assert!(
                    current.status.can_advance_to(next.status),
                    "{} -> {} is not an edge", current.status, next.status
                );
                prop_assert_eq!(next.record_id, current.record_id);
                prop_assert_ne!(next.version, current.version);
                path.push(next.status);
                current = next;
            }
        }

        prop_assert_eq!(path[0], ShipmentStatus::Initiated);
        prop_assert!(path.windows(2).all(|edge| edge[0].can_advance_to(edge[1])));
    }

    /// Property: acceptance always freezes a quote the chosen responder offered
    #[test]
    fn prop_acceptance_matches_an_offered_quote(
        actions in prop::collection::vec(action_strategy(), 1..=25)
    ) {
        let parties = parties();
        let mut current = genesis(&parties);

        for action in &actions {
            let Some(tx) = propose(&parties, &current, action) else {
                continue;
            };
            if contract::verify(&tx, std::slice::from_ref(&current)).is_ok() {
                current = tx.outputs[0].clone();
            }
        }

        if let (Some(responder), Some(mode)) = (&current.accepted_responder, current.delivery_mode) {
            let offered = current
                .quote_from(&responder.key)
                .and_then(|quote| quote.price_for(mode));
            prop_assert_eq!(offered, current.final_price);
        } else {
            prop_assert!(current.final_price.is_none());
        }
    }

    /// Property: the sequencer admits exactly what the contract accepts and
    /// the store keeps a single current version throughout
    #[test]
    fn prop_store_keeps_one_current_version(
        actions in prop::collection::vec(action_strategy(), 1..=15)
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let dir = tempdir().unwrap();
        let store = Arc::new(RecordStore::open(dir.path().join("props.db")).unwrap());
        let sequencer = LocalSequencer::new(store.clone());

        let parties = parties();
        let mut current = genesis(&parties);
        let mut post = Transition::new(Command::Post);
        post.outputs.push(current.clone());
        post.sign(&parties.requestor);
        runtime.block_on(sequencer.admit(post)).unwrap();

        for action in &actions {
            let Some(tx) = propose(&parties, &current, action) else {
                continue;
            };
            let expected = contract::verify(&tx, std::slice::from_ref(&current)).is_ok();
            let admitted = runtime.block_on(sequencer.admit(tx.clone()));

            prop_assert_eq!(admitted.is_ok(), expected);
            if expected {
                current = tx.outputs[0].clone();
            }

            let versions = store.query_by_record_id(&current.record_id).unwrap();
            prop_assert_eq!(versions.len(), 1);
            prop_assert_eq!(&versions[0], &current);
            let history = store.history(&current.record_id).unwrap();
            prop_assert_eq!(history.iter().filter(|row| row.is_current()).count(), 1);
        }
    }
}
