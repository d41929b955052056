//! Property-based tests for individual contract rules
//!
//! Where the lifecycle tests walk whole sequences, these pin down single
//! rules across random inputs: what a Respond may touch, which attributes no
//! transition may change, and how quotes are rendered.

use std::collections::BTreeMap;

use proptest::prelude::*;
use shipment_negotiation::{
    ValidationError, contract,
    record::{Quote, ShipmentDraft, ShipmentRecord, ShipmentStatus},
    transition::{Command, Transition},
    types::{Party, PartyKey},
};

// PROPERTY TEST STRATEGIES

/// Strategy to generate a quote offering at least one mode
fn quote_strategy() -> impl Strategy<Value = Quote> {
    (prop::option::of(0u64..1_000_000), prop::option::of(0u64..1_000_000))
        .prop_filter("a quote must offer something", |(shared, dedicated)| {
            shared.is_some() || dedicated.is_some()
        })
        .prop_map(|(shared, dedicated)| Quote::new(shared, dedicated))
}

struct Shipment {
    responders: Vec<Party>,
    record: ShipmentRecord,
}

/// A shipment in `response-received` with a quote from every responder
fn responded(quotes: &[Quote]) -> Shipment {
    let requestor = Party::new("amazon");
    let responders: Vec<Party> = (0..quotes.len())
        .map(|i| Party::new(&format!("auto{}", i + 1)))
        .collect();

    let mut draft = ShipmentDraft::new()
        .set_requestor(requestor)
        .set_dimensions(1, 2, 3, 4)
        .set_source("krpuram")
        .set_destination("marathahalli");
    for responder in &responders {
        draft = draft.invite(responder.clone());
    }
    let mut record = draft.finalise().expect("valid draft");
    for (responder, quote) in responders.iter().zip(quotes) {
        record = record.with_response(&responder.key, *quote);
    }

    Shipment {
        responders,
        record,
    }
}

fn respond_tx(input: &ShipmentRecord, responder: &Party, output: ShipmentRecord) -> Transition {
    let mut tx = Transition::new(Command::Respond {
        responder: responder.key,
    });
    tx.inputs.push(input.state_ref());
    tx.outputs.push(output);
    tx.sign(responder);
    tx
}

// PROPERTY TESTS
proptest! {
    /// Property: a Respond changes exactly one entry of the responses map
    #[test]
    fn prop_respond_touches_only_its_own_entry(
        quotes in prop::collection::vec(quote_strategy(), 1..=4),
        pick in any::<prop::sample::Index>(),
        fresh in quote_strategy(),
    ) {
        let shipment = responded(&quotes);
        let responder = &shipment.responders[pick.index(shipment.responders.len())];

        let output = shipment.record.with_response(&responder.key, fresh);
        let tx = respond_tx(&shipment.record, responder, output.clone());
        prop_assert!(contract::verify(&tx, std::slice::from_ref(&shipment.record)).is_ok());

        let others = |responses: &BTreeMap<PartyKey, Quote>| -> BTreeMap<PartyKey, Quote> {
            responses
                .iter()
                .filter(|(key, _)| *key != &responder.key)
                .map(|(key, quote)| (*key, *quote))
                .collect()
        };
        prop_assert_eq!(others(&output.responses), others(&shipment.record.responses));
        prop_assert_eq!(output.quote_from(&responder.key), Some(&fresh));
    }

    /// Property: a Respond that also rewrites someone else's quote is rejected
    #[test]
    fn prop_respond_cannot_rewrite_other_quotes(
        quotes in prop::collection::vec(quote_strategy(), 2..=4),
        fresh in quote_strategy(),
        forged in quote_strategy(),
    ) {
        let shipment = responded(&quotes);
        let (responder, victim) = (&shipment.responders[0], &shipment.responders[1]);
        prop_assume!(shipment.record.quote_from(&victim.key) != Some(&forged));

        let mut output = shipment.record.with_response(&responder.key, fresh);
        output.responses.insert(victim.key, forged);
        let tx = respond_tx(&shipment.record, responder, output);

        prop_assert_eq!(
            contract::verify(&tx, std::slice::from_ref(&shipment.record)),
            Err(ValidationError::ResponsesTampered { command: "respond" })
        );
    }

    /// Property: no transition may change the shipment's fixed attributes
    #[test]
    fn prop_immutable_attributes_are_enforced(
        quotes in prop::collection::vec(quote_strategy(), 1..=3),
        field in 0usize..4,
        replacement in "[a-z]{3,12}",
        weight in any::<u32>(),
    ) {
        let shipment = responded(&quotes);
        let mut output = shipment.record.with_status(ShipmentStatus::ResponseReceived);
        match field {
            0 => {
                prop_assume!(replacement != output.source);
                output.source = replacement;
            }
            1 => {
                prop_assume!(replacement != output.destination);
                output.destination = replacement;
            }
            2 => {
                prop_assume!(weight != output.dimensions.weight);
                output.dimensions.weight = weight;
            }
            _ => {
                output.participants.push(Party::new(&replacement));
            }
        }
        let responder = &shipment.responders[0];
        let quote = *shipment.record.quote_from(&responder.key).expect("quoted");
        output.responses.insert(responder.key, quote);

        let tx = respond_tx(&shipment.record, responder, output);
        let verdict = contract::verify(&tx, std::slice::from_ref(&shipment.record));
        prop_assert!(
            matches!(verdict, Err(ValidationError::ImmutableChanged { .. })),
            "unexpected verdict {:?}", verdict
        );
    }

    /// Property: quotes render as `shared-dedicated` with unoffered modes blank
    #[test]
    fn prop_quote_rendering(
        shared in prop::option::of(any::<u64>()),
        dedicated in prop::option::of(any::<u64>()),
    ) {
        let rendered = Quote::new(shared, dedicated).to_string();
        let (left, right) = rendered.split_once('-').expect("separator");

        prop_assert_eq!(left, shared.map(|p| p.to_string()).unwrap_or_default());
        prop_assert_eq!(right, dedicated.map(|p| p.to_string()).unwrap_or_default());
    }
}
