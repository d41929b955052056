//! Walks one shipment from post to delivery with three parties on a shared ledger.
//!
//! Run with `RUST_LOG=shipment_negotiation=debug` to see every protocol stage.
//! An optional first argument names a TOML config file.
use std::sync::Arc;

use anyhow::Context;
use shipment_negotiation::{
    NodeConfig, ShipmentStatus,
    directory::InMemoryDirectory,
    node::{Ledger, Node},
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("shipment_negotiation=info".parse()?),
        )
        .init();

    // the scratch directory lives until main returns
    let (config, _scratch) = match std::env::args().nth(1) {
        Some(path) => (NodeConfig::load(path)?, None),
        None => {
            let scratch = tempfile::tempdir()?;
            let config = NodeConfig {
                data_dir: scratch.path().to_path_buf(),
                ..NodeConfig::default()
            };
            (config, Some(scratch))
        }
    };

    let directory = Arc::new(InMemoryDirectory::new());
    let amazon = directory.register("amazon");
    let auto1 = directory.register("auto1");
    let auto2 = directory.register("auto2");

    let (ledger, _sequencer) = Ledger::open(&config, directory)?;
    let amazon = Node::new(amazon, ledger.clone(), config.clone());
    let auto1 = Node::new(auto1, ledger.clone(), config.clone());
    let auto2 = Node::new(auto2, ledger, config);

    let recovered = amazon.resume_pending()?;
    if !recovered.is_empty() {
        println!("settled {} interrupted step(s)", recovered.len());
    }

    let peers: Vec<String> = amazon.peers().into_iter().map(|p| p.name).collect();
    println!("{} sees peers {:?}", amazon.me(), peers);

    amazon
        .invoke(
            "Post",
            &["10", "10", "10", "10", "krpuram", "marathahalli", "auto1", "auto2"],
        )
        .await
        .context("post failed")?;
    let record_id = amazon
        .query_by_status(ShipmentStatus::Initiated)?
        .pop()
        .context("nothing was posted")?
        .record_id;
    let id = record_id.to_string();
    let id = id.as_str();

    auto1.invoke("Respond", &[id, "100", "200", "auto1"]).await?;
    auto2.invoke("Respond", &[id, "90", "-", "auto2"]).await?;
    amazon.invoke("Accept", &[id, "auto2", "shared"]).await?;

    let digest = auto2.upload_attachment(b"signed proof of pickup")?;
    let digest = digest.to_string();
    auto2.invoke("DocUpload", &[id, digest.as_str()]).await?;
    auto2.invoke("UpdateStatus", &[id, "picked"]).await?;
    auto2.invoke("UpdateStatus", &[id, "delivered"]).await?;

    for row in amazon.history(&record_id)? {
        let record = row.record;
        println!(
            "{:<18} responses={:?} accepted={:?} price={:?} produced_by={}",
            record.status.as_str(),
            record.responses_by_name(),
            record.accepted_responder.map(|p| p.name),
            record.final_price,
            row.produced_by,
        );
    }

    Ok(())
}
