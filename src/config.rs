//! Node configuration
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Directory holding the ledger database
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Extra attempts after a sequencing conflict before giving up
    #[serde(default = "default_max_conflict_retries")]
    pub max_conflict_retries: u32,

    /// How long a session waits for the counterpart's next trigger
    #[serde(default = "default_trigger_timeout")]
    pub trigger_timeout_secs: u64,

    /// Capacity of the sequencer's admission queue
    #[serde(default = "default_queue_depth")]
    pub sequencer_queue_depth: usize,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./shipment-data")
}

fn default_max_conflict_retries() -> u32 {
    3
}

fn default_trigger_timeout() -> u64 {
    300
}

fn default_queue_depth() -> usize {
    64
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            max_conflict_retries: default_max_conflict_retries(),
            trigger_timeout_secs: default_trigger_timeout(),
            sequencer_queue_depth: default_queue_depth(),
        }
    }
}

impl NodeConfig {
    /// Load config from a TOML file. Missing keys take their defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self).context("serialising config")?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn trigger_timeout(&self) -> Duration {
        Duration::from_secs(self.trigger_timeout_secs)
    }

    /// Path of the sled database inside `data_dir`.
    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join("ledger.sled")
    }
}
