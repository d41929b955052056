pub mod attachment;
pub mod builder;
pub mod config;
pub mod contract;
pub mod directory;
pub mod error;
pub mod invocation;
pub mod node;
pub mod protocol;
pub mod record;
pub mod sequencer;
pub mod session;
pub mod store;
pub mod transition;
pub mod types;
pub mod utils;

pub use config::NodeConfig;
pub use error::{AttachmentError, NegotiationError, ValidationError};
pub use node::{Ledger, Node};
pub use record::{ShipmentRecord, ShipmentStatus};
