//! Shared plumbing for the PTab fleet: error types, per-type marshals, the
//! wire protocol, the message bus contract, and startup configuration.

pub mod bus;
pub mod config;
pub mod error;
pub mod marshal;
pub mod message;
pub mod params;
pub mod types;

pub use bus::{LocalBus, MessageBus};
pub use config::Config;
pub use error::{PtabError, PtabResult};
pub use marshal::{BincodeMarshal, FixedMarshal, Marshal, MarshalError, StringMarshal};
pub use message::Tag;
pub use params::ParamMap;
pub use types::{Rank, ShardId, TableId, MASTER_RANK};
