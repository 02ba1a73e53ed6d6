//! Persistence layer: campaigns, messages, and follow-up bookkeeping.

pub mod libsql_backend;
pub mod memory;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use memory::MemoryStore;
pub use traits::{CampaignStore, STALE_CLAIM_ERROR};
