//! CBI Events - JSONL event journal
//!
//! The journal is the Source of Truth for the authoritative ledger: every
//! lifecycle event is appended as one JSON line, files rotate daily, and
//! state (LedgerStore, pool, behavior counters) is rebuilt by replay.

pub mod error;
pub mod reader;
pub mod record;
pub mod store;

pub use error::EventError;
pub use reader::EventReader;
pub use record::EventRecord;
pub use store::EventStore;
