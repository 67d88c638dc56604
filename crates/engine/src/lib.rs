//! CBI Engine - reconciliation between the loan ledger, the fund pool, and
//! borrower CBI scores
//!
//! The engine consumes journaled lifecycle events and keeps three stores
//! consistent: the pool balance (debit on issue, credit on repayment),
//! per-borrower behavior counters, and the CBI score written back to the
//! ledger. Every effect is keyed by (loan id, event kind) so at-least-once
//! delivery still applies each effect exactly once.
//!
//! # Key Types
//! - `ReconciliationEngine`: processes events, retries write-backs
//! - `BehaviorCounterStore`: idempotent counter accumulation (memory/SQLite)
//! - `ScoreWriter`: confirmed score write-back seam
//! - `EngineRunner`: live bus consumption with per-borrower serialization

pub mod engine;
pub mod error;
pub mod retry;
pub mod runner;
pub mod store;
pub mod writeback;

pub use engine::{Outcome, PendingUpdate, ReconciliationEngine, ReplaySummary};
pub use error::EngineError;
pub use retry::RetryPolicy;
pub use runner::EngineRunner;
pub use store::{BehaviorCounterStore, CounterUpdate, InMemoryBehaviorStore, SqliteBehaviorStore};
pub use writeback::{LedgerScoreWriter, ScoreUpdate, ScoreWriter, WriteBackError};
