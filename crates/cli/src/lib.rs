//! CBI CLI - command orchestration for the lending core
//!
//! This crate provides the `cbi` binary and wires the ledger, journal, bus,
//! pool, and reconciliation engine together.

pub mod commands;
pub mod context;

pub use context::{AppContext, AppScoreWriter, CommitError};
