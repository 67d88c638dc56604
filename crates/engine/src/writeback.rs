//! Score write-back to the authoritative ledger

use async_trait::async_trait;
use cbi_core::Address;
use cbi_ledger::{LedgerError, LedgerStore, LoanEvent};
use std::sync::Arc;
use thiserror::Error;

/// Write-back failures, split by how the engine reacts.
///
/// Transient failures are retried with backoff and eventually parked in the
/// pending queue. Rejections are final: the ledger refused the write, so
/// retrying the same update cannot succeed.
#[derive(Error, Debug)]
pub enum WriteBackError {
    #[error("Transient write-back failure: {0}")]
    Transient(String),

    #[error("Write-back rejected: {0}")]
    Rejected(#[from] LedgerError),
}

impl WriteBackError {
    pub fn is_transient(&self) -> bool {
        matches!(self, WriteBackError::Transient(_))
    }
}

/// Result of a confirmed score write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreUpdate {
    pub old_score: i32,
    pub new_score: i32,
}

/// Sink for recomputed CBI scores.
///
/// The engine treats the write as unconfirmed until this returns Ok, so
/// implementations must not report success before the score is durably
/// applied.
#[async_trait]
pub trait ScoreWriter: Send + Sync {
    async fn update_cbi_score(
        &self,
        address: &Address,
        score: i32,
    ) -> Result<ScoreUpdate, WriteBackError>;
}

/// Writes scores straight into a `LedgerStore` using its admin capability.
pub struct LedgerScoreWriter {
    store: Arc<LedgerStore>,
    admin: Address,
}

impl LedgerScoreWriter {
    pub fn new(store: Arc<LedgerStore>) -> Self {
        let admin = store.admin().clone();
        Self { store, admin }
    }
}

#[async_trait]
impl ScoreWriter for LedgerScoreWriter {
    async fn update_cbi_score(
        &self,
        address: &Address,
        score: i32,
    ) -> Result<ScoreUpdate, WriteBackError> {
        let event = self.store.update_cbi_score(&self.admin, address, score)?;
        if let LoanEvent::CbiScoreUpdated {
            old_score,
            new_score,
            ..
        } = event
        {
            Ok(ScoreUpdate {
                old_score,
                new_score,
            })
        } else {
            Err(WriteBackError::Transient(
                "ledger returned an unexpected event for a score update".into(),
            ))
        }
    }
}
