//! Reconciliation engine errors

use thiserror::Error;

/// Errors that can occur while processing lifecycle events.
///
/// These are infrastructure failures. Domain-level rejections from the score
/// write-back path are handled inside the engine (logged and dropped or
/// queued) and never surface here.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Pool error: {0}")]
    Pool(#[from] cbi_pool::PoolError),

    #[error("Behavior store error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Journal error: {0}")]
    Journal(#[from] cbi_events::EventError),
}
