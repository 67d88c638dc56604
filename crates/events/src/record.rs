//! Journal envelope around a lifecycle event

use cbi_ledger::LoanEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One journaled event.
///
/// `sequence` is assigned by the journal on append, starts at 1 and is
/// strictly increasing; subscribers can use it to skip already-processed
/// records during replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub sequence: u64,
    pub recorded_at: DateTime<Utc>,
    pub event: LoanEvent,
}
