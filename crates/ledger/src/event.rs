//! Lifecycle events emitted by the ledger
//!
//! One event per mutating operation. The first four drive reconciliation;
//! `CbiScoreUpdated` and `UserBlacklisted` are observability echoes of the
//! ledger's own writes.

use crate::loan::LoanId;
use cbi_core::{Address, Amount};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use strum_macros::{Display, EnumString};

/// Events emitted by `LedgerStore` operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoanEvent {
    UserRegistered {
        address: Address,
        registered_at: DateTime<Utc>,
    },

    LoanRequested {
        loan_id: LoanId,
        borrower: Address,
        amount: Amount,
        created_at: DateTime<Utc>,
        due_date: DateTime<Utc>,
    },

    RepaymentMade {
        loan_id: LoanId,
        borrower: Address,
        amount: Amount,
        due_date: DateTime<Utc>,
        paid_at: DateTime<Utc>,
    },

    LoanDefaulted {
        loan_id: LoanId,
        borrower: Address,
        due_date: DateTime<Utc>,
        defaulted_at: DateTime<Utc>,
    },

    CbiScoreUpdated {
        address: Address,
        old_score: i32,
        new_score: i32,
        updated_at: DateTime<Utc>,
    },

    UserBlacklisted {
        address: Address,
        flag: bool,
        updated_at: DateTime<Utc>,
    },
}

/// Kind tag for the three loan-lifecycle events that mutate downstream state.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Requested,
    Repaid,
    Defaulted,
}

/// Idempotency key: (loan id, event kind).
///
/// Used to detect and discard duplicate event redelivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventKey {
    pub loan_id: LoanId,
    pub kind: EventKind,
}

impl EventKey {
    pub fn new(loan_id: LoanId, kind: EventKind) -> Self {
        Self { loan_id, kind }
    }
}

// Renders as "loan_id:kind" in logs and the applied-events table.
impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.loan_id, self.kind)
    }
}

impl LoanEvent {
    /// The address whose behavior this event concerns, if any.
    pub fn borrower(&self) -> Option<&Address> {
        match self {
            LoanEvent::LoanRequested { borrower, .. }
            | LoanEvent::RepaymentMade { borrower, .. }
            | LoanEvent::LoanDefaulted { borrower, .. } => Some(borrower),
            LoanEvent::UserRegistered { address, .. }
            | LoanEvent::CbiScoreUpdated { address, .. }
            | LoanEvent::UserBlacklisted { address, .. } => Some(address),
        }
    }

    /// Idempotency key for the three state-mutating lifecycle events.
    ///
    /// Returns None for observability-only events.
    pub fn key(&self) -> Option<EventKey> {
        match self {
            LoanEvent::LoanRequested { loan_id, .. } => {
                Some(EventKey::new(*loan_id, EventKind::Requested))
            }
            LoanEvent::RepaymentMade { loan_id, .. } => {
                Some(EventKey::new(*loan_id, EventKind::Repaid))
            }
            LoanEvent::LoanDefaulted { loan_id, .. } => {
                Some(EventKey::new(*loan_id, EventKind::Defaulted))
            }
            _ => None,
        }
    }

    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            LoanEvent::UserRegistered { .. } => "user_registered",
            LoanEvent::LoanRequested { .. } => "loan_requested",
            LoanEvent::RepaymentMade { .. } => "repayment_made",
            LoanEvent::LoanDefaulted { .. } => "loan_defaulted",
            LoanEvent::CbiScoreUpdated { .. } => "cbi_score_updated",
            LoanEvent::UserBlacklisted { .. } => "user_blacklisted",
        }
    }
}
