//! Loan - immutable principal and dates with a terminal settlement state

use cbi_core::{Address, Amount};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Loan identifier - dense, monotonically increasing, assigned at creation.
pub type LoanId = u64;

/// Derived lifecycle status of a loan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LoanStatus {
    Active,
    Repaid,
    Defaulted,
}

/// A single loan.
///
/// # Invariant
/// At most one of `repaid`/`defaulted` may become true, and once either is
/// true the loan is terminal - no further mutation is permitted. This is
/// enforced by `LedgerStore`; the flags here are plain data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Loan {
    pub id: LoanId,
    pub borrower: Address,
    pub amount: Amount,
    pub created_at: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    pub repaid: bool,
    pub defaulted: bool,
}

impl Loan {
    /// Create a new active loan.
    pub fn new(
        id: LoanId,
        borrower: Address,
        amount: Amount,
        created_at: DateTime<Utc>,
        due_date: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            borrower,
            amount,
            created_at,
            due_date,
            repaid: false,
            defaulted: false,
        }
    }

    /// Whether the loan has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.repaid || self.defaulted
    }

    /// Derived status.
    pub fn status(&self) -> LoanStatus {
        if self.repaid {
            LoanStatus::Repaid
        } else if self.defaulted {
            LoanStatus::Defaulted
        } else {
            LoanStatus::Active
        }
    }
}
