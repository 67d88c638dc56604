//! Ledger errors

use crate::loan::LoanId;
use cbi_core::Address;
use thiserror::Error;

/// Errors that can occur in ledger operations.
///
/// A rejecting operation leaves all entities unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("User already registered: {0}")]
    AlreadyRegistered(Address),

    #[error("User not registered: {0}")]
    NotRegistered(Address),

    #[error("User blacklisted: {0}")]
    Blacklisted(Address),

    #[error("Loan amount must be positive")]
    InvalidAmount,

    #[error("Loan duration must be positive, got {0} seconds")]
    InvalidDuration(i64),

    #[error("Loan not found: {0}")]
    LoanNotFound(LoanId),

    #[error("Caller {caller} is not the borrower of loan {loan_id}")]
    NotBorrower { caller: Address, loan_id: LoanId },

    #[error("Loan {0} already settled (repaid or defaulted)")]
    AlreadyTerminal(LoanId),

    #[error("Loan {0} not overdue")]
    NotOverdue(LoanId),

    #[error("Only admin allowed")]
    Unauthorized,
}

/// Error taxonomy for callers that handle classes of failure uniformly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input (amount, duration)
    Validation,
    /// Non-admin calling an admin-only operation
    Authorization,
    /// Illegal lifecycle transition
    State,
    /// Unknown user or loan
    NotFound,
}

impl LedgerError {
    /// Classify the error into the coarse taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::InvalidAmount | LedgerError::InvalidDuration(_) => ErrorKind::Validation,
            LedgerError::Unauthorized => ErrorKind::Authorization,
            LedgerError::AlreadyRegistered(_)
            | LedgerError::Blacklisted(_)
            | LedgerError::AlreadyTerminal(_)
            | LedgerError::NotOverdue(_)
            | LedgerError::NotBorrower { .. } => ErrorKind::State,
            LedgerError::NotRegistered(_) | LedgerError::LoanNotFound(_) => ErrorKind::NotFound,
        }
    }
}
