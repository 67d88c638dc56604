//! CBI Ledger - Authoritative record of Users and Loans
//!
//! This is the HEART of the lending core. All loan/user lifecycle changes go
//! through `LedgerStore`, which validates, mutates state under one write lock,
//! and returns the lifecycle event for the caller to journal and publish.
//!
//! # Key Types
//! - `User`: registered borrower with CBI score and blacklist flag
//! - `Loan`: immutable principal/dates with a terminal repaid/defaulted state
//! - `LoanEvent`: the six lifecycle events emitted by the store
//! - `LedgerStore`: the operations and their invariants

pub mod error;
pub mod event;
pub mod loan;
pub mod store;
pub mod user;

pub use error::{ErrorKind, LedgerError};
pub use event::{EventKey, EventKind, LoanEvent};
pub use loan::{Loan, LoanId, LoanStatus};
pub use store::LedgerStore;
pub use user::User;
