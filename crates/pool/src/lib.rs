//! CBI Pool - the fund pool's balance and transaction ledger
//!
//! The pool is debited when a loan is issued and credited when one is
//! repaid. Balance and transaction log live in SQLite; the loan/repayment
//! idempotency table commits in the same transaction as the balance
//! mutation, so each lifecycle event moves the balance exactly once even
//! under redelivery or a crash between apply and acknowledge.

pub mod error;
pub mod ledger;

pub use error::PoolError;
pub use ledger::{PoolApply, PoolLedger, PoolTransaction, PoolTxType};
