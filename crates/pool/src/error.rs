//! Pool ledger errors

use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Deposit amount must be positive, got {0}")]
    InvalidAmount(Decimal),

    #[error("Insufficient pool balance: available {available}, required {required}")]
    InsufficientBalance {
        available: Decimal,
        required: Decimal,
    },

    #[error("Corrupt value in pool database: {0}")]
    Corrupt(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}
