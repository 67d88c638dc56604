//! CBI Core - shared domain primitives
//!
//! # Key Types
//! - `Address`: normalized borrower/admin identity key
//! - `Amount`: non-negative decimal for loan and pool amounts
//! - `ScoreBounds`: base score and clamp range for CBI scores

pub mod address;
pub mod amount;
pub mod score;

pub use address::{Address, AddressError};
pub use amount::{Amount, AmountError};
pub use score::ScoreBounds;
