//! Address - Normalized identity key for borrowers and admins
//!
//! Addresses come from an external ledger and are compared
//! case-insensitively, so we normalize to lowercase on construction.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur when parsing addresses
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("Empty address")]
    Empty,

    #[error("Address contains whitespace: {0:?}")]
    ContainsWhitespace(String),
}

/// A normalized identity key.
///
/// # Examples
/// ```
/// use cbi_core::Address;
///
/// let a: Address = "0xAbC123".parse().unwrap();
/// let b: Address = "0xabc123".parse().unwrap();
/// assert_eq!(a, b);
/// assert_eq!(a.to_string(), "0xabc123");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    /// Create a new Address, trimming and lowercasing the input.
    pub fn new(value: impl AsRef<str>) -> Result<Self, AddressError> {
        let trimmed = value.as_ref().trim();
        if trimmed.is_empty() {
            return Err(AddressError::Empty);
        }
        if trimmed.chars().any(char::is_whitespace) {
            return Err(AddressError::ContainsWhitespace(trimmed.to_string()));
        }
        Ok(Self(trimmed.to_lowercase()))
    }

    /// Get the normalized string form
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Address {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.0
    }
}
