//! User - registered borrower record

use cbi_core::Address;
use serde::{Deserialize, Serialize};

/// A registered borrower.
///
/// Created once by `registerUser` and never destroyed. `cbi_score` is the
/// only field the reconciliation engine writes back; `blacklisted` is
/// admin-controlled and blocks new loan requests while set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub address: Address,
    pub registered: bool,
    pub cbi_score: i32,
    pub total_loans: u64,
    pub blacklisted: bool,
}

impl User {
    /// Create a freshly registered user at the base score.
    pub fn new(address: Address, base_score: i32) -> Self {
        Self {
            address,
            registered: true,
            cbi_score: base_score,
            total_loans: 0,
            blacklisted: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_user_defaults() {
        let user = User::new(Address::new("alice").unwrap(), 50);
        assert!(user.registered);
        assert_eq!(user.cbi_score, 50);
        assert_eq!(user.total_loans, 0);
        assert!(!user.blacklisted);
    }
}
