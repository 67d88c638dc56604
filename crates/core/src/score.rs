//! ScoreBounds - base score and clamp range for CBI scores
//!
//! Shared by the ledger (registration default, write-back clamping) and
//! the score model. All values are configurable, not hardcoded.

use serde::{Deserialize, Serialize};

/// Base score and [min, max] clamp range for CBI scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreBounds {
    /// Score assigned on registration
    #[serde(default = "default_base")]
    pub base: i32,

    /// Lower clamp bound
    #[serde(default = "default_min")]
    pub min: i32,

    /// Upper clamp bound
    #[serde(default = "default_max")]
    pub max: i32,
}

fn default_base() -> i32 {
    50
}

fn default_min() -> i32 {
    0
}

fn default_max() -> i32 {
    100
}

impl Default for ScoreBounds {
    fn default() -> Self {
        Self {
            base: default_base(),
            min: default_min(),
            max: default_max(),
        }
    }
}

impl ScoreBounds {
    /// Clamp a raw score into [min, max].
    ///
    /// Takes i64 so weighted sums cannot overflow before clamping.
    pub fn clamp(&self, raw: i64) -> i32 {
        raw.clamp(self.min as i64, self.max as i64) as i32
    }

    /// Check whether a score already lies within the bounds.
    pub fn contains(&self, score: i32) -> bool {
        score >= self.min && score <= self.max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let bounds = ScoreBounds::default();
        assert_eq!(bounds.base, 50);
        assert_eq!(bounds.min, 0);
        assert_eq!(bounds.max, 100);
    }

    #[test]
    fn test_clamp() {
        let bounds = ScoreBounds::default();
        assert_eq!(bounds.clamp(-40), 0);
        assert_eq!(bounds.clamp(62), 62);
        assert_eq!(bounds.clamp(1_000), 100);
    }

    #[test]
    fn test_contains() {
        let bounds = ScoreBounds::default();
        assert!(bounds.contains(0));
        assert!(bounds.contains(100));
        assert!(!bounds.contains(101));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let bounds: ScoreBounds = serde_json::from_str(r#"{ "max": 850 }"#).unwrap();
        assert_eq!(bounds.base, 50);
        assert_eq!(bounds.max, 850);
    }
}
