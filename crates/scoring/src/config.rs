//! Scoring configuration with configurable weights and bounds
//!
//! All weights are configurable via file/env, not hardcoded. Defaults keep
//! a fresh borrower at 50 and make a missed payment outweigh an on-time one.

use cbi_core::ScoreBounds;
use serde::{Deserialize, Serialize};

/// Configuration for the score model.
///
/// Positive weights reward early/on-time/consistent repayment; negative
/// weights (applied by subtraction) penalize late payments, defaults, and
/// flagged accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Base score and clamp range
    #[serde(default)]
    pub bounds: ScoreBounds,

    /// Reward per early payment
    #[serde(default = "default_w_early")]
    pub w_early: i32,

    /// Reward per on-time payment
    #[serde(default = "default_w_on_time")]
    pub w_on_time: i32,

    /// Reward per consistent repayment (any timing)
    #[serde(default = "default_w_consistent")]
    pub w_consistent: i32,

    /// Penalty per late payment
    #[serde(default = "default_w_late")]
    pub w_late: i32,

    /// Penalty per missed payment (default)
    #[serde(default = "default_w_missed")]
    pub w_missed: i32,

    /// One-off penalty while the suspicious-activity flag is set
    #[serde(default = "default_w_suspicious")]
    pub w_suspicious: i32,
}

// Default value functions for serde
fn default_w_early() -> i32 {
    10
}

fn default_w_on_time() -> i32 {
    5
}

fn default_w_consistent() -> i32 {
    2
}

fn default_w_late() -> i32 {
    5
}

fn default_w_missed() -> i32 {
    15
}

fn default_w_suspicious() -> i32 {
    20
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            bounds: ScoreBounds::default(),
            w_early: default_w_early(),
            w_on_time: default_w_on_time(),
            w_consistent: default_w_consistent(),
            w_late: default_w_late(),
            w_missed: default_w_missed(),
            w_suspicious: default_w_suspicious(),
        }
    }
}

impl ScoringConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &std::path::Path) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}
