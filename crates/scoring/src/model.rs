//! Pure CBI score function

use crate::config::ScoringConfig;
use crate::counters::BehaviorCounters;

/// The CBI score model.
///
/// `score` is a pure, deterministic function of the counters: identical
/// input always produces identical output, and the result always lies in
/// `[bounds.min, bounds.max]`. No side effects - the reconciliation engine
/// relies on this to recompute and rewrite scores idempotently.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScoreModel {
    config: ScoringConfig,
}

impl ScoreModel {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Compute the clamped CBI score from accumulated counters.
    pub fn score(&self, counters: &BehaviorCounters) -> i32 {
        let c = &self.config;

        // i64 arithmetic: counter * weight cannot overflow before clamping.
        let mut raw = c.bounds.base as i64;
        raw += counters.early_payments as i64 * c.w_early as i64;
        raw += counters.on_time_payments as i64 * c.w_on_time as i64;
        raw += counters.consistent_repayments as i64 * c.w_consistent as i64;
        raw -= counters.late_payments as i64 * c.w_late as i64;
        raw -= counters.missed_payments as i64 * c.w_missed as i64;
        if counters.suspicious_activity {
            raw -= c.w_suspicious as i64;
        }

        c.bounds.clamp(raw)
    }
}
