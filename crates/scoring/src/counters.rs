//! Per-borrower behavior counters

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Classification of a repayment relative to the due date.
///
/// Canonical tie-break rule: paying exactly at the due date is on-time,
/// before it is early, after it is late. Late is only reachable when the
/// borrower repays an overdue loan before an admin defaults it - both paths
/// are legal since default is admin-triggered, not automatic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepaymentTiming {
    Early,
    OnTime,
    Late,
}

impl RepaymentTiming {
    /// Classify a repayment timestamp against the loan's due date.
    pub fn classify(paid_at: DateTime<Utc>, due_date: DateTime<Utc>) -> Self {
        if paid_at < due_date {
            RepaymentTiming::Early
        } else if paid_at == due_date {
            RepaymentTiming::OnTime
        } else {
            RepaymentTiming::Late
        }
    }
}

/// Accumulated repayment behavior for one borrower.
///
/// Counters are monotonically non-decreasing except on explicit reset.
/// `suspicious_activity` is reserved for future fraud signals: it is carried
/// through scoring but not set by any lifecycle event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BehaviorCounters {
    pub early_payments: u32,
    pub on_time_payments: u32,
    pub late_payments: u32,
    pub missed_payments: u32,
    pub consistent_repayments: u32,
    pub suspicious_activity: bool,
}

impl BehaviorCounters {
    /// Record one repayment: the timing-specific counter plus the
    /// consistent-repayments counter.
    pub fn record_repayment(&mut self, timing: RepaymentTiming) {
        match timing {
            RepaymentTiming::Early => self.early_payments += 1,
            RepaymentTiming::OnTime => self.on_time_payments += 1,
            RepaymentTiming::Late => self.late_payments += 1,
        }
        self.consistent_repayments += 1;
    }

    /// Record one defaulted loan.
    pub fn record_missed(&mut self) {
        self.missed_payments += 1;
    }

    /// Total repayments observed (any timing).
    pub fn total_repayments(&self) -> u32 {
        self.early_payments + self.on_time_payments + self.late_payments
    }
}
