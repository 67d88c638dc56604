//! CBI Scoring - behavioral counters and the score model
//!
//! The score model is a pure function of the counters: no side effects, no
//! external dependency, referentially transparent. That property is what
//! makes score recomputation safe to repeat after duplicate event delivery
//! or write-back retries.

pub mod config;
pub mod counters;
pub mod model;

pub use config::ScoringConfig;
pub use counters::{BehaviorCounters, RepaymentTiming};
pub use model::ScoreModel;
