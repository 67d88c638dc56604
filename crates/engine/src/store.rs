//! Behavior counter stores
//!
//! The counter store is where at-least-once delivery is collapsed into
//! exactly-once counting: `apply` tests and marks the event key atomically
//! with the counter mutation, so a redelivered event can never bump a counter
//! twice. Two implementations: an in-memory store for tests and embedded use,
//! and a SQLite store that survives restarts.

use crate::error::EngineError;
use async_trait::async_trait;
use cbi_core::Address;
use cbi_ledger::EventKey;
use cbi_scoring::{BehaviorCounters, RepaymentTiming};
use sqlx::{Row, SqlitePool};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

/// One counter mutation, keyed for idempotent application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterUpdate {
    Repayment(RepaymentTiming),
    Missed,
}

impl CounterUpdate {
    fn apply_to(self, counters: &mut BehaviorCounters) {
        match self {
            CounterUpdate::Repayment(timing) => counters.record_repayment(timing),
            CounterUpdate::Missed => counters.record_missed(),
        }
    }
}

/// Durable accumulator of per-borrower behavior counters.
#[async_trait]
pub trait BehaviorCounterStore: Send + Sync {
    /// Current counters for a borrower (defaults for one never seen).
    async fn counters(&self, address: &Address) -> Result<BehaviorCounters, EngineError>;

    /// Apply an update under the given idempotency key.
    ///
    /// Test-and-mark of the key and the counter mutation happen atomically.
    /// Returns the updated counters, or None if the key was already applied.
    async fn apply(
        &self,
        address: &Address,
        key: EventKey,
        update: CounterUpdate,
    ) -> Result<Option<BehaviorCounters>, EngineError>;

    /// Highest journal sequence this store has seen, for replay skipping.
    fn last_processed_sequence(&self) -> Option<u64>;

    /// Record a processed journal sequence.
    async fn record_sequence(&self, sequence: u64) -> Result<(), EngineError>;
}

#[derive(Debug, Default)]
struct MemoryState {
    counters: HashMap<Address, BehaviorCounters>,
    applied: HashSet<EventKey>,
}

/// In-memory counter store. Loses the applied-key set on restart, so it
/// relies on journal replay plus re-marking to converge.
#[derive(Debug, Default)]
pub struct InMemoryBehaviorStore {
    state: Mutex<MemoryState>,
    sequence: AtomicU64,
}

impl InMemoryBehaviorStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl BehaviorCounterStore for InMemoryBehaviorStore {
    async fn counters(&self, address: &Address) -> Result<BehaviorCounters, EngineError> {
        Ok(self.lock().counters.get(address).copied().unwrap_or_default())
    }

    async fn apply(
        &self,
        address: &Address,
        key: EventKey,
        update: CounterUpdate,
    ) -> Result<Option<BehaviorCounters>, EngineError> {
        let mut state = self.lock();
        if !state.applied.insert(key) {
            return Ok(None);
        }
        let counters = state.counters.entry(address.clone()).or_default();
        update.apply_to(counters);
        Ok(Some(*counters))
    }

    fn last_processed_sequence(&self) -> Option<u64> {
        match self.sequence.load(Ordering::SeqCst) {
            0 => None,
            seq => Some(seq),
        }
    }

    async fn record_sequence(&self, sequence: u64) -> Result<(), EngineError> {
        self.sequence.fetch_max(sequence, Ordering::SeqCst);
        Ok(())
    }
}

/// SQLite-backed counter store.
///
/// Counters, applied keys, and the journal cursor live in one database; the
/// key mark and the counter write commit in the same transaction.
pub struct SqliteBehaviorStore {
    pool: SqlitePool,
    // Cursor mirrored in memory so replay skipping doesn't hit the database.
    cursor: AtomicU64,
}

impl SqliteBehaviorStore {
    /// Open (or create) the behavior database at the given path.
    pub async fn connect(db_path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let db_url = format!("sqlite:{}?mode=rwc", db_path.as_ref().display());
        let pool = SqlitePool::connect(&db_url).await?;
        let store = Self {
            pool,
            cursor: AtomicU64::new(0),
        };
        store.init().await?;
        Ok(store)
    }

    async fn init(&self) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS behavior_counters (
                address TEXT PRIMARY KEY,
                early_payments INTEGER NOT NULL DEFAULT 0,
                on_time_payments INTEGER NOT NULL DEFAULT 0,
                late_payments INTEGER NOT NULL DEFAULT 0,
                missed_payments INTEGER NOT NULL DEFAULT 0,
                consistent_repayments INTEGER NOT NULL DEFAULT 0,
                suspicious_activity INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS applied_events (
                loan_id INTEGER NOT NULL,
                kind TEXT NOT NULL,
                applied_at TEXT NOT NULL,
                PRIMARY KEY (loan_id, kind)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS journal_cursor (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                sequence INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        let row = sqlx::query("SELECT sequence FROM journal_cursor WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;
        if let Some(row) = row {
            let seq: i64 = row.get("sequence");
            self.cursor.store(seq as u64, Ordering::SeqCst);
        }

        Ok(())
    }

    fn row_to_counters(row: &sqlx::sqlite::SqliteRow) -> BehaviorCounters {
        BehaviorCounters {
            early_payments: row.get::<i64, _>("early_payments") as u32,
            on_time_payments: row.get::<i64, _>("on_time_payments") as u32,
            late_payments: row.get::<i64, _>("late_payments") as u32,
            missed_payments: row.get::<i64, _>("missed_payments") as u32,
            consistent_repayments: row.get::<i64, _>("consistent_repayments") as u32,
            suspicious_activity: row.get::<i64, _>("suspicious_activity") != 0,
        }
    }
}

#[async_trait]
impl BehaviorCounterStore for SqliteBehaviorStore {
    async fn counters(&self, address: &Address) -> Result<BehaviorCounters, EngineError> {
        let row = sqlx::query("SELECT * FROM behavior_counters WHERE address = ?")
            .bind(address.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| Self::row_to_counters(&r)).unwrap_or_default())
    }

    async fn apply(
        &self,
        address: &Address,
        key: EventKey,
        update: CounterUpdate,
    ) -> Result<Option<BehaviorCounters>, EngineError> {
        let mut tx = self.pool.begin().await?;

        let marked = sqlx::query(
            "INSERT OR IGNORE INTO applied_events (loan_id, kind, applied_at) VALUES (?, ?, ?)",
        )
        .bind(key.loan_id as i64)
        .bind(key.kind.to_string())
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await?;
        if marked.rows_affected() == 0 {
            tracing::debug!(key = %key, "duplicate event key, counters unchanged");
            return Ok(None);
        }

        let row = sqlx::query("SELECT * FROM behavior_counters WHERE address = ?")
            .bind(address.as_str())
            .fetch_optional(&mut *tx)
            .await?;
        let mut counters = row.map(|r| Self::row_to_counters(&r)).unwrap_or_default();
        update.apply_to(&mut counters);

        sqlx::query(
            r#"
            INSERT INTO behavior_counters
                (address, early_payments, on_time_payments, late_payments,
                 missed_payments, consistent_repayments, suspicious_activity)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (address) DO UPDATE SET
                early_payments = excluded.early_payments,
                on_time_payments = excluded.on_time_payments,
                late_payments = excluded.late_payments,
                missed_payments = excluded.missed_payments,
                consistent_repayments = excluded.consistent_repayments,
                suspicious_activity = excluded.suspicious_activity
            "#,
        )
        .bind(address.as_str())
        .bind(counters.early_payments as i64)
        .bind(counters.on_time_payments as i64)
        .bind(counters.late_payments as i64)
        .bind(counters.missed_payments as i64)
        .bind(counters.consistent_repayments as i64)
        .bind(counters.suspicious_activity as i64)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(counters))
    }

    fn last_processed_sequence(&self) -> Option<u64> {
        match self.cursor.load(Ordering::SeqCst) {
            0 => None,
            seq => Some(seq),
        }
    }

    async fn record_sequence(&self, sequence: u64) -> Result<(), EngineError> {
        if sequence <= self.cursor.load(Ordering::SeqCst) {
            return Ok(());
        }
        sqlx::query(
            r#"
            INSERT INTO journal_cursor (id, sequence) VALUES (1, ?)
            ON CONFLICT (id) DO UPDATE SET sequence = MAX(sequence, excluded.sequence)
            "#,
        )
        .bind(sequence as i64)
        .execute(&self.pool)
        .await?;
        self.cursor.fetch_max(sequence, Ordering::SeqCst);
        Ok(())
    }
}
