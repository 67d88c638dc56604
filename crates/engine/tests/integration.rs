//! End-to-end reconciliation scenarios: ledger events through the engine
//! into pool balance, behavior counters, and written-back CBI scores.

use async_trait::async_trait;
use cbi_core::{Address, Amount, ScoreBounds};
use cbi_bus::EventBus;
use cbi_engine::{
    BehaviorCounterStore, CounterUpdate, EngineError, EngineRunner, InMemoryBehaviorStore,
    LedgerScoreWriter, Outcome, ReconciliationEngine, RetryPolicy, ScoreUpdate, ScoreWriter,
    SqliteBehaviorStore, WriteBackError,
};
use cbi_events::{EventRecord, EventStore};
use cbi_ledger::{EventKey, LedgerStore, LoanEvent};
use cbi_pool::PoolLedger;
use cbi_scoring::{BehaviorCounters, ScoreModel, ScoringConfig};
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

fn addr(s: &str) -> Address {
    Address::new(s).unwrap()
}

fn amount(val: i64) -> Amount {
    Amount::positive(Decimal::new(val, 0)).unwrap()
}

fn record(sequence: u64, event: LoanEvent) -> EventRecord {
    EventRecord {
        sequence,
        recorded_at: Utc::now(),
        event,
    }
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_backoff: std::time::Duration::from_millis(1),
        max_backoff: std::time::Duration::from_millis(5),
    }
}

struct Harness {
    ledger: Arc<LedgerStore>,
    pool: Arc<PoolLedger>,
    engine: ReconciliationEngine,
    _dir: TempDir,
}

async fn harness() -> Harness {
    let dir = TempDir::new().unwrap();
    let ledger = Arc::new(LedgerStore::new(addr("admin"), ScoreBounds::default()));
    let pool = Arc::new(PoolLedger::connect(dir.path().join("pool.db")).await.unwrap());
    pool.deposit(dec!(10000)).await.unwrap();

    let engine = ReconciliationEngine::with_retry(
        Arc::new(InMemoryBehaviorStore::new()),
        Arc::clone(&pool),
        ScoreModel::new(ScoringConfig::default()),
        Arc::new(LedgerScoreWriter::new(Arc::clone(&ledger))),
        fast_retry(),
    );

    Harness {
        ledger,
        pool,
        engine,
        _dir: dir,
    }
}

#[tokio::test]
async fn test_early_repayment_reconciles_pool_and_score() {
    let h = harness().await;
    let alice = addr("alice");
    let now = Utc::now();

    h.ledger.register_user_at(&alice, now).unwrap();
    let requested = h
        .ledger
        .request_loan_at(&alice, amount(1000), Duration::days(7), now)
        .unwrap();
    let repaid = h
        .ledger
        .repay_loan_at(&alice, 0, now + Duration::days(2))
        .unwrap();

    let out = h.engine.process(&record(1, requested)).await.unwrap();
    assert_eq!(out, Outcome::PoolDebited { loan_id: 0 });
    assert_eq!(h.pool.balance().await.unwrap(), dec!(9000));

    let out = h.engine.process(&record(2, repaid)).await.unwrap();
    assert_eq!(
        out,
        Outcome::ScoreReconciled {
            address: alice.clone(),
            score: 62
        }
    );

    // Pool restored, score written back to the ledger.
    assert_eq!(h.pool.balance().await.unwrap(), dec!(10000));
    assert_eq!(h.ledger.get_user(&alice).unwrap().cbi_score, 62);
}

#[tokio::test]
async fn test_default_lowers_score() {
    let h = harness().await;
    let bob = addr("bob");
    let now = Utc::now();

    h.ledger.register_user_at(&bob, now).unwrap();
    let requested = h
        .ledger
        .request_loan_at(&bob, amount(500), Duration::days(3), now)
        .unwrap();
    let defaulted = h
        .ledger
        .mark_loan_default_at(&addr("admin"), 0, now + Duration::days(5))
        .unwrap();

    h.engine.process(&record(1, requested)).await.unwrap();
    let out = h.engine.process(&record(2, defaulted)).await.unwrap();
    assert_eq!(
        out,
        Outcome::ScoreReconciled {
            address: bob.clone(),
            score: 35
        }
    );

    // Defaulted principal is not returned to the pool.
    assert_eq!(h.pool.balance().await.unwrap(), dec!(9500));
    assert_eq!(h.ledger.get_user(&bob).unwrap().cbi_score, 35);
}

#[tokio::test]
async fn test_duplicate_redelivery_applies_once() {
    let h = harness().await;
    let alice = addr("alice");
    let now = Utc::now();

    h.ledger.register_user_at(&alice, now).unwrap();
    let requested = h
        .ledger
        .request_loan_at(&alice, amount(1000), Duration::days(7), now)
        .unwrap();
    let repaid = h
        .ledger
        .repay_loan_at(&alice, 0, now + Duration::days(1))
        .unwrap();

    h.engine.process(&record(1, requested.clone())).await.unwrap();
    h.engine.process(&record(2, repaid.clone())).await.unwrap();

    // Redeliver both; balance, counters, and score must not move again.
    assert_eq!(
        h.engine.process(&record(1, requested)).await.unwrap(),
        Outcome::Duplicate
    );
    assert_eq!(
        h.engine.process(&record(2, repaid)).await.unwrap(),
        Outcome::Duplicate
    );

    assert_eq!(h.pool.balance().await.unwrap(), dec!(10000));
    assert_eq!(h.ledger.get_user(&alice).unwrap().cbi_score, 62);
}

#[tokio::test]
async fn test_insufficient_pool_skips_until_funded() {
    let h = harness().await;
    let alice = addr("alice");
    let now = Utc::now();

    h.ledger.register_user_at(&alice, now).unwrap();
    let requested = h
        .ledger
        .request_loan_at(&alice, amount(50000), Duration::days(7), now)
        .unwrap();

    let out = h.engine.process(&record(1, requested.clone())).await.unwrap();
    assert_eq!(out, Outcome::InsufficientPool { loan_id: 0 });
    assert_eq!(h.pool.balance().await.unwrap(), dec!(10000));

    // The key was left unmarked, so redelivery after a deposit funds it.
    h.pool.deposit(dec!(45000)).await.unwrap();
    let out = h.engine.process(&record(1, requested)).await.unwrap();
    assert_eq!(out, Outcome::PoolDebited { loan_id: 0 });
    assert_eq!(h.pool.balance().await.unwrap(), dec!(5000));
}

#[tokio::test]
async fn test_runner_processes_live_events() {
    let Harness {
        ledger,
        pool,
        engine,
        _dir,
    } = harness().await;
    let engine = Arc::new(engine);

    let alice = addr("alice");
    let bob = addr("bob");
    let now = Utc::now();
    ledger.register_user_at(&alice, now).unwrap();
    ledger.register_user_at(&bob, now).unwrap();

    let events = vec![
        ledger
            .request_loan_at(&alice, amount(1000), Duration::days(7), now)
            .unwrap(),
        ledger
            .request_loan_at(&bob, amount(500), Duration::days(3), now)
            .unwrap(),
        ledger
            .repay_loan_at(&alice, 0, now + Duration::days(1))
            .unwrap(),
    ];

    let bus = EventBus::new(_dir.path().join("journal"));
    let receiver = bus.subscribe();
    let handle = EngineRunner::new(Arc::clone(&engine)).spawn(receiver);

    for (i, event) in events.into_iter().enumerate() {
        assert_eq!(bus.publish(record(i as u64 + 1, event)), 1);
    }

    // Closing the bus lets the dispatcher and its workers drain.
    drop(bus);
    handle.await.unwrap();

    assert_eq!(pool.balance().await.unwrap(), dec!(9500));
    assert_eq!(ledger.get_user(&alice).unwrap().cbi_score, 62);
    assert_eq!(ledger.get_user(&bob).unwrap().cbi_score, 50);
}

/// Fails transiently a configured number of times, then delegates.
struct FlakyWriter {
    inner: LedgerScoreWriter,
    failures_left: AtomicU32,
}

#[async_trait]
impl ScoreWriter for FlakyWriter {
    async fn update_cbi_score(
        &self,
        address: &Address,
        score: i32,
    ) -> Result<ScoreUpdate, WriteBackError> {
        if self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(WriteBackError::Transient("ledger unavailable".into()));
        }
        self.inner.update_cbi_score(address, score).await
    }
}

#[tokio::test]
async fn test_transient_write_back_failures_retry() {
    let dir = TempDir::new().unwrap();
    let ledger = Arc::new(LedgerStore::new(addr("admin"), ScoreBounds::default()));
    let pool = Arc::new(PoolLedger::connect(dir.path().join("pool.db")).await.unwrap());
    pool.deposit(dec!(10000)).await.unwrap();

    let writer = Arc::new(FlakyWriter {
        inner: LedgerScoreWriter::new(Arc::clone(&ledger)),
        failures_left: AtomicU32::new(2),
    });
    let engine = ReconciliationEngine::with_retry(
        Arc::new(InMemoryBehaviorStore::new()),
        Arc::clone(&pool),
        ScoreModel::new(ScoringConfig::default()),
        writer,
        fast_retry(),
    );

    let alice = addr("alice");
    let now = Utc::now();
    ledger.register_user_at(&alice, now).unwrap();
    let requested = ledger
        .request_loan_at(&alice, amount(100), Duration::days(7), now)
        .unwrap();
    let repaid = ledger
        .repay_loan_at(&alice, 0, now + Duration::days(1))
        .unwrap();

    engine.process(&record(1, requested)).await.unwrap();
    engine.process(&record(2, repaid)).await.unwrap();

    // Two transient failures fit inside three attempts.
    assert_eq!(ledger.get_user(&alice).unwrap().cbi_score, 62);
    assert_eq!(engine.pending_len(), 0);
}

#[tokio::test]
async fn test_exhausted_retries_park_then_flush() {
    let dir = TempDir::new().unwrap();
    let ledger = Arc::new(LedgerStore::new(addr("admin"), ScoreBounds::default()));
    let pool = Arc::new(PoolLedger::connect(dir.path().join("pool.db")).await.unwrap());
    pool.deposit(dec!(10000)).await.unwrap();

    let writer = Arc::new(FlakyWriter {
        inner: LedgerScoreWriter::new(Arc::clone(&ledger)),
        failures_left: AtomicU32::new(10),
    });
    let engine = ReconciliationEngine::with_retry(
        Arc::new(InMemoryBehaviorStore::new()),
        Arc::clone(&pool),
        ScoreModel::new(ScoringConfig::default()),
        Arc::clone(&writer) as Arc<dyn ScoreWriter>,
        fast_retry(),
    );

    let alice = addr("alice");
    let now = Utc::now();
    ledger.register_user_at(&alice, now).unwrap();
    let requested = ledger
        .request_loan_at(&alice, amount(100), Duration::days(7), now)
        .unwrap();
    let repaid = ledger
        .repay_loan_at(&alice, 0, now + Duration::days(1))
        .unwrap();

    engine.process(&record(1, requested)).await.unwrap();
    engine.process(&record(2, repaid)).await.unwrap();

    // Score never landed; the update is parked.
    assert_eq!(ledger.get_user(&alice).unwrap().cbi_score, 50);
    assert_eq!(engine.pending_len(), 1);

    // Still failing: flush re-queues.
    assert_eq!(engine.flush_pending().await, 0);
    assert_eq!(engine.pending_len(), 1);

    // Writer recovers: flush drains the queue and the score lands.
    writer.failures_left.store(0, Ordering::SeqCst);
    assert_eq!(engine.flush_pending().await, 1);
    assert_eq!(engine.pending_len(), 0);
    assert_eq!(ledger.get_user(&alice).unwrap().cbi_score, 62);
}

#[tokio::test]
async fn test_rejected_write_back_is_dropped() {
    let h = harness().await;
    let now = Utc::now();
    let alice = addr("alice");

    h.ledger.register_user_at(&alice, now).unwrap();
    let requested = h
        .ledger
        .request_loan_at(&alice, amount(100), Duration::days(7), now)
        .unwrap();
    h.engine.process(&record(1, requested)).await.unwrap();

    // A repayment event for a borrower the ledger no longer knows: the
    // write-back is rejected, not retried.
    let ghost = addr("ghost");
    let repaid = LoanEvent::RepaymentMade {
        loan_id: 0,
        borrower: ghost.clone(),
        amount: amount(100),
        due_date: now + Duration::days(7),
        paid_at: now,
    };
    let out = h.engine.process(&record(2, repaid)).await.unwrap();
    assert_eq!(
        out,
        Outcome::ScoreReconciled {
            address: ghost,
            score: 62
        }
    );
    assert_eq!(h.engine.pending_len(), 0);
}

#[tokio::test]
async fn test_journal_replay_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let journal_dir = dir.path().join("journal");
    let ledger = Arc::new(LedgerStore::new(addr("admin"), ScoreBounds::default()));
    let pool = Arc::new(PoolLedger::connect(dir.path().join("pool.db")).await.unwrap());
    pool.deposit(dec!(10000)).await.unwrap();

    let now = Utc::now();
    let alice = addr("alice");
    let bob = addr("bob");
    {
        let mut journal = EventStore::new(&journal_dir).unwrap();
        ledger.register_user_at(&alice, now).unwrap();
        ledger.register_user_at(&bob, now).unwrap();

        let mut events = Vec::new();
        events.push(
            ledger
                .request_loan_at(&alice, amount(1000), Duration::days(7), now)
                .unwrap(),
        );
        events.push(
            ledger
                .request_loan_at(&bob, amount(500), Duration::days(3), now)
                .unwrap(),
        );
        events.push(
            ledger
                .repay_loan_at(&alice, 0, now + Duration::days(1))
                .unwrap(),
        );
        events.push(
            ledger
                .mark_loan_default_at(&addr("admin"), 1, now + Duration::days(5))
                .unwrap(),
        );
        for event in &events {
            journal.append(event).unwrap();
        }
    }

    let counters = Arc::new(
        SqliteBehaviorStore::connect(dir.path().join("behavior.db"))
            .await
            .unwrap(),
    );
    let engine = ReconciliationEngine::with_retry(
        counters,
        Arc::clone(&pool),
        ScoreModel::new(ScoringConfig::default()),
        Arc::new(LedgerScoreWriter::new(Arc::clone(&ledger))),
        fast_retry(),
    );

    let reader = cbi_events::EventReader::from_directory(&journal_dir).unwrap();
    let summary = engine.replay(&reader).await.unwrap();
    assert_eq!(summary.processed, 4);
    assert_eq!(summary.skipped, 0);

    assert_eq!(pool.balance().await.unwrap(), dec!(9500));
    assert_eq!(ledger.get_user(&alice).unwrap().cbi_score, 62);
    assert_eq!(ledger.get_user(&bob).unwrap().cbi_score, 35);

    // Second replay skips everything via the cursor.
    let summary = engine.replay(&reader).await.unwrap();
    assert_eq!(summary.processed, 0);
    assert_eq!(summary.skipped, 4);
    assert_eq!(pool.balance().await.unwrap(), dec!(9500));
    assert_eq!(ledger.get_user(&alice).unwrap().cbi_score, 62);
}

#[tokio::test]
async fn test_replay_revisits_unfunded_loan_after_deposit() {
    let dir = TempDir::new().unwrap();
    let journal_dir = dir.path().join("journal");
    let ledger = Arc::new(LedgerStore::new(addr("admin"), ScoreBounds::default()));
    let pool = Arc::new(PoolLedger::connect(dir.path().join("pool.db")).await.unwrap());
    pool.deposit(dec!(100)).await.unwrap();

    let now = Utc::now();
    let alice = addr("alice");
    let bob = addr("bob");
    {
        let mut journal = EventStore::new(&journal_dir).unwrap();
        journal
            .append(&ledger.register_user_at(&alice, now).unwrap())
            .unwrap();
        journal
            .append(&ledger.register_user_at(&bob, now).unwrap())
            .unwrap();
        journal
            .append(
                &ledger
                    .request_loan_at(&alice, amount(1000), Duration::days(7), now)
                    .unwrap(),
            )
            .unwrap();
        journal
            .append(
                &ledger
                    .request_loan_at(&bob, amount(50), Duration::days(7), now)
                    .unwrap(),
            )
            .unwrap();
    }

    let counters = Arc::new(
        SqliteBehaviorStore::connect(dir.path().join("behavior.db"))
            .await
            .unwrap(),
    );
    let engine = ReconciliationEngine::with_retry(
        counters,
        Arc::clone(&pool),
        ScoreModel::new(ScoringConfig::default()),
        Arc::new(LedgerScoreWriter::new(Arc::clone(&ledger))),
        fast_retry(),
    );

    // First pass funds only the small loan; the cursor must hold below the
    // unfunded one even though a later event was processed.
    let reader = cbi_events::EventReader::from_directory(&journal_dir).unwrap();
    engine.replay(&reader).await.unwrap();
    assert_eq!(pool.balance().await.unwrap(), dec!(50));

    pool.deposit(dec!(5000)).await.unwrap();

    // Second pass revisits the unfunded loan and dedups the funded one.
    let summary = engine.replay(&reader).await.unwrap();
    assert_eq!(summary.skipped, 2);
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.duplicates, 1);
    assert_eq!(pool.balance().await.unwrap(), dec!(4050));

    // Third pass skips everything.
    let summary = engine.replay(&reader).await.unwrap();
    assert_eq!(summary.skipped, 4);
    assert_eq!(pool.balance().await.unwrap(), dec!(4050));
}

#[tokio::test]
async fn test_cursor_advances_only_during_replay() {
    let dir = TempDir::new().unwrap();
    let journal_dir = dir.path().join("journal");
    let ledger = Arc::new(LedgerStore::new(addr("admin"), ScoreBounds::default()));
    let pool = Arc::new(PoolLedger::connect(dir.path().join("pool.db")).await.unwrap());
    pool.deposit(dec!(10000)).await.unwrap();

    let counters = Arc::new(InMemoryBehaviorStore::new());
    let engine = ReconciliationEngine::with_retry(
        Arc::clone(&counters) as Arc<dyn BehaviorCounterStore>,
        Arc::clone(&pool),
        ScoreModel::new(ScoringConfig::default()),
        Arc::new(LedgerScoreWriter::new(Arc::clone(&ledger))),
        fast_retry(),
    );

    let now = Utc::now();
    let alice = addr("alice");
    ledger.register_user_at(&alice, now).unwrap();
    let requested = ledger
        .request_loan_at(&alice, amount(1000), Duration::days(7), now)
        .unwrap();
    let repaid = ledger
        .repay_loan_at(&alice, 0, now + Duration::days(1))
        .unwrap();
    {
        let mut journal = EventStore::new(&journal_dir).unwrap();
        journal.append(&requested).unwrap();
        journal.append(&repaid).unwrap();
    }

    // Live processing applies the effects but leaves the cursor alone.
    engine.process(&record(1, requested)).await.unwrap();
    engine.process(&record(2, repaid)).await.unwrap();
    assert_eq!(counters.last_processed_sequence(), None);
    assert_eq!(ledger.get_user(&alice).unwrap().cbi_score, 62);

    // The startup replay dedups everything and advances the cursor.
    let reader = cbi_events::EventReader::from_directory(&journal_dir).unwrap();
    let summary = engine.replay(&reader).await.unwrap();
    assert_eq!(summary.duplicates, 2);
    assert_eq!(summary.processed, 0);
    assert_eq!(counters.last_processed_sequence(), Some(2));
    assert_eq!(pool.balance().await.unwrap(), dec!(10000));
}

/// Delegates to an in-memory store, but counter reads for one borrower fail.
struct FailingCounterStore {
    inner: InMemoryBehaviorStore,
    fail_for: Address,
}

#[async_trait]
impl BehaviorCounterStore for FailingCounterStore {
    async fn counters(&self, address: &Address) -> Result<BehaviorCounters, EngineError> {
        if address == &self.fail_for {
            return Err(EngineError::Database(sqlx::Error::PoolClosed));
        }
        self.inner.counters(address).await
    }

    async fn apply(
        &self,
        address: &Address,
        key: EventKey,
        update: CounterUpdate,
    ) -> Result<Option<BehaviorCounters>, EngineError> {
        self.inner.apply(address, key, update).await
    }

    fn last_processed_sequence(&self) -> Option<u64> {
        self.inner.last_processed_sequence()
    }

    async fn record_sequence(&self, sequence: u64) -> Result<(), EngineError> {
        self.inner.record_sequence(sequence).await
    }
}

#[tokio::test]
async fn test_flush_keeps_remaining_updates_when_store_fails() {
    let dir = TempDir::new().unwrap();
    let ledger = Arc::new(LedgerStore::new(addr("admin"), ScoreBounds::default()));
    let pool = Arc::new(PoolLedger::connect(dir.path().join("pool.db")).await.unwrap());
    pool.deposit(dec!(10000)).await.unwrap();

    let alice = addr("alice");
    let bob = addr("bob");
    let writer = Arc::new(FlakyWriter {
        inner: LedgerScoreWriter::new(Arc::clone(&ledger)),
        failures_left: AtomicU32::new(6),
    });
    let engine = ReconciliationEngine::with_retry(
        Arc::new(FailingCounterStore {
            inner: InMemoryBehaviorStore::new(),
            fail_for: alice.clone(),
        }),
        Arc::clone(&pool),
        ScoreModel::new(ScoringConfig::default()),
        writer,
        fast_retry(),
    );

    let now = Utc::now();
    ledger.register_user_at(&alice, now).unwrap();
    ledger.register_user_at(&bob, now).unwrap();
    let events = vec![
        ledger
            .request_loan_at(&alice, amount(100), Duration::days(7), now)
            .unwrap(),
        ledger
            .request_loan_at(&bob, amount(100), Duration::days(7), now)
            .unwrap(),
        ledger
            .repay_loan_at(&alice, 0, now + Duration::days(1))
            .unwrap(),
        ledger
            .repay_loan_at(&bob, 1, now + Duration::days(1))
            .unwrap(),
    ];
    for (i, event) in events.into_iter().enumerate() {
        engine.process(&record(i as u64 + 1, event)).await.unwrap();
    }

    // Six transient failures exhaust three attempts for each borrower.
    assert_eq!(engine.pending_len(), 2);

    // The writer has recovered, but counter reads for one borrower still
    // fail: the other flushes, the failing one stays queued.
    assert_eq!(engine.flush_pending().await, 1);
    assert_eq!(engine.pending_len(), 1);
    assert_eq!(ledger.get_user(&bob).unwrap().cbi_score, 62);
    assert_eq!(ledger.get_user(&alice).unwrap().cbi_score, 50);
}
