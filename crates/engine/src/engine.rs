//! ReconciliationEngine - event-driven pool and score reconciliation
//!
//! Consumes journaled lifecycle events and drives three downstream effects:
//! pool balance movement on loan issue/repayment, behavior counter
//! accumulation, and recomputed CBI score write-back to the ledger. Delivery
//! is at-least-once; idempotency keys in the pool and counter stores make
//! every effect apply exactly once.

use crate::error::EngineError;
use crate::retry::RetryPolicy;
use crate::store::{BehaviorCounterStore, CounterUpdate};
use crate::writeback::ScoreWriter;
use async_trait::async_trait;
use cbi_bus::{BusError, EventSubscriber};
use cbi_core::Address;
use cbi_events::{EventReader, EventRecord};
use cbi_ledger::{LoanEvent, LoanId};
use cbi_pool::{PoolApply, PoolError, PoolLedger};
use cbi_scoring::{RepaymentTiming, ScoreModel};
use std::sync::{Arc, Mutex, MutexGuard};

/// What processing one event did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Loan issuance debited the pool.
    PoolDebited { loan_id: LoanId },
    /// Counters updated and a score recomputed for the borrower.
    ScoreReconciled { address: Address, score: i32 },
    /// Event key already applied; nothing changed.
    Duplicate,
    /// Pool balance too low to fund the loan. The key stays unmarked and the
    /// replay cursor halts below this record, so a later replay after a
    /// deposit can fund it.
    InsufficientPool { loan_id: LoanId },
    /// Observability-only event, nothing to reconcile.
    Observed,
}

/// A borrower whose score write-back exhausted its retries.
///
/// Only the address is parked: the flush recomputes the score from current
/// counters, so a stale parked value can never overwrite a newer write.
#[derive(Debug, Clone)]
pub struct PendingUpdate {
    pub address: Address,
    pub attempts: u32,
}

/// Totals from a journal replay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub processed: usize,
    pub duplicates: usize,
    pub skipped: usize,
}

/// The reconciliation engine.
///
/// `process` is safe to call concurrently for different borrowers; callers
/// must serialize events for the same borrower (see `EngineRunner`).
pub struct ReconciliationEngine {
    counters: Arc<dyn BehaviorCounterStore>,
    pool: Arc<PoolLedger>,
    model: ScoreModel,
    writer: Arc<dyn ScoreWriter>,
    retry: RetryPolicy,
    pending: Mutex<Vec<PendingUpdate>>,
}

impl ReconciliationEngine {
    pub fn new(
        counters: Arc<dyn BehaviorCounterStore>,
        pool: Arc<PoolLedger>,
        model: ScoreModel,
        writer: Arc<dyn ScoreWriter>,
    ) -> Self {
        Self::with_retry(counters, pool, model, writer, RetryPolicy::default())
    }

    pub fn with_retry(
        counters: Arc<dyn BehaviorCounterStore>,
        pool: Arc<PoolLedger>,
        model: ScoreModel,
        writer: Arc<dyn ScoreWriter>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            counters,
            pool,
            model,
            writer,
            retry,
            pending: Mutex::new(Vec::new()),
        }
    }

    fn pending_lock(&self) -> MutexGuard<'_, Vec<PendingUpdate>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of score updates waiting in the pending queue.
    pub fn pending_len(&self) -> usize {
        self.pending_lock().len()
    }

    /// Process one journaled event.
    ///
    /// Does not advance the journal cursor; only the sequential `replay`
    /// path does. Live processing runs out of journal order across
    /// borrowers, and a cursor that jumps ahead would hide unprocessed
    /// records from the next replay.
    pub async fn process(&self, record: &EventRecord) -> Result<Outcome, EngineError> {
        let outcome = match &record.event {
            LoanEvent::LoanRequested {
                loan_id, amount, ..
            } => match self.pool.on_loan_issued(*loan_id, *amount).await {
                Ok(PoolApply::Applied) => Outcome::PoolDebited { loan_id: *loan_id },
                Ok(PoolApply::Duplicate) => Outcome::Duplicate,
                Err(PoolError::InsufficientBalance {
                    available,
                    required,
                }) => {
                    tracing::error!(
                        loan_id,
                        %available,
                        %required,
                        "ALARM: pool cannot fund loan, skipping until redelivery"
                    );
                    Outcome::InsufficientPool { loan_id: *loan_id }
                }
                Err(err) => return Err(err.into()),
            },

            LoanEvent::RepaymentMade {
                loan_id,
                borrower,
                amount,
                due_date,
                paid_at,
            } => {
                // Pool credit and counter update dedup independently, so a
                // crash between the two heals on redelivery.
                self.pool.on_repayment_received(*loan_id, *amount).await?;

                let timing = RepaymentTiming::classify(*paid_at, *due_date);
                let update = CounterUpdate::Repayment(timing);
                match self.reconcile(borrower, record, update).await? {
                    Some(score) => Outcome::ScoreReconciled {
                        address: borrower.clone(),
                        score,
                    },
                    None => Outcome::Duplicate,
                }
            }

            LoanEvent::LoanDefaulted { borrower, .. } => {
                match self
                    .reconcile(borrower, record, CounterUpdate::Missed)
                    .await?
                {
                    Some(score) => Outcome::ScoreReconciled {
                        address: borrower.clone(),
                        score,
                    },
                    None => Outcome::Duplicate,
                }
            }

            LoanEvent::UserRegistered { .. }
            | LoanEvent::CbiScoreUpdated { .. }
            | LoanEvent::UserBlacklisted { .. } => Outcome::Observed,
        };

        Ok(outcome)
    }

    /// Update counters under the event's key, recompute, and write back.
    ///
    /// Returns the recomputed score, or None for a duplicate key.
    async fn reconcile(
        &self,
        borrower: &Address,
        record: &EventRecord,
        update: CounterUpdate,
    ) -> Result<Option<i32>, EngineError> {
        let Some(key) = record.event.key() else {
            return Ok(None);
        };

        let Some(counters) = self.counters.apply(borrower, key, update).await? else {
            tracing::debug!(key = %key, borrower = %borrower, "duplicate delivery discarded");
            return Ok(None);
        };

        let score = self.model.score(&counters);
        tracing::info!(
            borrower = %borrower,
            event = record.event.name(),
            score,
            "behavior counters updated"
        );

        self.write_back(borrower, score).await;
        Ok(Some(score))
    }

    /// Write a score with bounded exponential backoff.
    ///
    /// Transient failures retry up to the policy's attempt limit, then park
    /// the update in the pending queue. Rejections are logged and dropped.
    async fn write_back(&self, address: &Address, score: i32) {
        for attempt in 0..self.retry.max_attempts {
            match self.writer.update_cbi_score(address, score).await {
                Ok(update) => {
                    tracing::info!(
                        address = %address,
                        old_score = update.old_score,
                        new_score = update.new_score,
                        "cbi score written back"
                    );
                    return;
                }
                Err(err) if err.is_transient() => {
                    let delay = self.retry.backoff(attempt);
                    tracing::warn!(
                        address = %address,
                        score,
                        attempt = attempt + 1,
                        ?delay,
                        error = %err,
                        "transient write-back failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    tracing::error!(
                        address = %address,
                        score,
                        error = %err,
                        "score write-back rejected, dropping"
                    );
                    return;
                }
            }
        }

        tracing::error!(
            address = %address,
            score,
            attempts = self.retry.max_attempts,
            "write-back retries exhausted, queued as pending"
        );
        let mut pending = self.pending_lock();
        if !pending.iter().any(|p| &p.address == address) {
            pending.push(PendingUpdate {
                address: address.clone(),
                attempts: self.retry.max_attempts,
            });
        }
    }

    /// Retry every parked write-back once, recomputing each score from the
    /// current counters. Borrowers that fail transiently again, or whose
    /// counters cannot be read, are re-queued. Returns the number
    /// successfully written.
    pub async fn flush_pending(&self) -> usize {
        let queued = std::mem::take(&mut *self.pending_lock());
        if queued.is_empty() {
            return 0;
        }

        let mut written = 0;
        for update in queued {
            let counters = match self.counters.counters(&update.address).await {
                Ok(counters) => counters,
                Err(err) => {
                    tracing::warn!(
                        address = %update.address,
                        error = %err,
                        "counter store unavailable, keeping update queued"
                    );
                    self.pending_lock().push(PendingUpdate {
                        attempts: update.attempts + 1,
                        ..update
                    });
                    continue;
                }
            };
            let score = self.model.score(&counters);
            match self.writer.update_cbi_score(&update.address, score).await {
                Ok(_) => {
                    tracing::info!(address = %update.address, score, "pending write-back flushed");
                    written += 1;
                }
                Err(err) if err.is_transient() => {
                    tracing::warn!(address = %update.address, error = %err, "pending write-back still failing");
                    self.pending_lock().push(PendingUpdate {
                        attempts: update.attempts + 1,
                        ..update
                    });
                }
                Err(err) => {
                    tracing::error!(address = %update.address, error = %err, "pending write-back rejected, dropping");
                }
            }
        }
        written
    }

    /// Replay the journal through the engine, skipping records at or below
    /// the counter store's cursor. Safe to run repeatedly: stores dedup by
    /// event key, so reprocessing converges to the same state.
    ///
    /// This is the only path that advances the cursor. Advancement is
    /// contiguous and stops below the first unfunded loan, so every later
    /// replay revisits it until the pool can cover the debit.
    pub async fn replay(&self, reader: &EventReader) -> Result<ReplaySummary, EngineError> {
        let records = reader.read_all()?;
        let skip_through = self.counters.last_processed_sequence().unwrap_or(0);

        let mut summary = ReplaySummary::default();
        let mut cursor_open = true;
        for record in &records {
            if record.sequence <= skip_through {
                summary.skipped += 1;
                continue;
            }
            let outcome = self.process(record).await?;
            match outcome {
                Outcome::Duplicate => summary.duplicates += 1,
                _ => summary.processed += 1,
            }
            if matches!(outcome, Outcome::InsufficientPool { .. }) {
                cursor_open = false;
            }
            if cursor_open {
                self.counters.record_sequence(record.sequence).await?;
            }
        }

        tracing::info!(
            processed = summary.processed,
            duplicates = summary.duplicates,
            skipped = summary.skipped,
            "journal replay complete"
        );
        Ok(summary)
    }
}

#[async_trait]
impl EventSubscriber for ReconciliationEngine {
    fn name(&self) -> &str {
        "reconciliation-engine"
    }

    async fn handle(&self, record: &EventRecord) -> Result<(), BusError> {
        self.process(record)
            .await
            .map(|_| ())
            .map_err(|err| BusError::SubscriberFailed {
                name: self.name().to_string(),
                reason: err.to_string(),
            })
    }

    fn last_processed_sequence(&self) -> Option<u64> {
        self.counters.last_processed_sequence()
    }
}
