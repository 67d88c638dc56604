//! Application context - wires everything together

use async_trait::async_trait;
use cbi_bus::EventBus;
use cbi_core::{Address, ScoreBounds};
use cbi_engine::{ScoreUpdate, ScoreWriter, WriteBackError};
use cbi_events::{EventError, EventReader, EventRecord, EventStore};
use cbi_ledger::{LedgerError, LedgerStore, LoanEvent};
use cbi_pool::PoolLedger;
use cbi_scoring::ScoringConfig;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Application context - the ledger rebuilt from the journal, plus the
/// journal writer, bus, pool, and scoring configuration.
pub struct AppContext {
    pub ledger: Arc<LedgerStore>,
    pub bus: EventBus,
    pub pool: Arc<PoolLedger>,
    pub scoring: ScoringConfig,
    journal: Arc<Mutex<EventStore>>,
    journal_path: PathBuf,
    behavior_path: PathBuf,
}

impl AppContext {
    /// Create a new application context.
    ///
    /// Ledger state is the journal replayed: every mutating command goes
    /// through `commit`, so reopening the same data directory reconstructs
    /// exactly the state the last process left behind.
    pub async fn new(data_path: impl AsRef<Path>, admin: &str) -> Result<Self, anyhow::Error> {
        let data_path = data_path.as_ref();
        let journal_path = data_path.join("journal");
        let pool_path = data_path.join("pool.db");
        let behavior_path = data_path.join("behavior.db");
        let scoring_path = data_path.join("scoring.json");

        std::fs::create_dir_all(&journal_path)?;

        let scoring = if scoring_path.exists() {
            ScoringConfig::from_file(&scoring_path)?
        } else {
            ScoringConfig::default()
        };

        let journal = EventStore::new(&journal_path)?;
        let bus = EventBus::new(&journal_path);
        let ledger = Arc::new(LedgerStore::new(Address::new(admin)?, scoring.bounds));

        // Rebuild ledger state from the journal.
        let records = EventReader::from_directory(&journal_path)?.read_all()?;
        let applied = ledger.replay(records.iter().map(|r| &r.event));
        tracing::debug!(applied, "ledger state rebuilt from journal");

        let pool = Arc::new(PoolLedger::connect(&pool_path).await?);

        Ok(Self {
            ledger,
            bus,
            pool,
            scoring,
            journal: Arc::new(Mutex::new(journal)),
            journal_path,
            behavior_path,
        })
    }

    /// Run a ledger operation, then journal and publish its event.
    ///
    /// Flow: validate + mutate (inside the ledger) → append → publish. A
    /// rejected operation journals nothing.
    pub fn apply(
        &self,
        op: impl FnOnce(&LedgerStore) -> Result<LoanEvent, LedgerError>,
    ) -> Result<EventRecord, CommitError> {
        let event = op(&self.ledger)?;
        self.commit(event)
    }

    /// Journal a committed ledger event and publish it on the bus.
    ///
    /// The ledger has already applied the event; this makes it durable and
    /// visible to subscribers.
    pub fn commit(&self, event: LoanEvent) -> Result<EventRecord, CommitError> {
        let record = lock_journal(&self.journal).append(&event)?;
        self.bus.publish(record.clone());
        Ok(record)
    }

    /// A score writer that applies write-backs to this context's ledger and
    /// journals the resulting `CbiScoreUpdated` events.
    pub fn score_writer(&self) -> AppScoreWriter {
        AppScoreWriter {
            ledger: Arc::clone(&self.ledger),
            admin: self.ledger.admin().clone(),
            journal: Arc::clone(&self.journal),
            bus: self.bus.clone(),
        }
    }

    pub fn journal_path(&self) -> &Path {
        &self.journal_path
    }

    pub fn behavior_path(&self) -> &Path {
        &self.behavior_path
    }

    pub fn bounds(&self) -> ScoreBounds {
        self.scoring.bounds
    }

    /// Sequence of the last journaled event, 0 when empty.
    pub fn last_sequence(&self) -> u64 {
        lock_journal(&self.journal).last_sequence()
    }
}

fn lock_journal(journal: &Mutex<EventStore>) -> MutexGuard<'_, EventStore> {
    journal.lock().unwrap_or_else(|e| e.into_inner())
}

/// Score writer backed by the live application context.
///
/// A write-back that would not change the stored score is skipped, so
/// reconciliation re-runs don't flood the journal with no-op updates.
pub struct AppScoreWriter {
    ledger: Arc<LedgerStore>,
    admin: Address,
    journal: Arc<Mutex<EventStore>>,
    bus: EventBus,
}

#[async_trait]
impl ScoreWriter for AppScoreWriter {
    async fn update_cbi_score(
        &self,
        address: &Address,
        score: i32,
    ) -> Result<ScoreUpdate, WriteBackError> {
        if let Some(user) = self.ledger.get_user(address) {
            if user.cbi_score == score {
                return Ok(ScoreUpdate {
                    old_score: score,
                    new_score: score,
                });
            }
        }

        let event = self.ledger.update_cbi_score(&self.admin, address, score)?;
        let (old_score, new_score) = match &event {
            LoanEvent::CbiScoreUpdated {
                old_score,
                new_score,
                ..
            } => (*old_score, *new_score),
            _ => {
                return Err(WriteBackError::Transient(
                    "ledger returned an unexpected event for a score update".into(),
                ))
            }
        };

        let record = lock_journal(&self.journal)
            .append(&event)
            .map_err(|e| WriteBackError::Transient(e.to_string()))?;
        self.bus.publish(record);

        Ok(ScoreUpdate {
            old_score,
            new_score,
        })
    }
}

/// Errors during commit
#[derive(Debug, thiserror::Error)]
pub enum CommitError {
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Event store error: {0}")]
    Event(#[from] EventError),
}
