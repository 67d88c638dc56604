//! Live event consumption with per-borrower serialization
//!
//! One dispatcher task reads the broadcast channel and routes each record to
//! a per-borrower worker over an mpsc channel. Workers process sequentially,
//! so events for one borrower reconcile in journal order while different
//! borrowers proceed in parallel.

use crate::engine::ReconciliationEngine;
use cbi_core::Address;
use cbi_events::EventRecord;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

const WORKER_QUEUE_DEPTH: usize = 256;

/// Drives a `ReconciliationEngine` from a live event bus subscription.
pub struct EngineRunner {
    engine: Arc<ReconciliationEngine>,
}

impl EngineRunner {
    pub fn new(engine: Arc<ReconciliationEngine>) -> Self {
        Self { engine }
    }

    /// Spawn the dispatcher. The returned handle resolves when the bus
    /// closes and every worker has drained.
    pub fn spawn(self, receiver: broadcast::Receiver<EventRecord>) -> JoinHandle<()> {
        tokio::spawn(self.run(receiver))
    }

    async fn run(self, mut receiver: broadcast::Receiver<EventRecord>) {
        let mut workers: HashMap<Address, mpsc::Sender<EventRecord>> = HashMap::new();
        let mut handles = Vec::new();

        loop {
            match receiver.recv().await {
                Ok(record) => {
                    let Some(borrower) = record.event.borrower().cloned() else {
                        continue;
                    };
                    let sender = workers
                        .entry(borrower.clone())
                        .or_insert_with(|| {
                            let (tx, rx) = mpsc::channel(WORKER_QUEUE_DEPTH);
                            handles.push(Self::spawn_worker(
                                Arc::clone(&self.engine),
                                borrower.clone(),
                                rx,
                            ));
                            tx
                        })
                        .clone();
                    if sender.send(record).await.is_err() {
                        tracing::error!(borrower = %borrower, "worker channel closed unexpectedly");
                        workers.remove(&borrower);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    // At-least-once delivery is restored by the next journal
                    // replay; live processing just resumes.
                    tracing::warn!(missed, "event bus lagged, records missed live");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }

        drop(workers);
        for handle in handles {
            let _ = handle.await;
        }
        tracing::debug!("engine runner stopped");
    }

    fn spawn_worker(
        engine: Arc<ReconciliationEngine>,
        borrower: Address,
        mut receiver: mpsc::Receiver<EventRecord>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(record) = receiver.recv().await {
                if let Err(err) = engine.process(&record).await {
                    tracing::error!(
                        borrower = %borrower,
                        sequence = record.sequence,
                        event = record.event.name(),
                        error = %err,
                        "event processing failed"
                    );
                }
            }
        })
    }
}
