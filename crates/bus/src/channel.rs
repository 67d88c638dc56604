//! Broadcast channel wrapper with journal replay

use crate::error::BusError;
use crate::subscriber::EventSubscriber;
use cbi_events::{EventReader, EventRecord};
use std::path::{Path, PathBuf};
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 1024;

/// Event bus distributing journaled events to subscribers.
///
/// Live events go through a broadcast channel; historical catch-up goes
/// through `replay_into`, reading the journal directly.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EventRecord>,
    journal_path: PathBuf,
}

impl EventBus {
    /// Create a new bus over the given journal directory.
    pub fn new(journal_path: impl AsRef<Path>) -> Self {
        Self::with_capacity(journal_path, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(journal_path: impl AsRef<Path>, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            journal_path: journal_path.as_ref().to_path_buf(),
        }
    }

    /// Publish a journaled event to live subscribers.
    ///
    /// Returns the number of subscribers that received it. Zero subscribers
    /// is not an error - the journal already holds the record.
    pub fn publish(&self, record: EventRecord) -> usize {
        match self.sender.send(record) {
            Ok(receivers) => receivers,
            Err(_) => {
                tracing::trace!("no live subscribers, event journaled only");
                0
            }
        }
    }

    /// Subscribe to live events.
    pub fn subscribe(&self) -> broadcast::Receiver<EventRecord> {
        self.sender.subscribe()
    }

    /// Get a journal reader for replay.
    pub fn reader(&self) -> Result<EventReader, BusError> {
        Ok(EventReader::from_directory(&self.journal_path)?)
    }

    /// Get the journal path.
    pub fn journal_path(&self) -> &Path {
        &self.journal_path
    }

    /// Replay the journal into a subscriber, skipping records at or below
    /// its last processed sequence. Returns the number of records handled.
    pub async fn replay_into(&self, subscriber: &dyn EventSubscriber) -> Result<usize, BusError> {
        let records = self.reader()?.read_all()?;
        let skip_through = subscriber.last_processed_sequence().unwrap_or(0);

        subscriber.on_replay_start().await?;

        let mut handled = 0;
        for record in &records {
            if record.sequence <= skip_through {
                continue;
            }
            subscriber.handle(record).await?;
            handled += 1;
        }

        subscriber.on_replay_complete().await?;

        tracing::debug!(
            subscriber = subscriber.name(),
            handled,
            skipped = records.len() - handled,
            "journal replay complete"
        );
        Ok(handled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cbi_core::Address;
    use cbi_ledger::LoanEvent;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn record(sequence: u64) -> EventRecord {
        EventRecord {
            sequence,
            recorded_at: chrono::Utc::now(),
            event: LoanEvent::UserRegistered {
                address: Address::new("alice").unwrap(),
                registered_at: chrono::Utc::now(),
            },
        }
    }

    struct Counting {
        seen: AtomicUsize,
    }

    #[async_trait]
    impl EventSubscriber for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        async fn handle(&self, _record: &EventRecord) -> Result<(), BusError> {
            self.seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let dir = tempfile::TempDir::new().unwrap();
        let bus = EventBus::new(dir.path());

        let mut rx = bus.subscribe();
        assert_eq!(bus.publish(record(1)), 1);

        let received = rx.recv().await.unwrap();
        assert_eq!(received.sequence, 1);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let dir = tempfile::TempDir::new().unwrap();
        let bus = EventBus::new(dir.path());
        assert_eq!(bus.publish(record(1)), 0);
    }

    #[tokio::test]
    async fn test_replay_into_empty_journal() {
        let dir = tempfile::TempDir::new().unwrap();
        let bus = EventBus::new(dir.path());
        let sub = Counting {
            seen: AtomicUsize::new(0),
        };
        assert_eq!(bus.replay_into(&sub).await.unwrap(), 0);
    }
}
