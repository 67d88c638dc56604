//! Event subscriber trait for async event handling

use crate::error::BusError;
use async_trait::async_trait;
use cbi_events::EventRecord;

/// Trait for event subscribers.
///
/// Subscribers receive journaled events from the bus and process them
/// asynchronously. Delivery is at-least-once, so every subscriber MUST
/// handle duplicate records gracefully.
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    /// Subscriber name (for logging)
    fn name(&self) -> &str;

    /// Handle one journaled event.
    async fn handle(&self, record: &EventRecord) -> Result<(), BusError>;

    /// Called when replay starts (optional)
    async fn on_replay_start(&self) -> Result<(), BusError> {
        Ok(())
    }

    /// Called when replay completes (optional)
    async fn on_replay_complete(&self) -> Result<(), BusError> {
        Ok(())
    }

    /// Last processed journal sequence, for replay skipping.
    ///
    /// Returns None if the subscriber doesn't track sequence numbers.
    fn last_processed_sequence(&self) -> Option<u64> {
        None
    }
}
