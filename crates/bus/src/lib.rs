//! CBI Event Bus - In-process async event distribution
//!
//! Stands in for the external ledger's event feed. Delivery to subscribers
//! is at-least-once: live distribution uses a tokio broadcast channel (which
//! may lag and drop under backpressure), and the journal can be replayed
//! into a subscriber at any time. Subscribers must therefore be idempotent.
//!
//! No retention in the bus itself - events live only in the JSONL journal.

pub mod channel;
pub mod error;
pub mod subscriber;

pub use channel::EventBus;
pub use error::BusError;
pub use subscriber::EventSubscriber;
