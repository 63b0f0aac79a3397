//! Types shared by every part of the queue processor: the queued message
//! record, encoded-word helpers, run settings and logging setup.

pub mod config;
pub mod encoding;
pub mod logging;
pub mod message;

pub use message::{
    DeliveryOutcome, MessageId, MessageParameters, QueuedMessage, Recipient, RecipientKind,
};
pub use tracing;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
    Finalised,
}
