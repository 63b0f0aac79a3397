//! Queue stores: where pending messages live until a pass picks them up.

pub mod backends;
pub mod config;
pub mod error;
pub mod store;

pub use backends::{FileQueueStore, MemoryQueueStore};
pub use config::SpoolConfig;
pub use error::{Result, SerializationError, SpoolError};
pub use store::QueueStore;
