use async_trait::async_trait;
use postq_common::{MessageId, QueuedMessage};

/// Storage for queued messages
///
/// A pass reads one page of pending records with [`QueueStore::pending`] and
/// writes each processed record back with [`QueueStore::update`]. Producers
/// add records with [`QueueStore::enqueue`].
#[async_trait]
pub trait QueueStore: Send + Sync + std::fmt::Debug {
    /// Assign a fresh id to `message` and persist it
    async fn enqueue(&self, message: &mut QueuedMessage) -> crate::Result<MessageId>;

    /// The first page of unprocessed messages, at most `limit` of them, oldest first
    async fn pending(&self, limit: usize) -> crate::Result<Vec<QueuedMessage>>;

    /// Read a single message
    async fn read(&self, id: &MessageId) -> crate::Result<QueuedMessage>;

    /// Replace the stored copy of `message`. Writing the same record twice is harmless.
    async fn update(&self, message: &QueuedMessage) -> crate::Result<()>;

    /// Ids of every stored message, oldest first
    async fn list(&self) -> crate::Result<Vec<MessageId>>;

    async fn delete(&self, id: &MessageId) -> crate::Result<()>;
}
