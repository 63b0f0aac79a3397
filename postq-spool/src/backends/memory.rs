use std::{
    collections::BTreeMap,
    sync::{Arc, RwLock},
};

use async_trait::async_trait;
use postq_common::{MessageId, QueuedMessage};

use crate::{SpoolError, store::QueueStore};

/// In-memory queue store
///
/// Messages live in a `BTreeMap` keyed by id, so iteration order is enqueue
/// order. Intended for tests and for transient queues that do not need to
/// survive a restart.
///
/// An optional capacity limits the number of stored records; `enqueue` fails
/// once it is reached. Updates never count against the limit.
#[derive(Debug, Clone, Default)]
pub struct MemoryQueueStore {
    messages: Arc<RwLock<BTreeMap<MessageId, QueuedMessage>>>,
    capacity: Option<usize>,
}

impl MemoryQueueStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            messages: Arc::default(),
            capacity: Some(capacity),
        }
    }

    /// Number of stored messages, processed or not
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub const fn capacity(&self) -> Option<usize> {
        self.capacity
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn enqueue(&self, message: &mut QueuedMessage) -> crate::Result<MessageId> {
        let mut messages = self.messages.write()?;

        if let Some(cap) = self.capacity
            && messages.len() >= cap
        {
            return Err(SpoolError::Internal(format!(
                "Memory queue capacity exceeded: {}/{cap} messages",
                messages.len()
            )));
        }

        let id = MessageId::generate();
        message.id = Some(id.clone());
        messages.insert(id.clone(), message.clone());

        Ok(id)
    }

    async fn pending(&self, limit: usize) -> crate::Result<Vec<QueuedMessage>> {
        Ok(self
            .messages
            .read()?
            .values()
            .filter(|message| message.is_pending())
            .take(limit)
            .cloned()
            .collect())
    }

    async fn read(&self, id: &MessageId) -> crate::Result<QueuedMessage> {
        self.messages
            .read()?
            .get(id)
            .cloned()
            .ok_or_else(|| SpoolError::NotFound(id.clone()))
    }

    async fn update(&self, message: &QueuedMessage) -> crate::Result<()> {
        let id = message.id.as_ref().ok_or(SpoolError::MissingId)?;
        let mut messages = self.messages.write()?;

        match messages.get_mut(id) {
            Some(stored) => {
                *stored = message.clone();
                Ok(())
            }
            None => Err(SpoolError::NotFound(id.clone())),
        }
    }

    async fn list(&self) -> crate::Result<Vec<MessageId>> {
        Ok(self.messages.read()?.keys().cloned().collect())
    }

    async fn delete(&self, id: &MessageId) -> crate::Result<()> {
        self.messages
            .write()?
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| SpoolError::NotFound(id.clone()))
    }
}
