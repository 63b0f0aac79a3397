use std::sync::Arc;

use serde::Deserialize;

use crate::{FileQueueStore, MemoryQueueStore, QueueStore};

/// Which queue store backs the processor
///
/// File-backed store:
/// ```ron
/// spool: File((
///     path: "/var/spool/postq",
/// )),
/// ```
///
/// Memory-backed store, optionally bounded:
/// ```ron
/// spool: Memory((
///     capacity: Some(1000),
/// )),
/// ```
#[derive(Debug, Clone, Deserialize)]
pub enum SpoolConfig {
    File(FileQueueStore),
    Memory(MemoryConfig),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MemoryConfig {
    /// Maximum number of stored messages, unlimited when absent
    #[serde(default)]
    pub capacity: Option<usize>,
}

impl Default for SpoolConfig {
    fn default() -> Self {
        Self::File(FileQueueStore::default())
    }
}

impl SpoolConfig {
    /// Filesystem path for file-backed stores
    #[must_use]
    pub fn path(&self) -> Option<&std::path::Path> {
        match self {
            Self::File(store) => Some(store.path()),
            Self::Memory(_) => None,
        }
    }

    /// Build the configured store, creating the spool directory when needed
    pub fn into_store(self) -> crate::Result<Arc<dyn QueueStore>> {
        Ok(match self {
            Self::File(store) => {
                store.init()?;
                Arc::new(store)
            }
            Self::Memory(MemoryConfig {
                capacity: Some(capacity),
            }) => Arc::new(MemoryQueueStore::with_capacity(capacity)),
            Self::Memory(MemoryConfig { capacity: None }) => Arc::new(MemoryQueueStore::new()),
        })
    }
}
