use std::{
    io::ErrorKind,
    path::{Component, Path, PathBuf},
};

use async_trait::async_trait;
use postq_common::{MessageId, QueuedMessage, internal};
use postq_tracing::traced;
use serde::Deserialize;
use tokio::fs;

use crate::{SerializationError, SpoolError, store::QueueStore};

/// Subdirectory holding records the processor is done with
const PROCESSED_DIR: &str = "processed";

/// Subdirectory holding records that could not be decoded
const CORRUPT_DIR: &str = "corrupt";

/// File-based queue store
///
/// Each message is a bincode file named `{id}.bin`. Pending records live in
/// the spool directory itself and processed ones in `processed/`, so a pass
/// only ever scans what is still pending. Records that fail to decode are
/// moved to `corrupt/` for inspection.
///
/// Writes go to `.tmp_{id}.bin` first and are renamed into place, so a crash
/// mid-write never leaves a truncated record behind. Listing only considers
/// names that parse as a message id.
#[derive(Debug, Clone)]
pub struct FileQueueStore {
    path: PathBuf,
}

impl Default for FileQueueStore {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/spool/postq"),
        }
    }
}

impl<'de> Deserialize<'de> for FileQueueStore {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct FileQueueStoreHelper {
            path: PathBuf,
        }

        let helper = FileQueueStoreHelper::deserialize(deserializer)?;
        Self::validate_path(&helper.path).map_err(serde::de::Error::custom)?;

        Ok(Self { path: helper.path })
    }
}

impl FileQueueStore {
    /// Store rooted at `path`
    pub fn new(path: impl Into<PathBuf>) -> crate::Result<Self> {
        let path = path.into();
        Self::validate_path(&path)?;

        Ok(Self { path })
    }

    /// Rejects relative paths, `..` components and system directories
    fn validate_path(path: &Path) -> crate::Result<()> {
        let invalid = |reason: &str| SpoolError::InvalidPath {
            path: path.display().to_string(),
            reason: reason.to_string(),
        };

        if path.components().any(|c| c == Component::ParentDir) {
            return Err(invalid("must not contain '..' components"));
        }

        if !path.is_absolute() {
            return Err(invalid("must be absolute"));
        }

        let sensitive_prefixes = [
            "/etc", "/bin", "/sbin", "/usr/bin", "/usr/sbin", "/boot", "/sys", "/proc", "/dev",
        ];

        if let Some(prefix) = sensitive_prefixes.iter().find(|p| path.starts_with(p)) {
            return Err(invalid(&format!("must not be inside {prefix}")));
        }

        Ok(())
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the spool directory if needed and remove temporary files left by a crash
    pub fn init(&self) -> crate::Result<()> {
        internal!("Initialising queue store at {}", self.path.display());

        if !self.path.try_exists()? {
            internal!("{} does not exist, creating...", self.path.display());
            std::fs::create_dir_all(&self.path)?;
        } else if !self.path.is_dir() {
            return Err(SpoolError::InvalidPath {
                path: self.path.display().to_string(),
                reason: "not a directory".to_string(),
            });
        }

        let mut cleaned = 0;
        for entry in std::fs::read_dir(&self.path)? {
            let entry = entry?;
            if entry.file_name().to_string_lossy().starts_with(".tmp_") {
                std::fs::remove_file(entry.path())?;
                cleaned += 1;
            }
        }

        if cleaned > 0 {
            internal!(
                level = INFO,
                "Cleaned up {cleaned} orphaned temporary files from the queue store"
            );
        }

        Ok(())
    }

    fn record_path(&self, id: &MessageId) -> PathBuf {
        self.path.join(format!("{id}.bin"))
    }

    fn processed_path(&self, id: &MessageId) -> PathBuf {
        self.path.join(PROCESSED_DIR).join(format!("{id}.bin"))
    }

    /// Where the record for `id` currently lives, pending first
    async fn locate(&self, id: &MessageId) -> crate::Result<Option<PathBuf>> {
        for path in [self.record_path(id), self.processed_path(id)] {
            if fs::try_exists(&path).await? {
                return Ok(Some(path));
            }
        }

        Ok(None)
    }

    /// Atomically replace `target` with the encoded `message`
    async fn write_record(
        &self,
        id: &MessageId,
        message: &QueuedMessage,
        target: &Path,
    ) -> crate::Result<()> {
        let bytes = bincode::serde::encode_to_vec(message, bincode::config::standard())
            .map_err(SerializationError::from)?;

        let temp_path = self.path.join(format!(".tmp_{id}.bin"));
        fs::write(&temp_path, &bytes).await?;
        fs::rename(&temp_path, target).await?;

        Ok(())
    }

    async fn read_record(&self, id: &MessageId, path: &Path) -> crate::Result<QueuedMessage> {
        let bytes = match fs::read(path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(SpoolError::NotFound(id.clone()));
            }
            Err(err) => return Err(err.into()),
        };

        let (message, _): (QueuedMessage, usize) =
            bincode::serde::decode_from_slice(&bytes, bincode::config::standard())
                .map_err(SerializationError::from)?;

        Ok(message)
    }

    /// Move the file at `from` into `subdir`, keeping its name
    async fn move_into(&self, from: &Path, subdir: &str, id: &MessageId) -> crate::Result<()> {
        let dir = self.path.join(subdir);
        fs::create_dir_all(&dir).await?;
        fs::rename(from, dir.join(format!("{id}.bin"))).await?;

        Ok(())
    }

    /// Ids of the records directly inside `dir`, oldest first
    async fn ids_in(dir: &Path) -> crate::Result<Vec<MessageId>> {
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut ids = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let filename = entry.file_name();
            let filename = filename.to_string_lossy();

            if !filename.starts_with(".tmp_")
                && let Some(id) = MessageId::from_filename(&filename)
            {
                ids.push(id);
            }
        }

        ids.sort();

        Ok(ids)
    }
}

#[async_trait]
impl QueueStore for FileQueueStore {
    #[traced(instrument(level = tracing::Level::DEBUG, skip(self, message)), timing(precision = "ms"))]
    async fn enqueue(&self, message: &mut QueuedMessage) -> crate::Result<MessageId> {
        let id = MessageId::generate();

        if self.locate(&id).await?.is_some() {
            return Err(SpoolError::Internal(format!("Message id collision: {id}")));
        }

        message.id = Some(id.clone());
        self.write_record(&id, message, &self.record_path(&id)).await?;

        internal!(level = DEBUG, "Queued message {id}");

        Ok(id)
    }

    /// Scans only the pending records.
    ///
    /// A record that cannot be decoded is moved to `corrupt/` and skipped; a
    /// processed record still at the top level (left by a crash inside
    /// [`Self::update`]) is moved to `processed/`.
    #[traced(instrument(level = tracing::Level::DEBUG, skip(self)), timing(precision = "ms"))]
    async fn pending(&self, limit: usize) -> crate::Result<Vec<QueuedMessage>> {
        let mut page = Vec::new();

        for id in Self::ids_in(&self.path).await? {
            if page.len() >= limit {
                break;
            }

            let path = self.record_path(&id);
            match self.read_record(&id, &path).await {
                Ok(message) if message.is_pending() => page.push(message),
                Ok(_) => self.move_into(&path, PROCESSED_DIR, &id).await?,
                Err(SpoolError::NotFound(_)) => {}
                Err(SpoolError::Serialization(err)) => {
                    internal!(
                        level = WARN,
                        error = %err,
                        "Unreadable queued message {id}, moving it to {CORRUPT_DIR}/"
                    );
                    self.move_into(&path, CORRUPT_DIR, &id).await?;
                }
                Err(err) => return Err(err),
            }
        }

        Ok(page)
    }

    #[traced(instrument(level = tracing::Level::DEBUG, skip(self), fields(id = %id)), timing(precision = "ms"))]
    async fn read(&self, id: &MessageId) -> crate::Result<QueuedMessage> {
        let path = self
            .locate(id)
            .await?
            .ok_or_else(|| SpoolError::NotFound(id.clone()))?;

        self.read_record(id, &path).await
    }

    /// Rewrites the record in place, then moves it to `processed/` once it is
    /// no longer pending
    #[traced(instrument(level = tracing::Level::DEBUG, skip(self, message)), timing(precision = "ms"))]
    async fn update(&self, message: &QueuedMessage) -> crate::Result<()> {
        let id = message.id.as_ref().ok_or(SpoolError::MissingId)?;

        let current = self
            .locate(id)
            .await?
            .ok_or_else(|| SpoolError::NotFound(id.clone()))?;

        self.write_record(id, message, &current).await?;

        if !message.is_pending() && current == self.record_path(id) {
            self.move_into(&current, PROCESSED_DIR, id).await?;
        }

        internal!(level = DEBUG, "Updated message {id}");

        Ok(())
    }

    /// Pending and processed records, oldest first
    #[traced(instrument(level = tracing::Level::DEBUG, skip(self)), timing(precision = "ms"))]
    async fn list(&self) -> crate::Result<Vec<MessageId>> {
        let mut ids = Self::ids_in(&self.path).await?;
        ids.extend(Self::ids_in(&self.path.join(PROCESSED_DIR)).await?);
        ids.sort();

        Ok(ids)
    }

    #[traced(instrument(level = tracing::Level::DEBUG, skip(self), fields(id = %id)), timing(precision = "ms"))]
    async fn delete(&self, id: &MessageId) -> crate::Result<()> {
        let path = self
            .locate(id)
            .await?
            .ok_or_else(|| SpoolError::NotFound(id.clone()))?;

        fs::remove_file(path).await?;

        Ok(())
    }
}
