//! Error types for queue stores.

use std::io;

use postq_common::MessageId;
use thiserror::Error;

/// Top-level store error type.
#[derive(Debug, Error)]
pub enum SpoolError {
    /// I/O operation failed (file read/write/rename/delete).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization or deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    /// Message not found in the store.
    #[error("Message not found: {0}")]
    NotFound(MessageId),

    /// An update was attempted for a record that has no identity.
    #[error("Message has no id and cannot be updated")]
    MissingId,

    /// The spool directory is unusable.
    #[error("Invalid spool path {path}: {reason}")]
    InvalidPath { path: String, reason: String },

    /// Internal error (lock poisoning, capacity, etc.).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Serialization and deserialization errors.
#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("Bincode encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("Bincode decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),
}

/// Specialized `Result` type for store operations.
pub type Result<T> = std::result::Result<T, SpoolError>;

impl<T> From<std::sync::PoisonError<T>> for SpoolError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Self::Internal(format!("Lock poisoned: {e}"))
    }
}
