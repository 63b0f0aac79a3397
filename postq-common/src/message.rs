//! The queued message record and its recipients.

use std::{fmt, sync::Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier for a queued message
///
/// A ULID, so identifiers sort by creation time and the store's natural
/// ordering is the order messages were queued in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId {
    id: ulid::Ulid,
}

impl MessageId {
    /// Parse a message ID from a spool filename like `01ARYZ6S41TSV4RRFFQ69G5FAV.bin`
    ///
    /// Rejects path separators, traversal patterns and anything that is not a ULID.
    #[must_use]
    pub fn from_filename(filename: &str) -> Option<Self> {
        if filename.contains('/') || filename.contains('\\') || filename.contains("..") {
            return None;
        }

        let stem = filename.strip_suffix(".bin")?;
        let id = ulid::Ulid::from_string(stem).ok()?;

        Some(Self { id })
    }

    #[must_use]
    pub const fn new(id: ulid::Ulid) -> Self {
        Self { id }
    }

    /// Generate a new unique message ID
    ///
    /// IDs from one process are strictly increasing, even within the same
    /// millisecond.
    #[must_use]
    pub fn generate() -> Self {
        static GENERATOR: Mutex<ulid::Generator> = Mutex::new(ulid::Generator::new());

        let id = GENERATOR
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .generate()
            .unwrap_or_else(|_| ulid::Ulid::new());

        Self { id }
    }

    #[must_use]
    pub const fn ulid(&self) -> ulid::Ulid {
        self.id
    }

    /// Milliseconds since the Unix epoch at which this ID was generated
    #[must_use]
    pub const fn timestamp_ms(&self) -> u64 {
        self.id.timestamp_ms()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl Serialize for MessageId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.id.to_string())
    }
}

impl<'de> Deserialize<'de> for MessageId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let id = ulid::Ulid::from_string(&s).map_err(serde::de::Error::custom)?;
        Ok(Self { id })
    }
}

/// How a recipient appears on the outgoing message
///
/// Stored by name (`to`, `cc`, `bcc`); a name this version does not know
/// reads back as `To`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RecipientKind {
    #[default]
    To,
    Cc,
    Bcc,
}

impl RecipientKind {
    /// Map a producer's numeric recipient type. Anything unrecognised is `To`.
    #[must_use]
    pub const fn from_code(code: i64) -> Self {
        match code {
            1 => Self::Cc,
            2 => Self::Bcc,
            _ => Self::To,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::To => "to",
            Self::Cc => "cc",
            Self::Bcc => "bcc",
        }
    }

    /// Whether the recipient is envelope-only (never written to a header)
    #[must_use]
    pub const fn is_blind(self) -> bool {
        matches!(self, Self::Bcc)
    }
}

impl Serialize for RecipientKind {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for RecipientKind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let name = String::deserialize(deserializer)?;
        Ok(Self::from(name.as_str()))
    }
}

impl From<&str> for RecipientKind {
    fn from(value: &str) -> Self {
        if value.eq_ignore_ascii_case("cc") {
            Self::Cc
        } else if value.eq_ignore_ascii_case("bcc") {
            Self::Bcc
        } else {
            Self::To
        }
    }
}

impl From<i64> for RecipientKind {
    fn from(value: i64) -> Self {
        Self::from_code(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub kind: RecipientKind,
}

impl Recipient {
    pub fn new(
        email: impl Into<String>,
        name: impl Into<String>,
        kind: impl Into<RecipientKind>,
    ) -> Self {
        Self {
            email: email.into(),
            name: name.into(),
            kind: kind.into(),
        }
    }
}

/// Per-message sending parameters captured when the message was queued
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageParameters {
    pub subject: String,
    #[serde(default)]
    pub is_plain: bool,
    pub from_email: String,
    #[serde(default)]
    pub from_name: String,
    /// `Reply-To` header value
    #[serde(default)]
    pub reply_to: Option<String>,
    /// `Return-Path` (bounce address) written on the message
    #[serde(default)]
    pub return_to: Option<String>,
    /// Envelope sender that selects a sender-bound transport for this message
    #[serde(default)]
    pub return_path_email: Option<String>,
}

/// Why a message stopped being pending
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryOutcome {
    /// The transport accepted the message
    Delivered,
    /// The message was given up on permanently
    Rejected { reason: String },
}

impl DeliveryOutcome {
    #[must_use]
    pub const fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered)
    }
}

/// A message waiting in the outbound queue
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedMessage {
    /// `None` for records that were never persisted; those are never sent.
    #[serde(default)]
    pub id: Option<MessageId>,
    pub recipients: Vec<Recipient>,
    pub body: String,
    pub parameters: MessageParameters,
    #[serde(default)]
    pub processed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub outcome: Option<DeliveryOutcome>,
}

impl QueuedMessage {
    #[must_use]
    pub fn new(parameters: MessageParameters, body: impl Into<String>) -> Self {
        Self {
            id: None,
            recipients: Vec::new(),
            body: body.into(),
            parameters,
            processed_at: None,
            outcome: None,
        }
    }

    #[must_use]
    pub fn with_recipient(mut self, recipient: Recipient) -> Self {
        self.recipients.push(recipient);
        self
    }

    #[must_use]
    pub const fn is_pending(&self) -> bool {
        self.processed_at.is_none()
    }

    /// Record that the processor is done with this message.
    ///
    /// The first call wins; returns `false` if the message was already processed.
    pub fn mark_processed(&mut self, at: DateTime<Utc>, outcome: DeliveryOutcome) -> bool {
        if self.processed_at.is_some() {
            return false;
        }

        self.processed_at = Some(at);
        self.outcome = Some(outcome);
        true
    }
}
