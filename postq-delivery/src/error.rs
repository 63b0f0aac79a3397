//! Typed errors for sending and draining the queue.
//!
//! A [`TransportError`] is either a protocol failure (the remote side
//! answered with a reply code, or the session broke down before it could) or
//! a local failure that never reached the wire. The distinction drives
//! [`crate::policy::classify`].

use postq_smtp::ClientError;
use postq_spool::SpoolError;
use thiserror::Error;

/// A hook callback refused to continue.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Hook failed: {0}")]
pub struct HookError(pub String);

impl HookError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// Why a transport could not hand a message over.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The server replied with a 4xx/5xx code.
    #[error("SMTP error: {code} {message}")]
    Protocol { code: u16, message: String },

    /// Connecting failed or the connection dropped mid-session.
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("TLS failure: {0}")]
    Tls(String),

    /// The server sent something that is not SMTP.
    #[error("Malformed reply: {0}")]
    Malformed(String),

    /// The local delivery command could not be run or exited unsuccessfully.
    #[error("Local delivery failed: {0}")]
    Command(String),

    #[error(transparent)]
    Hook(#[from] HookError),

    /// The message cannot be sent as assembled (no recipients, etc.).
    #[error("Message could not be assembled: {0}")]
    Build(String),
}

impl TransportError {
    /// The SMTP reply code, when the server sent one
    #[must_use]
    pub const fn code(&self) -> Option<u16> {
        match self {
            Self::Protocol { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Whether the failure happened in the SMTP conversation itself
    #[must_use]
    pub const fn is_protocol(&self) -> bool {
        matches!(
            self,
            Self::Protocol { .. }
                | Self::Connection(_)
                | Self::Timeout(_)
                | Self::Tls(_)
                | Self::Malformed(_)
        )
    }
}

impl From<ClientError> for TransportError {
    fn from(error: ClientError) -> Self {
        match error {
            ClientError::SmtpError { code, message } => Self::Protocol { code, message },
            ClientError::Io(e) => Self::Connection(format!("I/O error: {e}")),
            ClientError::ConnectionClosed => {
                Self::Connection("Connection closed unexpectedly".to_string())
            }
            ClientError::TlsError(msg) => Self::Tls(msg),
            ClientError::ParseError(msg) => Self::Malformed(msg),
            ClientError::Utf8Error(e) => Self::Malformed(format!("UTF-8 decoding error: {e}")),
        }
    }
}

/// Why a pass stopped before working through its batch.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// A fatal transport failure; the message stays pending.
    #[error("Transport failure for message {message_id}: {source}")]
    Transport {
        message_id: String,
        #[source]
        source: TransportError,
    },

    /// The queue store could not be read or written.
    #[error("Queue store failure: {0}")]
    Store(#[from] SpoolError),
}

/// Why a single templated send did not go out.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("Message is not valid for sending: {0}")]
    Invalid(String),

    #[error(transparent)]
    Hook(#[from] HookError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl SendError {
    #[must_use]
    pub const fn code(&self) -> Option<u16> {
        match self {
            Self::Transport(err) => err.code(),
            Self::Invalid(_) | Self::Hook(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn reply_codes_survive_conversion() {
        let err = TransportError::from(ClientError::SmtpError {
            code: 421,
            message: "Service not available".to_string(),
        });

        assert_eq!(err.code(), Some(421));
        assert!(err.is_protocol());
        assert_eq!(err.to_string(), "SMTP error: 421 Service not available");
    }

    #[test]
    fn session_breakdowns_are_codeless_protocol_failures() {
        let errors = [
            TransportError::from(ClientError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            ))),
            TransportError::from(ClientError::ConnectionClosed),
            TransportError::from(ClientError::TlsError("handshake".to_string())),
            TransportError::from(ClientError::ParseError("garbage".to_string())),
        ];

        for err in errors {
            assert!(err.is_protocol(), "{err}");
            assert_eq!(err.code(), None);
        }
    }

    #[test]
    fn local_failures_are_not_protocol_failures() {
        assert!(!TransportError::Hook(HookError::new("nope")).is_protocol());
        assert!(!TransportError::Build("no recipients".to_string()).is_protocol());
        assert!(!TransportError::Command("exit status 1".to_string()).is_protocol());
    }
}
