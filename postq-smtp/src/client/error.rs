use std::io;

use thiserror::Error;

/// A session with the relay broke down, or the relay refused a command.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The relay sent something that is not an SMTP reply
    #[error("Failed to parse SMTP response: {0}")]
    ParseError(String),

    /// A 4xx or 5xx reply
    #[error("SMTP error: {code} - {message}")]
    SmtpError { code: u16, message: String },

    #[error("TLS error: {0}")]
    TlsError(String),

    #[error("Connection closed unexpectedly")]
    ConnectionClosed,

    #[error("UTF-8 error: {0}")]
    Utf8Error(#[from] std::str::Utf8Error),
}

impl ClientError {
    /// The relay's reply code, when the failure was a reply
    #[must_use]
    pub const fn code(&self) -> Option<u16> {
        match self {
            Self::SmtpError { code, .. } => Some(*code),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
