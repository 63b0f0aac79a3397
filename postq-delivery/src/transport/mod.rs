//! Mail transports and the factory that builds them for a pass.

mod sendmail;
mod smtp;

use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use postq_common::config::Endpoint;
use postq_smtp::OutgoingMessage;
use serde::Deserialize;

pub use sendmail::SendmailTransport;
pub use smtp::{SmtpTimeouts, SmtpTransport, StartTls};

use crate::error::TransportError;

/// How a transport reaches the outside world
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Talks SMTP to a remote server
    Networked,
    /// Hands the message to a local program
    Local,
}

/// Something that can deliver an assembled message.
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    fn kind(&self) -> TransportKind;

    async fn send(&self, message: &OutgoingMessage) -> Result<(), TransportError>;
}

/// Builds transports for a pass.
pub trait TransportFactory: Send + Sync + std::fmt::Debug {
    /// The transport used for every message that does not ask for its own envelope sender
    fn pass_default(&self, endpoint: &Endpoint) -> Arc<dyn Transport>;

    /// A transport that always uses `sender` as the envelope sender
    fn for_envelope_sender(&self, endpoint: &Endpoint, sender: &str) -> Arc<dyn Transport>;
}

fn default_helo() -> String {
    "localhost".to_string()
}

fn default_sendmail_path() -> PathBuf {
    PathBuf::from("/usr/sbin/sendmail")
}

/// Transport selection from configuration
///
/// ```ron
/// transport: Smtp(
///     helo: "mailer.example.com",
///     starttls: Opportunistic,
///     timeouts: (connect_secs: 10),
/// ),
/// ```
///
/// or
///
/// ```ron
/// transport: Sendmail(path: "/usr/sbin/sendmail"),
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub enum TransportConfig {
    Smtp {
        /// Name announced in EHLO/HELO
        #[serde(default = "default_helo")]
        helo: String,
        #[serde(default)]
        starttls: StartTls,
        /// Skip certificate validation (testing only)
        #[serde(default)]
        accept_invalid_certs: bool,
        #[serde(default)]
        timeouts: SmtpTimeouts,
    },
    Sendmail {
        #[serde(default = "default_sendmail_path")]
        path: PathBuf,
    },
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::Smtp {
            helo: default_helo(),
            starttls: StartTls::default(),
            accept_invalid_certs: false,
            timeouts: SmtpTimeouts::default(),
        }
    }
}

impl TransportConfig {
    fn build(&self, endpoint: &Endpoint, sender: Option<&str>) -> Arc<dyn Transport> {
        match self {
            Self::Smtp {
                helo,
                starttls,
                accept_invalid_certs,
                timeouts,
            } => {
                let mut transport = SmtpTransport::new(endpoint.clone())
                    .helo(helo.clone())
                    .starttls(*starttls)
                    .accept_invalid_certs(*accept_invalid_certs)
                    .timeouts(timeouts.clone());
                if let Some(sender) = sender {
                    transport = transport.envelope_sender(sender);
                }
                Arc::new(transport)
            }
            Self::Sendmail { path } => {
                let mut transport = SendmailTransport::new(path.clone());
                if let Some(sender) = sender {
                    transport = transport.envelope_sender(sender);
                }
                Arc::new(transport)
            }
        }
    }
}

impl TransportFactory for TransportConfig {
    fn pass_default(&self, endpoint: &Endpoint) -> Arc<dyn Transport> {
        self.build(endpoint, None)
    }

    fn for_envelope_sender(&self, endpoint: &Endpoint, sender: &str) -> Arc<dyn Transport> {
        self.build(endpoint, Some(sender))
    }
}
