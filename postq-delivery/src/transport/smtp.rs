use std::{future::Future, time::Duration};

use async_trait::async_trait;
use postq_common::{config::Endpoint, tracing};
use postq_smtp::{ClientError, OutgoingMessage, Response, SmtpClient};
use postq_tracing::traced;
use serde::Deserialize;

use super::{Transport, TransportKind};
use crate::error::TransportError;

/// Per-command timeouts, in seconds
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SmtpTimeouts {
    #[serde(default = "default_connect_timeout")]
    pub connect_secs: u64,

    /// EHLO/HELO, including the repeat after STARTTLS
    #[serde(default = "default_ehlo_timeout")]
    pub ehlo_secs: u64,

    #[serde(default = "default_starttls_timeout")]
    pub starttls_secs: u64,

    #[serde(default = "default_mail_from_timeout")]
    pub mail_from_secs: u64,

    #[serde(default = "default_rcpt_to_timeout")]
    pub rcpt_to_secs: u64,

    /// DATA and the message content, which can be large
    #[serde(default = "default_data_timeout")]
    pub data_secs: u64,

    #[serde(default = "default_quit_timeout")]
    pub quit_secs: u64,
}

impl Default for SmtpTimeouts {
    fn default() -> Self {
        Self {
            connect_secs: default_connect_timeout(),
            ehlo_secs: default_ehlo_timeout(),
            starttls_secs: default_starttls_timeout(),
            mail_from_secs: default_mail_from_timeout(),
            rcpt_to_secs: default_rcpt_to_timeout(),
            data_secs: default_data_timeout(),
            quit_secs: default_quit_timeout(),
        }
    }
}

const fn default_connect_timeout() -> u64 {
    30
}

const fn default_ehlo_timeout() -> u64 {
    30
}

const fn default_starttls_timeout() -> u64 {
    30
}

const fn default_mail_from_timeout() -> u64 {
    30
}

const fn default_rcpt_to_timeout() -> u64 {
    30
}

const fn default_data_timeout() -> u64 {
    120
}

const fn default_quit_timeout() -> u64 {
    10
}

/// When to upgrade the session with STARTTLS
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum StartTls {
    Never,
    /// Upgrade when the server offers it; fall back to plaintext if the upgrade fails
    #[default]
    Opportunistic,
    /// Refuse to send without TLS
    Required,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TlsOutcome {
    Upgraded,
    Skipped,
    RetryWithoutTls,
}

/// Delivers over SMTP to a single relay, one connection per message.
#[derive(Debug, Clone)]
pub struct SmtpTransport {
    endpoint: Endpoint,
    helo: String,
    starttls: StartTls,
    accept_invalid_certs: bool,
    timeouts: SmtpTimeouts,
    envelope_sender: Option<String>,
}

impl SmtpTransport {
    #[must_use]
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            helo: "localhost".to_string(),
            starttls: StartTls::default(),
            accept_invalid_certs: false,
            timeouts: SmtpTimeouts::default(),
            envelope_sender: None,
        }
    }

    #[must_use]
    pub fn helo(mut self, helo: impl Into<String>) -> Self {
        self.helo = helo.into();
        self
    }

    #[must_use]
    pub const fn starttls(mut self, starttls: StartTls) -> Self {
        self.starttls = starttls;
        self
    }

    #[must_use]
    pub const fn accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    #[must_use]
    pub fn timeouts(mut self, timeouts: SmtpTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Use `sender` for MAIL FROM regardless of the message's own return path
    #[must_use]
    pub fn envelope_sender(mut self, sender: impl Into<String>) -> Self {
        self.envelope_sender = Some(sender.into());
        self
    }

    #[must_use]
    pub fn bound_sender(&self) -> Option<&str> {
        self.envelope_sender.as_deref()
    }

    #[must_use]
    pub const fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Run one command under a timeout and turn error replies into failures
    async fn step<F>(&self, what: &str, secs: u64, command: F) -> Result<Response, TransportError>
    where
        F: Future<Output = Result<Response, ClientError>> + Send,
    {
        let response = tokio::time::timeout(Duration::from_secs(secs), command)
            .await
            .map_err(|_| TransportError::Timeout(format!("{what} timed out after {secs}s")))??;

        Ok(response.into_result()?)
    }

    async fn connect_and_greet(&self) -> Result<SmtpClient, TransportError> {
        let address = self.endpoint.to_string();
        let connect = async {
            let client = SmtpClient::connect(&address, self.endpoint.host.clone()).await?;
            Ok::<_, ClientError>(client.accept_invalid_certs(self.accept_invalid_certs))
        };

        let mut client = tokio::time::timeout(
            Duration::from_secs(self.timeouts.connect_secs),
            connect,
        )
        .await
        .map_err(|_| {
            TransportError::Timeout(format!(
                "Connecting to {address} timed out after {}s",
                self.timeouts.connect_secs
            ))
        })?
        .map_err(|e| TransportError::Connection(format!("Failed to connect to {address}: {e}")))?;

        self.step("Greeting", self.timeouts.ehlo_secs, client.read_greeting())
            .await?;

        Ok(client)
    }

    async fn negotiate_tls(&self, client: &mut SmtpClient) -> Result<TlsOutcome, TransportError> {
        let ehlo = self
            .step("EHLO", self.timeouts.ehlo_secs, client.hello(&self.helo))
            .await?;

        let offered = ehlo.has_extension("STARTTLS");
        match (self.starttls, offered) {
            (StartTls::Never, _) | (StartTls::Opportunistic, false) => {
                return Ok(TlsOutcome::Skipped);
            }
            (StartTls::Required, false) => {
                return Err(TransportError::Tls(format!(
                    "{} does not offer STARTTLS",
                    self.endpoint
                )));
            }
            (_, true) => {}
        }

        let upgrade = self
            .step("STARTTLS", self.timeouts.starttls_secs, client.starttls())
            .await;

        match upgrade {
            Ok(_) if client.is_tls() => {}
            Ok(_) | Err(_) if self.starttls == StartTls::Opportunistic => {
                tracing::info!(
                    server = %self.endpoint,
                    "STARTTLS failed, retrying without TLS"
                );
                return Ok(TlsOutcome::RetryWithoutTls);
            }
            Ok(response) => {
                return Err(TransportError::Tls(format!(
                    "STARTTLS not completed: {}",
                    response.message()
                )));
            }
            Err(e) => return Err(TransportError::Tls(format!("STARTTLS failed: {e}"))),
        }

        self.step("EHLO", self.timeouts.ehlo_secs, client.hello(&self.helo))
            .await?;

        Ok(TlsOutcome::Upgraded)
    }

    async fn transaction(
        &self,
        client: &mut SmtpClient,
        message: &OutgoingMessage,
    ) -> Result<(), TransportError> {
        let sender = self
            .envelope_sender
            .as_deref()
            .unwrap_or_else(|| message.envelope_sender());

        self.step(
            "MAIL FROM",
            self.timeouts.mail_from_secs,
            client.mail_from(sender),
        )
        .await?;

        for recipient in message.envelope_recipients() {
            self.step(
                "RCPT TO",
                self.timeouts.rcpt_to_secs,
                client.rcpt_to(recipient),
            )
            .await?;
        }

        self.step("DATA", self.timeouts.data_secs, client.data())
            .await?;

        let content = message.render();
        self.step(
            "Message content",
            self.timeouts.data_secs,
            client.send_data(&content),
        )
        .await?;

        let quit = Duration::from_secs(self.timeouts.quit_secs);
        if tokio::time::timeout(quit, client.quit()).await.is_err() {
            tracing::warn!(server = %self.endpoint, "QUIT timed out after successful delivery");
        }

        Ok(())
    }

    /// One complete SMTP session for `message`
    #[traced(instrument(level = tracing::Level::DEBUG, skip_all, fields(server = %self.endpoint)), timing(precision = "ms"))]
    async fn deliver(&self, message: &OutgoingMessage) -> Result<(), TransportError> {
        if message.envelope_recipients().is_empty() {
            return Err(TransportError::Build("Message has no recipients".to_string()));
        }

        if self.accept_invalid_certs {
            tracing::warn!(
                server = %self.endpoint,
                "TLS certificate validation is disabled for this connection"
            );
        }

        let mut client = self.connect_and_greet().await?;

        if self.negotiate_tls(&mut client).await? == TlsOutcome::RetryWithoutTls {
            drop(client);
            client = self.connect_and_greet().await?;
            self.step("EHLO", self.timeouts.ehlo_secs, client.hello(&self.helo))
                .await?;
        }

        self.transaction(&mut client, message).await
    }
}

#[async_trait]
impl Transport for SmtpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Networked
    }

    async fn send(&self, message: &OutgoingMessage) -> Result<(), TransportError> {
        self.deliver(message).await
    }
}
