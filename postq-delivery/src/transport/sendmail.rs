use std::{io::ErrorKind, path::PathBuf, process::Stdio};

use async_trait::async_trait;
use postq_common::tracing;
use postq_smtp::OutgoingMessage;
use tokio::{io::AsyncWriteExt, process::Command};

use super::{Transport, TransportKind};
use crate::error::TransportError;

/// Pipes the rendered message into a sendmail-compatible program.
///
/// Invoked as `<path> -i -f <envelope sender> -- <recipients..>`.
#[derive(Debug, Clone)]
pub struct SendmailTransport {
    path: PathBuf,
    envelope_sender: Option<String>,
}

impl SendmailTransport {
    #[must_use]
    pub const fn new(path: PathBuf) -> Self {
        Self {
            path,
            envelope_sender: None,
        }
    }

    #[must_use]
    pub fn envelope_sender(mut self, sender: impl Into<String>) -> Self {
        self.envelope_sender = Some(sender.into());
        self
    }

    #[must_use]
    pub fn bound_sender(&self) -> Option<&str> {
        self.envelope_sender.as_deref()
    }
}

#[async_trait]
impl Transport for SendmailTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Local
    }

    async fn send(&self, message: &OutgoingMessage) -> Result<(), TransportError> {
        let recipients = message.envelope_recipients();
        if recipients.is_empty() {
            return Err(TransportError::Build("Message has no recipients".to_string()));
        }

        let sender = self
            .envelope_sender
            .as_deref()
            .unwrap_or_else(|| message.envelope_sender());

        let mut child = Command::new(&self.path)
            .arg("-i")
            .arg("-f")
            .arg(sender)
            .arg("--")
            .args(&recipients)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                TransportError::Command(format!("Unable to run {}: {e}", self.path.display()))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            let content = message.render();
            match stdin.write_all(content.as_bytes()).await {
                // The exit status says why the program stopped reading
                Err(e) if e.kind() == ErrorKind::BrokenPipe => {}
                Err(e) => return Err(TransportError::Command(format!("Writing message: {e}"))),
                Ok(()) => {}
            }
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| TransportError::Command(format!("Waiting for sendmail: {e}")))?;

        if output.status.success() {
            tracing::debug!(program = %self.path.display(), "Message handed to sendmail");
            Ok(())
        } else {
            Err(TransportError::Command(format!(
                "{} exited with {}: {}",
                self.path.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}
