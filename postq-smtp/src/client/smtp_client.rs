//! SMTP client connection with optional STARTTLS.

use std::sync::Arc;

use postq_common::tracing;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};
use tokio_rustls::{
    TlsConnector,
    rustls::{
        ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme,
        client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
        pki_types::{CertificateDer, ServerName, UnixTime},
    },
};

use super::{
    error::{ClientError, Result},
    response::Response,
};

/// Initial size of the reply buffer
const BUFFER_SIZE: usize = 8192;

/// Largest reply accepted before the session is abandoned
const MAX_REPLY_SIZE: usize = 1024 * 1024;

enum Stream {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl Stream {
    async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        match self {
            Self::Plain(stream) => stream.write_all(data).await?,
            Self::Tls(stream) => stream.write_all(data).await?,
        }
        Ok(())
    }

    /// Read at least one byte; end of stream is an error mid-session
    async fn read_some(&mut self, buf: &mut [u8]) -> Result<usize> {
        let read = match self {
            Self::Plain(stream) => stream.read(buf).await?,
            Self::Tls(stream) => stream.read(buf).await?,
        };

        if read == 0 {
            Err(ClientError::ConnectionClosed)
        } else {
            Ok(read)
        }
    }
}

/// Client configuration trusting the platform's root certificates
fn tls_config(accept_invalid_certs: bool) -> Arc<ClientConfig> {
    let native = rustls_native_certs::load_native_certs();
    if !native.errors.is_empty() {
        tracing::warn!(errors = ?native.errors, "Some native certificates could not be loaded");
    }

    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(native.certs);
    tracing::trace!(added, ignored, "Loaded native root certificates");

    let mut config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();

    if accept_invalid_certs {
        config
            .dangerous()
            .set_certificate_verifier(Arc::new(AnyCertificate));
    }

    Arc::new(config)
}

/// Certificate verifier behind `accept_invalid_certs`; trusts every server.
#[derive(Debug)]
struct AnyCertificate;

type VerifyResult<T> = std::result::Result<T, tokio_rustls::rustls::Error>;

impl ServerCertVerifier for AnyCertificate {
    fn verify_server_cert(
        &self,
        _: &CertificateDer<'_>,
        _: &[CertificateDer<'_>],
        _: &ServerName<'_>,
        _: &[u8],
        _: UnixTime,
    ) -> VerifyResult<ServerCertVerified> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _: &[u8],
        _: &CertificateDer<'_>,
        _: &DigitallySignedStruct,
    ) -> VerifyResult<HandshakeSignatureValid> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _: &[u8],
        _: &CertificateDer<'_>,
        _: &DigitallySignedStruct,
    ) -> VerifyResult<HandshakeSignatureValid> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::ED25519,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PKCS1_SHA256,
        ]
    }
}

/// One SMTP session with a relay, from greeting to QUIT.
///
/// Every command method returns the server's reply as-is; turning error
/// replies into failures is left to the caller (see [`Response::into_result`]).
pub struct SmtpClient {
    stream: Option<Stream>,
    reply: Vec<u8>,
    filled: usize,
    server_name: String,
    accept_invalid_certs: bool,
}

impl std::fmt::Debug for SmtpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpClient")
            .field("server_name", &self.server_name)
            .field("tls", &self.is_tls())
            .finish_non_exhaustive()
    }
}

impl SmtpClient {
    /// Open a plain TCP connection to `addr`.
    ///
    /// `server_name` is what the certificate is checked against after STARTTLS.
    pub async fn connect(addr: &str, server_name: String) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;

        Ok(Self {
            stream: Some(Stream::Plain(stream)),
            reply: vec![0; BUFFER_SIZE],
            filled: 0,
            server_name,
            accept_invalid_certs: false,
        })
    }

    #[must_use]
    pub const fn accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    #[must_use]
    pub const fn is_tls(&self) -> bool {
        matches!(self.stream, Some(Stream::Tls(_)))
    }

    pub async fn read_greeting(&mut self) -> Result<Response> {
        self.read_reply().await
    }

    /// EHLO, or HELO when the server rejects EHLO
    pub async fn hello(&mut self, domain: &str) -> Result<Response> {
        let ehlo = self.command(&format!("EHLO {domain}")).await?;
        if !ehlo.is_error() {
            return Ok(ehlo);
        }

        tracing::debug!(code = ehlo.code, "EHLO rejected, trying HELO");
        self.command(&format!("HELO {domain}")).await
    }

    pub async fn mail_from(&mut self, from: &str) -> Result<Response> {
        self.command(&format!("MAIL FROM:<{from}>")).await
    }

    pub async fn rcpt_to(&mut self, to: &str) -> Result<Response> {
        self.command(&format!("RCPT TO:<{to}>")).await
    }

    pub async fn data(&mut self) -> Result<Response> {
        self.command("DATA").await
    }

    /// Send the message content after a 354, terminated with `.`
    pub async fn send_data(&mut self, content: &str) -> Result<Response> {
        self.write(dot_stuff(content).as_bytes()).await?;
        self.read_reply().await
    }

    pub async fn quit(&mut self) -> Result<Response> {
        self.command("QUIT").await
    }

    /// Ask for STARTTLS and upgrade the stream if the server agrees.
    ///
    /// A refusal is returned as the reply, with the session still in plaintext.
    pub async fn starttls(&mut self) -> Result<Response> {
        let reply = self.command("STARTTLS").await?;
        if !reply.is_success() {
            return Ok(reply);
        }

        let Some(Stream::Plain(tcp)) = self.stream.take() else {
            return Err(ClientError::TlsError(
                "STARTTLS on a session that is not plaintext".to_string(),
            ));
        };

        let name = ServerName::try_from(self.server_name.clone())
            .map_err(|e| ClientError::TlsError(format!("Invalid server name: {e}")))?;
        let tls = TlsConnector::from(tls_config(self.accept_invalid_certs))
            .connect(name, tcp)
            .await
            .map_err(|e| ClientError::TlsError(e.to_string()))?;

        self.stream = Some(Stream::Tls(Box::new(tls)));
        // Anything buffered before the handshake was sent in plaintext
        self.filled = 0;

        Ok(reply)
    }

    async fn command(&mut self, command: &str) -> Result<Response> {
        self.write(format!("{command}\r\n").as_bytes()).await?;
        self.read_reply().await
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        self.stream
            .as_mut()
            .ok_or(ClientError::ConnectionClosed)?
            .write_all(data)
            .await
    }

    async fn read_reply(&mut self) -> Result<Response> {
        loop {
            if let Some((response, used)) = Response::parse_response(&self.reply[..self.filled])? {
                self.reply.copy_within(used..self.filled, 0);
                self.filled -= used;
                return Ok(response);
            }

            if self.filled == self.reply.len() {
                if self.reply.len() * 2 > MAX_REPLY_SIZE {
                    return Err(ClientError::ParseError(format!(
                        "Reply larger than {MAX_REPLY_SIZE} bytes"
                    )));
                }
                self.reply.resize(self.reply.len() * 2, 0);
            }

            let stream = self.stream.as_mut().ok_or(ClientError::ConnectionClosed)?;
            self.filled += stream.read_some(&mut self.reply[self.filled..]).await?;
        }
    }
}

/// Normalises line endings to CRLF, doubles leading dots and appends `.\r\n`.
fn dot_stuff(data: &str) -> String {
    let mut out = String::with_capacity(data.len() + 16);

    for line in data.lines() {
        if line.starts_with('.') {
            out.push('.');
        }
        out.push_str(line);
        out.push_str("\r\n");
    }

    out.push_str(".\r\n");
    out
}
