//! Mock SMTP server for driving the networked transport
//!
//! Replies are configurable per command, and RCPT can be refused for chosen
//! addresses so single messages of a batch can fail:
//!
//! ```rust,no_run
//! let server = MockSmtpServer::builder()
//!     .with_rcpt_rejection("b@example.test", 421, "Try later")
//!     .build()
//!     .await?;
//! ```
#![allow(dead_code)]

use std::{
    collections::HashMap,
    fmt::Write,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::RwLock,
    time::timeout,
};

/// Command received by the mock server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmtpCommand {
    Ehlo(String),
    Helo(String),
    /// Address between the angle brackets
    MailFrom(String),
    RcptTo(String),
    Data,
    /// Everything between DATA and the terminating dot
    MessageContent(String),
    Quit,
    StartTls,
    Other(String),
}

#[derive(Debug, Clone)]
pub struct SmtpReply {
    pub code: u16,
    pub message: String,
}

impl SmtpReply {
    fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        format!("{} {}\r\n", self.code, self.message).into_bytes()
    }
}

#[derive(Debug, Clone)]
struct MockServerConfig {
    greeting: SmtpReply,
    capabilities: Vec<String>,
    mail_from: SmtpReply,
    rcpt_to: SmtpReply,
    rcpt_rejections: HashMap<String, SmtpReply>,
    data: SmtpReply,
    data_end: SmtpReply,
    quit: SmtpReply,
}

impl Default for MockServerConfig {
    fn default() -> Self {
        Self {
            greeting: SmtpReply::new(220, "Mock SMTP Server"),
            capabilities: vec!["localhost".to_string(), "SIZE 10000".to_string()],
            mail_from: SmtpReply::new(250, "OK"),
            rcpt_to: SmtpReply::new(250, "OK"),
            rcpt_rejections: HashMap::new(),
            data: SmtpReply::new(354, "Start mail input; end with <CRLF>.<CRLF>"),
            data_end: SmtpReply::new(250, "OK: Message accepted"),
            quit: SmtpReply::new(221, "Bye"),
        }
    }
}

impl MockServerConfig {
    fn ehlo_bytes(&self) -> Vec<u8> {
        let mut reply = String::new();
        let last = self.capabilities.len().saturating_sub(1);

        for (i, capability) in self.capabilities.iter().enumerate() {
            let separator = if i < last { '-' } else { ' ' };
            let _ = write!(&mut reply, "250{separator}{capability}\r\n");
        }

        reply.into_bytes()
    }
}

fn between_brackets(argument: &str) -> String {
    argument
        .split_once('<')
        .and_then(|(_, rest)| rest.split_once('>'))
        .map_or_else(|| argument.to_string(), |(inner, _)| inner.to_string())
}

pub struct MockSmtpServer {
    addr: SocketAddr,
    commands: Arc<RwLock<Vec<SmtpCommand>>>,
    connections: Arc<AtomicUsize>,
    shutdown: Arc<AtomicBool>,
}

impl MockSmtpServer {
    #[must_use]
    pub fn builder() -> MockSmtpServerBuilder {
        MockSmtpServerBuilder {
            config: MockServerConfig::default(),
        }
    }

    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Every command received so far, across all connections
    pub async fn commands(&self) -> Vec<SmtpCommand> {
        self.commands.read().await.clone()
    }

    /// Envelope senders in the order they were received
    pub async fn senders(&self) -> Vec<String> {
        self.commands()
            .await
            .into_iter()
            .filter_map(|command| match command {
                SmtpCommand::MailFrom(sender) => Some(sender),
                _ => None,
            })
            .collect()
    }

    /// Message bodies in the order they were accepted
    pub async fn messages(&self) -> Vec<String> {
        self.commands()
            .await
            .into_iter()
            .filter_map(|command| match command {
                SmtpCommand::MessageContent(content) => Some(content),
                _ => None,
            })
            .collect()
    }

    #[must_use]
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    async fn handle_client(
        mut stream: TcpStream,
        config: Arc<MockServerConfig>,
        commands: Arc<RwLock<Vec<SmtpCommand>>>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let (reader, mut writer) = stream.split();
        let mut reader = BufReader::new(reader);
        let mut line = String::new();

        writer.write_all(&config.greeting.to_bytes()).await?;
        writer.flush().await?;

        loop {
            line.clear();

            let Ok(read) = timeout(Duration::from_secs(10), reader.read_line(&mut line)).await
            else {
                return Ok(());
            };
            if read? == 0 {
                return Ok(());
            }

            let command_line = line.trim();
            let (verb, argument) = command_line
                .split_once(' ')
                .unwrap_or((command_line, ""));

            let (reply, command) = match verb.to_uppercase().as_str() {
                "EHLO" => (config.ehlo_bytes(), SmtpCommand::Ehlo(argument.to_string())),
                "HELO" => (
                    SmtpReply::new(250, "Hello").to_bytes(),
                    SmtpCommand::Helo(argument.to_string()),
                ),
                "MAIL" => (
                    config.mail_from.to_bytes(),
                    SmtpCommand::MailFrom(between_brackets(argument)),
                ),
                "RCPT" => {
                    let recipient = between_brackets(argument);
                    let reply = config
                        .rcpt_rejections
                        .get(&recipient)
                        .unwrap_or(&config.rcpt_to)
                        .to_bytes();
                    (reply, SmtpCommand::RcptTo(recipient))
                }
                "DATA" => (config.data.to_bytes(), SmtpCommand::Data),
                "QUIT" => {
                    commands.write().await.push(SmtpCommand::Quit);
                    writer.write_all(&config.quit.to_bytes()).await?;
                    writer.flush().await?;
                    return Ok(());
                }
                "STARTTLS" => (
                    SmtpReply::new(502, "Command not implemented").to_bytes(),
                    SmtpCommand::StartTls,
                ),
                _ => (
                    SmtpReply::new(500, "Unknown command").to_bytes(),
                    SmtpCommand::Other(command_line.to_string()),
                ),
            };

            let is_data = command == SmtpCommand::Data;
            commands.write().await.push(command);

            writer.write_all(&reply).await?;
            writer.flush().await?;

            if is_data && config.data.code == 354 {
                let mut content = String::new();

                loop {
                    line.clear();
                    if reader.read_line(&mut line).await? == 0 {
                        return Ok(());
                    }
                    if line.trim_end_matches(['\r', '\n']) == "." {
                        break;
                    }
                    content.push_str(&line);
                }

                commands
                    .write()
                    .await
                    .push(SmtpCommand::MessageContent(content));
                writer.write_all(&config.data_end.to_bytes()).await?;
                writer.flush().await?;
            }
        }
    }
}

pub struct MockSmtpServerBuilder {
    config: MockServerConfig,
}

impl MockSmtpServerBuilder {
    #[must_use]
    pub fn with_greeting(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.greeting = SmtpReply::new(code, message);
        self
    }

    #[must_use]
    pub fn with_mail_from_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.mail_from = SmtpReply::new(code, message);
        self
    }

    /// Reply to RCPT for one address; every other address gets the default
    #[must_use]
    pub fn with_rcpt_rejection(
        mut self,
        address: impl Into<String>,
        code: u16,
        message: impl Into<String>,
    ) -> Self {
        self.config
            .rcpt_rejections
            .insert(address.into(), SmtpReply::new(code, message));
        self
    }

    #[must_use]
    pub fn with_data_end_response(mut self, code: u16, message: impl Into<String>) -> Self {
        self.config.data_end = SmtpReply::new(code, message);
        self
    }

    /// Bind to a random local port and start accepting connections
    pub async fn build(self) -> Result<MockSmtpServer, std::io::Error> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let config = Arc::new(self.config);
        let commands = Arc::new(RwLock::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));
        let shutdown = Arc::new(AtomicBool::new(false));

        let (server_commands, server_connections, server_shutdown) = (
            Arc::clone(&commands),
            Arc::clone(&connections),
            Arc::clone(&shutdown),
        );

        tokio::spawn(async move {
            while !server_shutdown.load(Ordering::Relaxed) {
                let Ok(Ok((stream, _peer))) =
                    timeout(Duration::from_millis(100), listener.accept()).await
                else {
                    continue;
                };

                server_connections.fetch_add(1, Ordering::Relaxed);
                let config = Arc::clone(&config);
                let commands = Arc::clone(&server_commands);

                tokio::spawn(async move {
                    if let Err(e) = MockSmtpServer::handle_client(stream, config, commands).await {
                        tracing::debug!("Mock server client error: {e}");
                    }
                });
            }
        });

        Ok(MockSmtpServer {
            addr,
            commands,
            connections,
            shutdown,
        })
    }
}
