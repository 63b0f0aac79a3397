//! Async SMTP client used by the networked transport.
//!
//! Supports plain TCP with an optional STARTTLS upgrade, multi-line replies and
//! dot-stuffed DATA:
//!
//! ```no_run
//! use postq_smtp::client::SmtpClient;
//!
//! # async fn example() -> Result<(), postq_smtp::ClientError> {
//! let mut client = SmtpClient::connect("localhost:25", "localhost".to_string()).await?;
//! client.read_greeting().await?.into_result()?;
//! client.hello("postq.local").await?.into_result()?;
//! client.mail_from("shop@example.com").await?.into_result()?;
//! client.rcpt_to("customer@example.com").await?.into_result()?;
//! client.data().await?.into_result()?;
//! client.send_data("Subject: hi\r\n\r\nHello").await?.into_result()?;
//! client.quit().await?;
//! # Ok(())
//! # }
//! ```

mod error;
mod response;
mod smtp_client;

pub use error::{ClientError, Result};
pub use response::{Response, ResponseLine};
pub use smtp_client::SmtpClient;
