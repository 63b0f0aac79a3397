//! Wire-level pieces of mail delivery: an async SMTP client and the RFC 5322
//! rendering of an outgoing message.

pub mod client;
pub mod message;

pub use client::{ClientError, Response, SmtpClient};
pub use message::{Mailbox, OutgoingMessage};
