//! Draining the outbound queue.
//!
//! [`BatchRunner`] takes one page of pending records from a
//! [`postq_spool::QueueStore`], sends each through a [`Transport`] and records
//! the result. [`policy::classify`] decides whether a failure ends the pass.
//! [`TemplateMailer`] is the immediate, single-message counterpart.

pub mod error;
pub mod hooks;
pub mod policy;
pub mod processor;
pub mod template;
pub mod transport;

pub use error::{DeliveryError, HookError, SendError, TransportError};
pub use hooks::{Event, Hook, HookContext, Hooks, SentNotice};
pub use policy::{FINAL_CODES, Verdict, classify};
pub use processor::{BatchRunner, HaltReason, PassOutcome, PassSummary};
pub use template::{ReturnPathMode, SendRequest, TemplateMailer, TemplateSettings, Variables};
pub use transport::{
    SendmailTransport, SmtpTimeouts, SmtpTransport, StartTls, Transport, TransportConfig,
    TransportFactory, TransportKind,
};
