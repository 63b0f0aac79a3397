//! Extension points around a send.
//!
//! Callbacks are registered on an explicit [`Hooks`] value that is handed to
//! the batch runner and the template mailer. Every callback for an event runs
//! in registration order with the same [`HookContext`]; the first error stops
//! the dispatch and is reported to the caller as a send failure.

use std::{collections::HashMap, fmt, sync::Arc};

use postq_common::QueuedMessage;
use postq_smtp::OutgoingMessage;

use crate::{
    error::HookError,
    template::{SendRequest, Variables},
    transport::Transport,
};

/// Template label reported by [`Event::AfterSend`] for queued messages
pub const QUEUED_TEMPLATE: &str = "queued email";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    /// Before a queued message is sent; may replace the transport
    QueueBeforeSend,
    /// Before a templated message is sent; may replace the transport
    TemplateBeforeSend,
    /// Once per recipient after a successful send
    AfterSend,
    /// Once after a templated message reached all of its recipients
    AfterSendAll,
}

/// What [`Event::AfterSend`] reports about a delivered recipient
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentNotice {
    pub to: String,
    pub template: String,
    pub subject: String,
    pub html: bool,
    pub body: String,
}

/// Mutable state shared by the callbacks of one dispatch
///
/// `transport` starts empty; a before-send callback that fills it replaces the
/// transport for this message only.
pub struct HookContext<'a> {
    pub message: &'a mut OutgoingMessage,
    pub transport: Option<Arc<dyn Transport>>,
    pub record: Option<&'a QueuedMessage>,
    pub request: Option<&'a SendRequest>,
    pub variables: Option<&'a Variables>,
    pub sent: Option<SentNotice>,
}

impl<'a> HookContext<'a> {
    pub fn new(message: &'a mut OutgoingMessage) -> Self {
        Self {
            message,
            transport: None,
            record: None,
            request: None,
            variables: None,
            sent: None,
        }
    }

    #[must_use]
    pub fn with_record(mut self, record: &'a QueuedMessage) -> Self {
        self.record = Some(record);
        self
    }

    #[must_use]
    pub fn with_request(mut self, request: &'a SendRequest) -> Self {
        self.request = Some(request);
        self
    }

    #[must_use]
    pub fn with_variables(mut self, variables: &'a Variables) -> Self {
        self.variables = Some(variables);
        self
    }

    #[must_use]
    pub fn with_sent(mut self, sent: SentNotice) -> Self {
        self.sent = Some(sent);
        self
    }
}

impl fmt::Debug for HookContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookContext")
            .field("message", &self.message)
            .field("transport", &self.transport)
            .field("record", &self.record.and_then(|r| r.id.as_ref()))
            .field("sent", &self.sent)
            .finish_non_exhaustive()
    }
}

pub type Hook = Arc<dyn Fn(&mut HookContext<'_>) -> Result<(), HookError> + Send + Sync>;

/// Registered callbacks, by event
#[derive(Clone, Default)]
pub struct Hooks {
    registry: HashMap<Event, Vec<Hook>>,
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut counts: Vec<_> = self
            .registry
            .iter()
            .map(|(event, hooks)| (*event, hooks.len()))
            .collect();
        counts.sort_by_key(|(event, _)| format!("{event:?}"));

        f.debug_struct("Hooks").field("registered", &counts).finish()
    }
}

impl Hooks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, event: Event, hook: F)
    where
        F: Fn(&mut HookContext<'_>) -> Result<(), HookError> + Send + Sync + 'static,
    {
        self.registry.entry(event).or_default().push(Arc::new(hook));
    }

    #[must_use]
    pub fn with<F>(mut self, event: Event, hook: F) -> Self
    where
        F: Fn(&mut HookContext<'_>) -> Result<(), HookError> + Send + Sync + 'static,
    {
        self.register(event, hook);
        self
    }

    /// Number of callbacks registered for `event`
    #[must_use]
    pub fn len(&self, event: Event) -> usize {
        self.registry.get(&event).map_or(0, Vec::len)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registry.values().all(Vec::is_empty)
    }

    /// Run every callback for `event`, stopping at the first failure
    pub fn dispatch(&self, event: Event, context: &mut HookContext<'_>) -> Result<(), HookError> {
        let Some(hooks) = self.registry.get(&event) else {
            return Ok(());
        };

        for hook in hooks {
            hook(context)?;
        }

        Ok(())
    }
}
