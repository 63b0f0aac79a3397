//! Immediate (unqueued) sends of an already rendered template.
//!
//! [`TemplateMailer::send`] shares assembly, hooks and transports with the
//! batch runner but reports a plain success flag: there is no batching,
//! pacing or halting here.

use std::{collections::BTreeMap, sync::Arc};

use postq_common::{config::Endpoint, queued, tracing};
use postq_smtp::{Mailbox, OutgoingMessage};
use serde::Deserialize;

use crate::{
    error::SendError,
    hooks::{Event, HookContext, Hooks, SentNotice},
    transport::{Transport, TransportFactory},
};

/// Values a template was rendered with
pub type Variables = BTreeMap<String, String>;

/// One rendered message for one or more recipients
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendRequest {
    /// Reported to [`Event::AfterSend`] callbacks as the template label
    pub template_id: String,
    pub recipients: Vec<String>,
    /// Display names, by position in `recipients`
    pub names: Vec<String>,
    pub subject: String,
    pub body: String,
    pub is_plain: bool,
    pub sender_email: String,
    pub sender_name: String,
    pub variables: Variables,
}

impl SendRequest {
    pub fn new(
        template_id: impl Into<String>,
        sender_email: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            template_id: template_id.into(),
            sender_email: sender_email.into(),
            subject: subject.into(),
            body: body.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn recipient(mut self, email: impl Into<String>) -> Self {
        self.recipients.push(email.into());
        self
    }

    fn validate(&self) -> Result<(), SendError> {
        if self.sender_email.trim().is_empty() {
            return Err(SendError::Invalid("no sender address".to_string()));
        }
        if !self.recipients.iter().any(|r| !r.trim().is_empty()) {
            return Err(SendError::Invalid("no recipients".to_string()));
        }
        if self.body.trim().is_empty() {
            return Err(SendError::Invalid("empty body".to_string()));
        }

        Ok(())
    }

    /// Give every recipient a display name, falling back to the address' local part
    fn complete_names(&mut self) {
        self.recipients.retain(|r| !r.trim().is_empty());
        self.names.resize(self.recipients.len(), String::new());

        for (name, email) in self.names.iter_mut().zip(&self.recipients) {
            if name.trim().is_empty() {
                *name = local_part(email).to_string();
            }
        }
    }
}

fn local_part(email: &str) -> &str {
    email.split_once('@').map_or(email, |(local, _)| local)
}

/// Envelope sender used by immediate sends
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub enum ReturnPathMode {
    /// Whatever the default transport does
    #[default]
    Off,
    /// Bind the envelope to the request's sender address
    Sender,
    /// Bind the envelope to a fixed address
    Fixed(String),
}

/// The `template` configuration section
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TemplateSettings {
    #[serde(default)]
    pub return_path: ReturnPathMode,
}

#[derive(Debug, Clone)]
pub struct TemplateMailer {
    transports: Arc<dyn TransportFactory>,
    hooks: Hooks,
    endpoint: Endpoint,
    return_path: ReturnPathMode,
}

impl TemplateMailer {
    pub fn new(transports: Arc<dyn TransportFactory>, hooks: Hooks, endpoint: Endpoint) -> Self {
        Self {
            transports,
            hooks,
            endpoint,
            return_path: ReturnPathMode::Off,
        }
    }

    #[must_use]
    pub fn return_path(mut self, mode: ReturnPathMode) -> Self {
        self.return_path = mode;
        self
    }

    /// Send `request` now; `false` on any failure, which is logged
    pub async fn send(&self, request: SendRequest) -> bool {
        let template = request.template_id.clone();

        match self.try_send(request).await {
            Ok(()) => {
                queued!(level = INFO, template = %template, "Template message sent");
                true
            }
            Err(err) => {
                queued!(
                    level = WARN,
                    template = %template,
                    code = err.code(),
                    error = %err,
                    "Template message not sent"
                );
                false
            }
        }
    }

    /// Same as [`Self::send`], keeping the reason for a failure
    pub async fn try_send(&self, mut request: SendRequest) -> Result<(), SendError> {
        request.validate()?;
        request.complete_names();

        if let Some((email, name)) = request.recipients.first().zip(request.names.first()) {
            let (email, name) = (email.clone(), name.clone());
            request.variables.insert("email".to_string(), email);
            request.variables.insert("name".to_string(), name);
        }

        let selected = self.select_transport(&request);
        let mut message = assemble(&request);

        let active = {
            let mut context = HookContext::new(&mut message)
                .with_request(&request)
                .with_variables(&request.variables);
            self.hooks
                .dispatch(Event::TemplateBeforeSend, &mut context)?;
            context.transport.take().unwrap_or(selected)
        };

        active.send(&message).await?;

        for recipient in &request.recipients {
            let notice = SentNotice {
                to: recipient.clone(),
                template: request.template_id.clone(),
                subject: request.subject.clone(),
                html: !request.is_plain,
                body: request.body.clone(),
            };
            let mut context = HookContext::new(&mut message)
                .with_request(&request)
                .with_variables(&request.variables)
                .with_sent(notice);
            self.hooks.dispatch(Event::AfterSend, &mut context)?;
        }

        let mut context = HookContext::new(&mut message)
            .with_request(&request)
            .with_variables(&request.variables);
        self.hooks.dispatch(Event::AfterSendAll, &mut context)?;

        Ok(())
    }

    fn select_transport(&self, request: &SendRequest) -> Arc<dyn Transport> {
        let bound = match &self.return_path {
            ReturnPathMode::Off => None,
            ReturnPathMode::Sender => Some(request.sender_email.trim()),
            ReturnPathMode::Fixed(email) => Some(email.trim()),
        };

        match bound.filter(|email| !email.is_empty()) {
            Some(sender) => {
                tracing::debug!(sender, "Binding template send to envelope sender");
                self.transports.for_envelope_sender(&self.endpoint, sender)
            }
            None => self.transports.pass_default(&self.endpoint),
        }
    }
}

fn assemble(request: &SendRequest) -> OutgoingMessage {
    let mut message = OutgoingMessage::new(Mailbox::new(
        request.sender_email.trim(),
        request.sender_name.clone(),
    ));

    for (email, name) in request.recipients.iter().zip(&request.names) {
        message.add_to(email.trim(), name.clone());
    }

    message.subject.clone_from(&request.subject);
    message.body.clone_from(&request.body);
    message.is_plain = request.is_plain;

    message
}
