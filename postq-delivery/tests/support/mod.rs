//! Shared fixtures for the delivery integration tests
#![allow(dead_code)]

pub mod mock_server;

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use postq_common::{
    MessageId, MessageParameters, QueuedMessage, Recipient, RecipientKind, config::Endpoint,
};
use postq_delivery::{HookError, Transport, TransportError, TransportFactory, TransportKind};
use postq_smtp::OutgoingMessage;
use postq_spool::{MemoryQueueStore, QueueStore, SpoolError};

/// A queued record with one primary recipient per address
pub fn record(subject: &str, recipients: &[&str]) -> QueuedMessage {
    recipients.iter().fold(
        QueuedMessage::new(
            MessageParameters {
                subject: subject.to_string(),
                is_plain: true,
                from_email: "shop@example.test".to_string(),
                from_name: "Shop".to_string(),
                ..MessageParameters::default()
            },
            format!("Body of {subject}"),
        ),
        |record, email| record.with_recipient(Recipient::new(*email, "", RecipientKind::To)),
    )
}

/// Enqueue `records` in order, returning their ids
pub async fn enqueue_all(store: &dyn QueueStore, records: Vec<QueuedMessage>) -> Vec<MessageId> {
    let mut ids = Vec::with_capacity(records.len());
    for mut record in records {
        ids.push(store.enqueue(&mut record).await.unwrap());
    }
    ids
}

/// How a scripted send fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    Reply(u16),
    Connection,
    Command,
    Hook,
}

impl Failure {
    fn error(self) -> TransportError {
        match self {
            Self::Reply(code) => TransportError::Protocol {
                code,
                message: "scripted reply".to_string(),
            },
            Self::Connection => TransportError::Connection("scripted disconnect".to_string()),
            Self::Command => TransportError::Command("scripted exit status 1".to_string()),
            Self::Hook => TransportError::Hook(HookError::new("scripted hook")),
        }
    }
}

/// One call to [`MockTransport::send`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sent {
    /// Which transport handled the message
    pub via: String,
    pub subject: String,
    pub envelope_sender: String,
    pub recipients: Vec<String>,
    pub succeeded: bool,
}

/// Sends that can be inspected by subject across every transport of a test
#[derive(Debug, Clone, Default)]
pub struct SendLog {
    sent: Arc<Mutex<Vec<Sent>>>,
    failures: Arc<Mutex<HashMap<String, Failure>>>,
}

impl SendLog {
    /// Fail every send of the message with this subject
    pub fn fail(&self, subject: &str, failure: Failure) {
        self.failures
            .lock()
            .unwrap()
            .insert(subject.to_string(), failure);
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn subjects(&self) -> Vec<String> {
        self.sent().into_iter().map(|sent| sent.subject).collect()
    }
}

#[derive(Debug)]
pub struct MockTransport {
    label: String,
    kind: TransportKind,
    bound_sender: Option<String>,
    log: SendLog,
}

impl MockTransport {
    pub fn new(label: impl Into<String>, kind: TransportKind, log: SendLog) -> Self {
        Self {
            label: label.into(),
            kind,
            bound_sender: None,
            log,
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn send(&self, message: &OutgoingMessage) -> Result<(), TransportError> {
        let failure = self.log.failures.lock().unwrap().get(&message.subject).copied();

        self.log.sent.lock().unwrap().push(Sent {
            via: self.label.clone(),
            subject: message.subject.clone(),
            envelope_sender: self
                .bound_sender
                .clone()
                .unwrap_or_else(|| message.envelope_sender().to_string()),
            recipients: message
                .envelope_recipients()
                .into_iter()
                .map(str::to_string)
                .collect(),
            succeeded: failure.is_none(),
        });

        failure.map_or(Ok(()), |failure| Err(failure.error()))
    }
}

/// Builds [`MockTransport`]s that all write to the same [`SendLog`]
///
/// The pass default is labelled `default`; envelope-bound transports are
/// labelled `bound:<sender>`.
#[derive(Debug, Clone)]
pub struct MockFactory {
    pub kind: TransportKind,
    pub log: SendLog,
    endpoints: Arc<Mutex<Vec<Endpoint>>>,
}

impl MockFactory {
    pub fn new(kind: TransportKind) -> Self {
        Self {
            kind,
            log: SendLog::default(),
            endpoints: Arc::default(),
        }
    }

    pub fn networked() -> Self {
        Self::new(TransportKind::Networked)
    }

    /// Endpoints the factory was asked to build for
    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.endpoints.lock().unwrap().clone()
    }
}

impl TransportFactory for MockFactory {
    fn pass_default(&self, endpoint: &Endpoint) -> Arc<dyn Transport> {
        self.endpoints.lock().unwrap().push(endpoint.clone());
        Arc::new(MockTransport::new("default", self.kind, self.log.clone()))
    }

    fn for_envelope_sender(&self, endpoint: &Endpoint, sender: &str) -> Arc<dyn Transport> {
        self.endpoints.lock().unwrap().push(endpoint.clone());
        let mut transport =
            MockTransport::new(format!("bound:{sender}"), self.kind, self.log.clone());
        transport.bound_sender = Some(sender.to_string());
        Arc::new(transport)
    }
}

/// Memory store that can serve unpersisted records and refuse writes
#[derive(Debug, Default)]
pub struct ScriptedStore {
    pub inner: MemoryQueueStore,
    /// Returned ahead of the stored records by `pending`
    pub unpersisted: Vec<QueuedMessage>,
    pub fail_reads: bool,
    pub fail_updates: bool,
}

#[async_trait]
impl QueueStore for ScriptedStore {
    async fn enqueue(&self, message: &mut QueuedMessage) -> postq_spool::Result<MessageId> {
        self.inner.enqueue(message).await
    }

    async fn pending(&self, limit: usize) -> postq_spool::Result<Vec<QueuedMessage>> {
        if self.fail_reads {
            return Err(SpoolError::Internal("scripted read failure".to_string()));
        }

        let stored = self.inner.pending(limit).await?;
        Ok(self
            .unpersisted
            .iter()
            .cloned()
            .chain(stored)
            .take(limit)
            .collect())
    }

    async fn read(&self, id: &MessageId) -> postq_spool::Result<QueuedMessage> {
        self.inner.read(id).await
    }

    async fn update(&self, message: &QueuedMessage) -> postq_spool::Result<()> {
        if self.fail_updates {
            return Err(SpoolError::Internal("scripted write failure".to_string()));
        }
        self.inner.update(message).await
    }

    async fn list(&self) -> postq_spool::Result<Vec<MessageId>> {
        self.inner.list().await
    }

    async fn delete(&self, id: &MessageId) -> postq_spool::Result<()> {
        self.inner.delete(id).await
    }
}
