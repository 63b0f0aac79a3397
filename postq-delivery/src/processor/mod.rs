//! One pass over the queue.
//!
//! A pass reads a single page of pending records and works through it in
//! order. Each record is either delivered, given up on, or (on a fatal
//! transport failure) left pending while the pass stops. Every record the
//! pass finishes with is persisted before the next one is touched.

mod assemble;

use std::{fmt, sync::Arc, time::Duration};

use chrono::Utc;
use postq_common::{
    DeliveryOutcome, MessageId, QueuedMessage, Signal, config::QueueSettings, internal, queued,
    tracing,
};
use postq_smtp::OutgoingMessage;
use postq_spool::QueueStore;
use postq_tracing::traced;
use tokio::sync::broadcast::{self, error::RecvError};

pub use assemble::assemble;

use crate::{
    error::{DeliveryError, TransportError},
    hooks::{Event, HookContext, Hooks, QUEUED_TEMPLATE, SentNotice},
    policy::{Verdict, classify},
    transport::{Transport, TransportFactory},
};

/// Why a pass stopped early
pub type HaltReason = DeliveryError;

/// What a pass did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    /// Records returned by the store
    pub selected: usize,
    pub delivered: usize,
    /// Records given up on after a non-fatal failure
    pub rejected: usize,
    /// Records without an id, which are skipped untouched
    pub invalid: usize,
}

impl fmt::Display for PassSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} selected, {} delivered, {} rejected, {} invalid",
            self.selected, self.delivered, self.rejected, self.invalid
        )
    }
}

#[derive(Debug)]
pub enum PassOutcome {
    /// Every selected record was dealt with
    Completed(PassSummary),
    /// The pass stopped on a fatal failure; unvisited records stay pending
    Halted(HaltReason, PassSummary),
    /// A shutdown signal interrupted the pause between messages
    Cancelled(PassSummary),
}

impl PassOutcome {
    #[must_use]
    pub const fn summary(&self) -> &PassSummary {
        match self {
            Self::Completed(summary) | Self::Halted(_, summary) | Self::Cancelled(summary) => {
                summary
            }
        }
    }

    #[must_use]
    pub const fn is_halted(&self) -> bool {
        matches!(self, Self::Halted(..))
    }
}

/// How a single record ended
enum Processed {
    Delivered,
    Rejected,
}

/// Drains the queue store through a transport.
#[derive(Debug, Clone)]
pub struct BatchRunner {
    store: Arc<dyn QueueStore>,
    transports: Arc<dyn TransportFactory>,
    hooks: Hooks,
}

impl BatchRunner {
    pub fn new(
        store: Arc<dyn QueueStore>,
        transports: Arc<dyn TransportFactory>,
        hooks: Hooks,
    ) -> Self {
        Self {
            store,
            transports,
            hooks,
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn QueueStore> {
        &self.store
    }

    /// Run one pass with the given settings
    pub async fn run_pass(&self, settings: &QueueSettings) -> PassOutcome {
        self.execute(settings, None).await
    }

    /// Run one pass, giving up at the next pause once `shutdown` fires
    pub async fn run_pass_until(
        &self,
        settings: &QueueSettings,
        shutdown: &mut broadcast::Receiver<Signal>,
    ) -> PassOutcome {
        self.execute(settings, Some(shutdown)).await
    }

    #[traced(instrument(level = tracing::Level::DEBUG, skip_all), timing(precision = "ms"))]
    async fn execute(
        &self,
        settings: &QueueSettings,
        mut shutdown: Option<&mut broadcast::Receiver<Signal>>,
    ) -> PassOutcome {
        let batch_size = settings.batch_size();
        let pause = settings.pause();
        let endpoint = settings.endpoint();
        let default_transport = self.transports.pass_default(&endpoint);

        internal!(
            level = DEBUG,
            batch_size,
            pause_ms = pause.as_millis(),
            endpoint = %endpoint,
            "Starting queue pass"
        );

        let mut summary = PassSummary::default();

        let batch = match self.store.pending(batch_size).await {
            Ok(batch) => batch,
            Err(err) => {
                internal!(level = ERROR, error = %err, "Unable to read the queue");
                return PassOutcome::Halted(err.into(), summary);
            }
        };
        summary.selected = batch.len();

        for record in batch {
            let Some(id) = record.id.clone() else {
                queued!(level = WARN, "Skipping queued message without an id");
                summary.invalid += 1;
                continue;
            };

            let transport = match record
                .parameters
                .return_path_email
                .as_deref()
                .map(str::trim)
                .filter(|email| !email.is_empty())
            {
                Some(sender) => self.transports.for_envelope_sender(&endpoint, sender),
                None => Arc::clone(&default_transport),
            };

            match self.process(record, &id, transport).await {
                Ok(Processed::Delivered) => summary.delivered += 1,
                Ok(Processed::Rejected) => summary.rejected += 1,
                Err(reason) => {
                    internal!(level = WARN, summary = %summary, "Queue pass halted");
                    return PassOutcome::Halted(reason, summary);
                }
            }

            if !pause.is_zero() && pause_interrupted(pause, shutdown.as_deref_mut()).await {
                internal!(level = INFO, summary = %summary, "Queue pass cancelled by shutdown");
                return PassOutcome::Cancelled(summary);
            }
        }

        internal!(level = INFO, summary = %summary, "Queue pass complete");

        PassOutcome::Completed(summary)
    }

    async fn process(
        &self,
        mut record: QueuedMessage,
        id: &MessageId,
        selected: Arc<dyn Transport>,
    ) -> Result<Processed, HaltReason> {
        let mut message = assemble(&record);

        let (active, result) = self.attempt(&record, &mut message, selected).await;

        match result {
            Ok(()) => {
                record.mark_processed(Utc::now(), DeliveryOutcome::Delivered);
                self.store.update(&record).await?;

                queued!(level = INFO, message_id = %id, "Message delivered");

                self.notify_recipients(&record, &mut message);

                Ok(Processed::Delivered)
            }
            Err(err) => match classify(&err, active.kind()) {
                Verdict::Fatal => {
                    queued!(
                        level = ERROR,
                        message_id = %id,
                        code = err.code(),
                        verdict = ?Verdict::Fatal,
                        error = %err,
                        "Transport failure, stopping the pass"
                    );
                    tracing::debug!(
                        target: "postq::diagnostics",
                        message_id = %id,
                        transport = ?active,
                        outgoing = ?message,
                        "Failed message"
                    );

                    Err(DeliveryError::Transport {
                        message_id: id.to_string(),
                        source: err,
                    })
                }
                Verdict::Skip => {
                    queued!(
                        level = WARN,
                        message_id = %id,
                        code = err.code(),
                        verdict = ?Verdict::Skip,
                        error = %err,
                        "Giving up on message"
                    );

                    record.mark_processed(
                        Utc::now(),
                        DeliveryOutcome::Rejected {
                            reason: err.to_string(),
                        },
                    );
                    self.store.update(&record).await?;

                    Ok(Processed::Rejected)
                }
            },
        }
    }

    /// Run the before-send hooks and send through whichever transport ends up in charge.
    ///
    /// Returns the transport the failure (if any) must be judged against.
    async fn attempt(
        &self,
        record: &QueuedMessage,
        message: &mut OutgoingMessage,
        selected: Arc<dyn Transport>,
    ) -> (Arc<dyn Transport>, Result<(), TransportError>) {
        let mut context = HookContext::new(message).with_record(record);

        if let Err(err) = self.hooks.dispatch(Event::QueueBeforeSend, &mut context) {
            return (selected, Err(err.into()));
        }

        let active = context.transport.take().unwrap_or(selected);
        let result = active.send(message).await;

        (active, result)
    }

    /// `AfterSend` for every recipient; failures no longer affect the record
    fn notify_recipients(&self, record: &QueuedMessage, message: &mut OutgoingMessage) {
        for recipient in &record.recipients {
            let notice = SentNotice {
                to: recipient.email.clone(),
                template: QUEUED_TEMPLATE.to_string(),
                subject: record.parameters.subject.clone(),
                html: !record.parameters.is_plain,
                body: record.body.clone(),
            };

            let mut context = HookContext::new(message)
                .with_record(record)
                .with_sent(notice);

            if let Err(err) = self.hooks.dispatch(Event::AfterSend, &mut context) {
                queued!(
                    level = WARN,
                    message_id = ?record.id,
                    recipient = %recipient.email,
                    error = %err,
                    "After-send hook failed"
                );
            }
        }
    }
}

/// Sleep for `pause`; `true` if a shutdown signal cut it short
async fn pause_interrupted(
    pause: Duration,
    shutdown: Option<&mut broadcast::Receiver<Signal>>,
) -> bool {
    let Some(shutdown) = shutdown else {
        tokio::time::sleep(pause).await;
        return false;
    };

    let sleep = tokio::time::sleep(pause);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            () = &mut sleep => return false,
            signal = shutdown.recv() => match signal {
                Ok(Signal::Shutdown | Signal::Finalised) => return true,
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => {
                    (&mut sleep).await;
                    return false;
                }
            },
        }
    }
}
