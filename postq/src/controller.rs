use std::{
    sync::{Arc, LazyLock},
    time::Duration,
};

use postq_common::{Signal, config::QueueSettings, internal, tracing};
use postq_delivery::{BatchRunner, Hooks, PassOutcome, TemplateMailer, TransportFactory};
use postq_spool::QueueStore;
use postq_tracing::traced;
use tokio::{
    sync::{
        Mutex,
        broadcast::{self, error::RecvError},
    },
    time::MissedTickBehavior,
};

use crate::config::Postq;

pub static SHUTDOWN_BROADCAST: LazyLock<broadcast::Sender<Signal>> = LazyLock::new(|| {
    let (sender, _receiver) = broadcast::channel(64);
    sender
});

/// Shortest gap between the starts of two scheduled passes
const MIN_RUN_INTERVAL: Duration = Duration::from_secs(1);

/// Owns the queue runner and schedules its passes.
///
/// Passes never overlap: every pass, scheduled or manual, holds `running`.
#[derive(Debug)]
pub struct Controller {
    runner: BatchRunner,
    mailer: TemplateMailer,
    settings: QueueSettings,
    running: Mutex<()>,
}

impl Controller {
    /// Build the store, transports and mailer described by `config`
    ///
    /// # Errors
    ///
    /// If the queue store cannot be opened.
    pub fn new(config: Postq, hooks: Hooks) -> anyhow::Result<Self> {
        let store = config.spool.into_store()?;
        let transports: Arc<dyn TransportFactory> = Arc::new(config.transport);

        let runner = BatchRunner::new(store, Arc::clone(&transports), hooks.clone());
        let mailer = TemplateMailer::new(transports, hooks, config.queue.endpoint())
            .return_path(config.template.return_path);

        Ok(Self {
            runner,
            mailer,
            settings: config.queue,
            running: Mutex::new(()),
        })
    }

    #[must_use]
    pub const fn mailer(&self) -> &TemplateMailer {
        &self.mailer
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn QueueStore> {
        self.runner.store()
    }

    /// Run a single pass, waiting for any pass already in progress
    #[traced(instrument(level = tracing::Level::TRACE, skip_all), timing(precision = "ms"))]
    pub async fn run_once(&self, shutdown: &mut broadcast::Receiver<Signal>) -> PassOutcome {
        let _guard = self.running.lock().await;

        let outcome = self.runner.run_pass_until(&self.settings, shutdown).await;

        match &outcome {
            PassOutcome::Completed(summary) => {
                internal!(level = INFO, "Queue pass finished: {summary}");
            }
            PassOutcome::Halted(reason, summary) => {
                internal!(
                    level = ERROR,
                    error = %reason,
                    "Queue processing stopped early: {summary}"
                );
            }
            PassOutcome::Cancelled(summary) => {
                internal!(level = INFO, "Queue pass interrupted by shutdown: {summary}");
            }
        }

        outcome
    }

    /// Start a pass every run interval until shutdown
    ///
    /// A pass that halts is reported and the next one starts on schedule.
    #[traced(instrument(level = tracing::Level::TRACE, skip_all), timing(precision = "s"))]
    pub async fn run(&self, mut shutdown: broadcast::Receiver<Signal>) -> anyhow::Result<()> {
        let every = self.settings.run_interval().max(MIN_RUN_INTERVAL);
        internal!(
            level = INFO,
            interval_secs = every.as_secs(),
            endpoint = %self.settings.endpoint(),
            "Queue processor running"
        );

        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let stop = tokio::select! {
                _ = interval.tick() => false,
                signal = shutdown.recv() => !matches!(signal, Err(RecvError::Lagged(_))),
            };

            if stop || matches!(self.run_once(&mut shutdown).await, PassOutcome::Cancelled(_)) {
                break;
            }
        }

        internal!(level = INFO, "Queue processor stopped");

        Ok(())
    }
}

/// Wait for Ctrl+C or SIGTERM and broadcast [`Signal::Shutdown`]
#[traced(instrument(level = tracing::Level::TRACE))]
pub async fn shutdown() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!("CTRL+C entered, finishing the current message");
        }
        _ = terminate.recv() => {
            internal!("Terminate Signal received, shutting down");
        }
    };

    SHUTDOWN_BROADCAST
        .send(Signal::Shutdown)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Interrupted, e.to_string()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use postq_common::{MessageParameters, QueuedMessage, Recipient, RecipientKind};
    use postq_delivery::{SendRequest, TransportConfig};
    use postq_spool::{SpoolConfig, config::MemoryConfig};
    use pretty_assertions::assert_eq;

    use super::*;

    /// Memory store and a sendmail stand-in that accepts everything
    fn local_config() -> Postq {
        Postq {
            transport: TransportConfig::Sendmail {
                path: PathBuf::from("true"),
            },
            spool: SpoolConfig::Memory(MemoryConfig::default()),
            ..Postq::default()
        }
    }

    fn queued(subject: &str) -> QueuedMessage {
        QueuedMessage::new(
            MessageParameters {
                subject: subject.to_string(),
                from_email: "shop@example.test".to_string(),
                ..MessageParameters::default()
            },
            "body",
        )
        .with_recipient(Recipient::new("a@example.test", "A", RecipientKind::To))
    }

    #[tokio::test]
    async fn single_pass_drains_the_store() {
        let controller = Controller::new(local_config(), Hooks::new()).unwrap();
        for subject in ["one", "two"] {
            controller.store().enqueue(&mut queued(subject)).await.unwrap();
        }

        let (_tx, mut rx) = broadcast::channel(1);
        let outcome = controller.run_once(&mut rx).await;

        assert!(matches!(outcome, PassOutcome::Completed(_)));
        assert_eq!(outcome.summary().delivered, 2);
        assert!(controller.store().pending(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn shutdown_stops_the_schedule() {
        let controller = Controller::new(local_config(), Hooks::new()).unwrap();
        let (tx, rx) = broadcast::channel(1);
        tx.send(Signal::Shutdown).unwrap();

        // The first tick is immediate, so one pass may run before the signal is seen
        controller.run(rx).await.unwrap();
    }

    #[tokio::test]
    async fn mailer_uses_the_configured_transport() {
        let controller = Controller::new(local_config(), Hooks::new()).unwrap();

        let request = SendRequest::new("cli", "shop@example.test", "Hi", "Hello")
            .recipient("a@example.test");

        assert!(controller.mailer().send(request).await);
    }
}
