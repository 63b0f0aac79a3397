//! Run settings for a queue pass.
//!
//! Override values arrive from configuration as opaque numbers or text. They
//! only take effect when they read as a number whose integer part is positive;
//! anything else falls back to the built-in default.

use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};

/// Page size used when no valid override is configured
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// An opaque configuration value, as written by whoever configured the queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Setting {
    Number(f64),
    Text(String),
}

impl Setting {
    /// The value as a finite number, if it reads as one.
    ///
    /// Surrounding whitespace is tolerated in text values.
    #[must_use]
    pub fn numeric(&self) -> Option<f64> {
        let value = match self {
            Self::Number(number) => *number,
            Self::Text(text) => text.trim().parse::<f64>().ok()?,
        };

        value.is_finite().then_some(value)
    }

    /// The value when it is numeric and its integer part is greater than zero
    #[must_use]
    pub fn positive(&self) -> Option<f64> {
        self.numeric().filter(|value| value.trunc() >= 1.0)
    }
}

impl From<&str> for Setting {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<f64> for Setting {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

/// Host and port of the networked transport for a pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

fn default_smtp_host() -> String {
    "localhost".to_string()
}

const fn default_smtp_port() -> u16 {
    25
}

const fn default_run_interval() -> u64 {
    60
}

/// Settings read once at the start of every pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueSettings {
    /// Maximum number of messages selected per pass
    #[serde(default)]
    pub queue_per_run: Option<Setting>,

    /// Milliseconds to pause after each processed message
    #[serde(default)]
    pub queue_pause: Option<Setting>,

    #[serde(default = "default_smtp_host")]
    pub smtp_host: String,

    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,

    /// How often the daemon starts a pass (in seconds)
    #[serde(default = "default_run_interval")]
    pub run_interval_secs: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            queue_per_run: None,
            queue_pause: None,
            smtp_host: default_smtp_host(),
            smtp_port: default_smtp_port(),
            run_interval_secs: default_run_interval(),
        }
    }
}

impl QueueSettings {
    /// The page size for a pass: the override when valid, else [`DEFAULT_BATCH_SIZE`]
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        reason = "positive() guarantees a finite value of at least one"
    )]
    pub fn batch_size(&self) -> usize {
        self.queue_per_run
            .as_ref()
            .and_then(Setting::positive)
            .map_or(DEFAULT_BATCH_SIZE, |size| size.trunc() as usize)
    }

    /// The pause between messages; zero when no valid override is configured.
    ///
    /// Once accepted, the full value (fractional milliseconds included) is used.
    #[must_use]
    pub fn pause(&self) -> Duration {
        self.queue_pause
            .as_ref()
            .and_then(Setting::positive)
            .map_or(Duration::ZERO, |millis| {
                Duration::try_from_secs_f64(millis / 1000.0).unwrap_or(Duration::MAX)
            })
    }

    #[must_use]
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.smtp_host.clone(), self.smtp_port)
    }

    #[must_use]
    pub const fn run_interval(&self) -> Duration {
        Duration::from_secs(self.run_interval_secs)
    }
}
