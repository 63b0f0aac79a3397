//! The `postq.config.ron` file.

use std::path::{Path, PathBuf};

use postq_common::config::QueueSettings;
use postq_delivery::{TemplateSettings, TransportConfig};
use postq_spool::SpoolConfig;
use serde::Deserialize;

/// Environment variable naming the configuration file
pub const CONFIG_ENV: &str = "POSTQ_CONFIG";

/// Everything the processor reads at startup; every section is optional.
///
/// ```ron
/// (
///     queue: (
///         queue_per_run: Some(50),
///         queue_pause: Some("250"),
///         smtp_host: "relay.example.com",
///         smtp_port: 587,
///     ),
///     transport: Smtp(helo: "mailer.example.com"),
///     spool: File((path: "/var/spool/postq")),
///     template: (return_path: Sender),
/// )
/// ```
#[derive(Debug, Default, Deserialize)]
pub struct Postq {
    #[serde(default)]
    pub queue: QueueSettings,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub spool: SpoolConfig,
    #[serde(default)]
    pub template: TemplateSettings,
}

impl Postq {
    pub fn from_ron(content: &str) -> anyhow::Result<Self> {
        Ok(ron::from_str(content)?)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("Failed to read config from {}: {e}", path.display())
        })?;

        Self::from_ron(&content)
            .map_err(|e| anyhow::anyhow!("Invalid config in {}: {e}", path.display()))
    }
}

/// Find the configuration file using the following precedence:
/// 1. `POSTQ_CONFIG` environment variable
/// 2. ./postq.config.ron (current working directory)
/// 3. /etc/postq/postq.config.ron (system-wide config)
pub fn find_config_file() -> anyhow::Result<PathBuf> {
    if let Ok(env_path) = std::env::var(CONFIG_ENV) {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!("{CONFIG_ENV} points to non-existent file: {}", path.display());
    }

    let default_paths = [
        PathBuf::from("./postq.config.ron"),
        PathBuf::from("/etc/postq/postq.config.ron"),
    ];

    if let Some(path) = default_paths.iter().find(|path| path.exists()) {
        return Ok(path.clone());
    }

    let paths_tried = default_paths
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!(
        "No configuration file found. Tried:\n  - {CONFIG_ENV} environment variable\n{paths_tried}"
    )
}

#[cfg(test)]
mod tests {
    use std::{path::PathBuf, time::Duration};

    use postq_common::config::Endpoint;
    use postq_delivery::{ReturnPathMode, StartTls};
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = Postq::from_ron("()").unwrap();

        assert_eq!(config.queue, QueueSettings::default());
        assert_eq!(config.transport, TransportConfig::default());
        assert_eq!(config.template.return_path, ReturnPathMode::Off);
        assert_eq!(
            config.spool.path(),
            Some(std::path::Path::new("/var/spool/postq"))
        );
    }

    #[test]
    fn full_config() {
        let config = Postq::from_ron(
            r#"(
                queue: (
                    queue_per_run: Some(50),
                    queue_pause: Some("250"),
                    smtp_host: "relay.example.com",
                    smtp_port: 587,
                    run_interval_secs: 30,
                ),
                transport: Smtp(helo: "mailer.example.com", starttls: Required),
                spool: Memory((capacity: Some(10))),
                template: (return_path: Fixed("bounce@example.com")),
            )"#,
        )
        .unwrap();

        assert_eq!(config.queue.batch_size(), 50);
        assert_eq!(config.queue.pause(), Duration::from_millis(250));
        assert_eq!(
            config.queue.endpoint(),
            Endpoint::new("relay.example.com", 587)
        );
        assert_eq!(config.queue.run_interval(), Duration::from_secs(30));
        assert!(matches!(
            config.transport,
            TransportConfig::Smtp {
                starttls: StartTls::Required,
                ..
            }
        ));
        assert_eq!(config.spool.path(), None);
        assert_eq!(
            config.template.return_path,
            ReturnPathMode::Fixed("bounce@example.com".to_string())
        );
    }

    #[test]
    fn sendmail_transport() {
        let config = Postq::from_ron(r#"(transport: Sendmail(path: "/usr/bin/msmtp"))"#).unwrap();

        assert_eq!(
            config.transport,
            TransportConfig::Sendmail {
                path: PathBuf::from("/usr/bin/msmtp")
            }
        );
    }

    #[test]
    fn load_reports_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("postq.config.ron");
        std::fs::write(&path, "(queue: ())").unwrap();

        assert!(Postq::load(&path).is_ok());

        std::fs::write(&path, "(queue: ").unwrap();
        let err = Postq::load(&path).unwrap_err().to_string();
        assert!(err.contains("postq.config.ron"), "{err}");

        let missing = Postq::load(&dir.path().join("missing.ron")).unwrap_err();
        assert!(missing.to_string().contains("Failed to read config"));
    }
}
