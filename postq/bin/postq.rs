//! Outbound mail queue processor
//!
//! - `postq run` starts a pass every run interval until Ctrl+C or SIGTERM
//! - `postq once` runs a single pass, for cron; exits non-zero if it halted
//! - `postq send` sends one message immediately, bypassing the queue

use std::{path::PathBuf, process::ExitCode};

use clap::{Parser, Subcommand};
use postq::{Controller, Postq, SHUTDOWN_BROADCAST, controller::shutdown, find_config_file};
use postq_common::{Signal, internal, logging};
use postq_delivery::{Hooks, SendRequest};

#[cfg(not(unix))]
compile_error!("Only unix is currently supported");

#[derive(Parser, Debug)]
#[command(name = "postq")]
#[command(about = "Drain an outbound mail queue", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file; overrides `POSTQ_CONFIG` and the default locations
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process the queue on a schedule until shut down
    Run,
    /// Process one page of the queue and exit
    Once,
    /// Send a single message without queueing it
    Send {
        /// Sender address
        #[arg(long)]
        from: String,
        /// Sender display name
        #[arg(long, default_value = "")]
        from_name: String,
        /// Recipient address; repeat for more recipients
        #[arg(long = "to", required = true)]
        to: Vec<String>,
        #[arg(long, default_value = "")]
        subject: String,
        /// File holding the message body
        #[arg(long)]
        body: PathBuf,
        /// Send as text/plain instead of text/html
        #[arg(long)]
        plain: bool,
        /// Label reported to send hooks
        #[arg(long, default_value = "cli")]
        template: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let config_path = match cli.config {
        Some(path) => path,
        None => find_config_file()?,
    };
    let config = Postq::load(&config_path)?;

    logging::init();
    internal!(level = DEBUG, config = %config_path.display(), "Configuration loaded");

    let controller = Controller::new(config, Hooks::new())?;

    let code = match cli.command {
        Command::Run => {
            let receiver = SHUTDOWN_BROADCAST.subscribe();
            let listener = tokio::spawn(shutdown());

            controller.run(receiver).await?;

            listener.abort();
            let _ = SHUTDOWN_BROADCAST.send(Signal::Finalised);
            ExitCode::SUCCESS
        }
        Command::Once => {
            let mut receiver = SHUTDOWN_BROADCAST.subscribe();
            let listener = tokio::spawn(shutdown());

            let outcome = controller.run_once(&mut receiver).await;

            listener.abort();
            if outcome.is_halted() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
        Command::Send {
            from,
            from_name,
            to,
            subject,
            body,
            plain,
            template,
        } => {
            let body = tokio::fs::read_to_string(&body).await.map_err(|e| {
                anyhow::anyhow!("Failed to read message body from {}: {e}", body.display())
            })?;

            let request = SendRequest {
                template_id: template,
                recipients: to,
                subject,
                body,
                is_plain: plain,
                sender_email: from,
                sender_name: from_name,
                ..SendRequest::default()
            };

            if controller.mailer().send(request).await {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
    };

    Ok(code)
}
