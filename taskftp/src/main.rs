//! `taskftp`: manage a task list stored as one file on an FTP server.
//!
//! Each invocation downloads the list, applies one change and uploads the
//! result. Configuration via CLI flags, environment variables, or config
//! file (`~/.config/taskftp/config.toml`).
//!
//! ```bash
//! taskftp --host ftp.example.com --user alice --directory /todo list
//! TASKFTP_HOST=127.0.0.1 TASKFTP_PORT=2121 taskftp add "Buy milk"
//! taskftp edit 0190f5c4... --due 2026-11-01 --comment "two litres"
//! ```

use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;

use taskftp::cli;
use taskftp::config::{CliArgs, ClientConfig, TaskCommand};
use taskftp::transport::ftp::FtpConnector;

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();

    let config = match ClientConfig::load(&args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Logs go to a file so stdout carries only command output.
    let _log_guard = init_logging(&args.log_level, args.log_file.as_deref());

    let Some(sync_config) = config.to_sync_config() else {
        eprintln!("No FTP host configured (use --host, TASKFTP_HOST, or [remote] host)");
        return ExitCode::FAILURE;
    };

    let command = args.command.unwrap_or(TaskCommand::List { json: false });
    tracing::info!(remote = %sync_config.endpoint, ?command, "taskftp starting");

    let connector = FtpConnector::new(config.connect_timeout);
    match cli::execute(sync_config, connector, command).await {
        Ok(output) => {
            println!("{output}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initialize file-based logging.
///
/// Returns a [`WorkerGuard`] that must be held until shutdown to ensure all
/// buffered log entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("taskftp.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}
