//! `taskftp-devserver`: in-memory FTP server for local trials.
//!
//! # Usage
//!
//! ```bash
//! # Anonymous access on 127.0.0.1:2121 with a /todo directory
//! cargo run --bin taskftp-devserver -- --dir /todo
//!
//! # Require a login
//! cargo run --bin taskftp-devserver -- --user alice --password secret --dir /todo
//! ```
//!
//! Files live only in memory and are lost when the server exits.

use std::sync::Arc;

use clap::Parser;
use taskftp_devserver::config::{ServerCliArgs, ServerConfig};
use taskftp_devserver::{FileStore, ServerState, start_server};

#[tokio::main]
async fn main() {
    let cli = ServerCliArgs::parse();

    let config = match ServerConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(addr = %config.bind_addr, "starting taskftp dev server");

    let mut state = ServerState::new(FileStore::with_directories(&config.directories));
    if let Some((user, password)) = config.credentials {
        state = state.with_credentials(user, password);
    }

    match start_server(&config.bind_addr, Arc::new(state)).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "dev server listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "dev server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start dev server");
            std::process::exit(1);
        }
    }
}
