//! Lobbycast relay server: broadcasts every client message to all other
//! connected clients.
//!
//! An axum WebSocket server for multiplayer game lobbies. The relay never
//! inspects payloads: text and binary frames are forwarded unchanged to
//! every other open connection.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:8080
//! cargo run --bin lobbycast-relay
//!
//! # Run on custom address
//! cargo run --bin lobbycast-relay -- --bind 127.0.0.1:9000
//!
//! # Or via environment variable
//! LOBBYCAST_ADDR=127.0.0.1:9000 cargo run --bin lobbycast-relay
//! ```

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use lobbycast_relay::config::{RelayCliArgs, RelayConfig};
use lobbycast_relay::relay::{self, RelayState};
use lobbycast_relay::shutdown;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() {
    let cli = RelayCliArgs::parse();

    // Load config from CLI args + config file + env vars + defaults.
    let config = match RelayConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    // Held until exit so buffered file logs are flushed.
    let _log_guard = init_logging(&config.log_level, config.log_file.as_deref());

    tracing::info!(addr = %config.bind_addr, "starting lobbycast relay server");

    let state = Arc::new(RelayState::with_config(
        config.max_payload_size,
        config.drain_timeout,
    ));

    match relay::start_server_with_shutdown(&config.bind_addr, state, shutdown::signal()).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "relay server listening, press Ctrl+C to stop");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "relay server task failed");
                std::process::exit(1);
            }
            tracing::info!("relay server stopped");
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start relay server");
            std::process::exit(1);
        }
    }
}

/// Initialize logging to stderr, and to `file_path` when given.
///
/// Returns a [`WorkerGuard`] for the file writer, which must be held until
/// shutdown so all buffered log entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let (file_layer, guard) = match file_path.and_then(split_log_path) {
        Some((dir, file_name)) => {
            let file_appender = tracing_appender::rolling::never(dir, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();

    guard
}

/// Splits a log file path into its directory and file name.
fn split_log_path(path: &Path) -> Option<(&Path, &str)> {
    let file_name = path.file_name()?.to_str()?;
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    Some((dir, file_name))
}
