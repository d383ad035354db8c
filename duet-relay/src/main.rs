//! Duet relay server -- signaling rendezvous for two-party WebRTC rooms.
//!
//! An axum WebSocket server that pairs up to two participants per named
//! room and forwards their offer/answer/candidate/chat messages to each
//! other. Payloads are relayed untouched; media never passes through here.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:3000
//! cargo run --bin duet-relay
//!
//! # Run on custom address
//! cargo run --bin duet-relay -- --bind 127.0.0.1:8080
//!
//! # Or via the hosting platform's port variable
//! PORT=8080 cargo run --bin duet-relay
//! ```

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use duet_relay::config::{RelayCliArgs, RelayConfig};
use duet_relay::relay::{self, RelayState};
use tracing_appender::non_blocking::WorkerGuard;

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

    let _guard = init_logging(&config.log_level, config.log_file.as_deref());

    tracing::info!(addr = %config.bind_addr, "starting duet relay server");

    let state = Arc::new(RelayState::with_config(config.max_frame_size));

    match relay::start_server_with_state(&config.bind_addr, state).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "relay server listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "relay server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start relay server");
            std::process::exit(1);
        }
    }
}

/// Initializes tracing to stdout, or to `file_path` through a non-blocking
/// writer. The returned guard must live until shutdown so buffered lines
/// are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let Some((log_dir, file_name)) = file_path.and_then(|p| Some((p.parent()?, p.file_name()?)))
    else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
        return None;
    };

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}
