// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Clinichat: real-time doctor/patient chat gateway for appointment
//! conversations.

pub mod appointment;
pub mod broadcast;
pub mod config;
pub mod error;
pub mod events;
pub mod identity;
pub mod presence;
pub mod room;
pub mod session;
pub mod state;
pub mod store;
pub mod test_support;
pub mod transport;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::GatewayConfig;
use crate::state::GatewayState;
use crate::transport::build_router;

/// Return current epoch millis.
pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Initialize tracing/logging from config.
///
/// Uses `try_init` so it's safe to call multiple times (e.g. from tests).
pub fn init_tracing(config: &GatewayConfig) {
    use tracing_subscriber::fmt;

    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    let result = match config.log_format.as_str() {
        "json" => fmt::fmt().with_env_filter(filter).json().try_init(),
        _ => fmt::fmt().with_env_filter(filter).try_init(),
    };
    drop(result);
}

/// Run the gateway until SIGTERM/SIGINT, then drain and exit.
pub async fn run(config: GatewayConfig) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    let state = Arc::new(GatewayState::from_config(config, shutdown.clone())?);

    let listener = TcpListener::bind(state.config.bind_addr()).await?;
    info!("clinichat listening on {}", listener.local_addr()?);

    spawn_signal_handler(shutdown.clone());

    // Drain rooms as soon as shutdown starts so in-flight appends finish
    // while axum stops accepting connections.
    let drainer = {
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            state.shutdown.cancelled().await;
            state.drain().await;
        })
    };

    let router = build_router(Arc::clone(&state));
    axum::serve(listener, router).with_graceful_shutdown(shutdown.cancelled_owned()).await?;
    drainer.await?;

    info!("clinichat stopped");
    Ok(())
}

fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
        let mut sigint =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()).ok();

        tokio::select! {
            _ = async {
                match sigterm {
                    Some(ref mut s) => s.recv().await,
                    None => std::future::pending().await,
                }
            } => {
                info!("received SIGTERM");
            }
            _ = async {
                match sigint {
                    Some(ref mut s) => s.recv().await,
                    None => std::future::pending().await,
                }
            } => {
                info!("received SIGINT");
            }
        }
        shutdown.cancel();
    });
}
