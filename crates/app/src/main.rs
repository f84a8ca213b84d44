//! Sparkle client - Main Entry Point
//!
//! Loads the configuration, restores the persisted session, and keeps the
//! connection monitor running until Ctrl-C.

mod settings;

use std::path::PathBuf;

use anyhow::Context;
use sparkle_application::connection::ConnectionChange;
use sparkle_domain::AuthSnapshot;
use sparkle_infrastructure::ClientStack;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let config =
        settings::load_config(config_path.as_deref()).context("failed to load configuration")?;

    info!("Starting Sparkle client v{}", env!("CARGO_PKG_VERSION"));

    let stack = ClientStack::build(config).context("failed to build client stack")?;

    let connection = stack.monitor().add_listener(|change: &ConnectionChange| {
        let status = &change.status;
        if change.event.is_recovery() {
            info!(
                event = ?change.event,
                quality = %status.connection_quality,
                latency_ms = ?status.latency_ms,
                "Connection restored"
            );
        } else {
            warn!(
                event = ?change.event,
                failures = status.consecutive_failures,
                "Connection lost"
            );
        }
    });
    let auth = stack.session().add_listener(|snapshot: &AuthSnapshot| {
        info!(
            state = %snapshot.state,
            user_id = ?snapshot.session.user().map(|u| u.id.as_str()),
            "Auth state changed"
        );
    });

    let snapshot = stack.start().await;
    let status = stack.monitor().force_health_check().await;
    info!(
        auth_state = %snapshot.state,
        online = status.is_online,
        backend_reachable = status.is_backend_reachable,
        quality = %status.connection_quality,
        "Ready; press Ctrl-C to exit"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;

    info!(
        queued = stack.client().queue_len(),
        "Shutting down"
    );
    connection.unsubscribe();
    auth.unsubscribe();
    stack.shutdown();
    Ok(())
}
