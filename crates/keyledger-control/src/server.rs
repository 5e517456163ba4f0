//! keyledger HTTP server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use keyledger_core::{Db, Ledger};
use keyledger_telemetry::{log_agent_expired, log_listening, log_shutdown, MetricsRegistry};
use tokio::net::TcpListener;

use crate::api::{create_router, ApiConfig, AppState};
use crate::auth::SessionStore;

/// Server configuration.
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub db: Db,
    pub api: ApiConfig,
    /// How often expired agents and sessions are swept.
    pub sweep_interval: Duration,
    pub metrics: Arc<MetricsRegistry>,
}

/// Run the server until ctrl-c.
pub async fn run(config: ServerConfig) -> anyhow::Result<()> {
    let state = AppState::new(config.db, config.api, config.metrics);

    // Start the expiry sweep task
    let sweep_ledger = state.ledger.clone();
    let sweep_sessions = state.sessions.clone();
    let sweep_metrics = state.metrics.clone();
    let interval = config.sweep_interval;
    tokio::spawn(async move {
        run_expiry_sweep(sweep_ledger, sweep_sessions, sweep_metrics, interval).await;
    });

    let app = create_router(state);

    // Bind and serve
    let listener = TcpListener::bind(config.listen_addr).await?;
    log_listening!(addr = %config.listen_addr, "keyledger listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    log_shutdown!("keyledger stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}

/// Periodically deletes expired agents and drops expired sessions.
///
/// Expired agents are also refused at login; the sweep catches the ones
/// that never log in again.
async fn run_expiry_sweep(
    ledger: Ledger,
    sessions: Arc<SessionStore>,
    metrics: Arc<MetricsRegistry>,
    every: Duration,
) {
    let mut interval = tokio::time::interval(every);
    interval.tick().await; // skip immediate first tick

    loop {
        interval.tick().await;
        let now = Utc::now();

        match ledger.sweep_expired_agents(now).await {
            Ok(removed) => {
                for agent_id in &removed {
                    sessions.revoke_agent(agent_id);
                    log_agent_expired!(agent_id = %agent_id, "expired agent removed");
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to sweep expired agents");
            }
        }

        let pruned = sessions.prune(now);
        if pruned > 0 {
            tracing::debug!(count = pruned, "pruned expired sessions");
        }
        metrics.set_active_sessions(i64::try_from(sessions.len()).unwrap_or(i64::MAX));
    }
}
