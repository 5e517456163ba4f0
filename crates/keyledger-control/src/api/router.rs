//! Axum router configuration.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{MatchedPath, Request, State},
    middleware::{self, Next},
    response::Response,
    routing::{delete, get, post, put},
    Router,
};
use keyledger_core::{AccessControl, CasPolicy, Db, Ledger, Repositories, UsageEngine};
use keyledger_telemetry::MetricsRegistry;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::{
    account, agent, agents, bots, dashboard, health, ip_bans, keys, logs, maintenance, platforms,
    public,
};
use crate::auth::SessionStore;

/// Settings the handlers need at runtime.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub cas_policy: CasPolicy,
    /// Admin password until one is stored in the database.
    pub admin_password: String,
    pub session_ttl: chrono::Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            cas_policy: CasPolicy::default(),
            admin_password: "admin".into(),
            session_ttl: chrono::Duration::hours(24),
        }
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub repos: Repositories,
    pub ledger: Ledger,
    pub usage: UsageEngine,
    pub access: AccessControl,
    pub sessions: Arc<SessionStore>,
    pub metrics: Arc<MetricsRegistry>,
}

impl AppState {
    pub fn new(db: Db, config: ApiConfig, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            repos: Repositories::new(db.clone()),
            ledger: Ledger::new(db.clone(), config.cas_policy),
            usage: UsageEngine::new(db.clone(), config.cas_policy),
            access: AccessControl::new(db.clone(), config.cas_policy, config.admin_password),
            sessions: Arc::new(SessionStore::new(config.session_ttl)),
            metrics,
            db,
        }
    }
}

/// Record request count and latency per matched route.
async fn track_http(
    State(metrics): State<Arc<MetricsRegistry>>,
    req: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = req.method().to_string();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".into());

    let response = next.run(req).await;
    metrics.record_http_request(
        &method,
        &route,
        response.status().as_u16(),
        start.elapsed().as_secs_f64(),
    );
    response
}

/// Create the API router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Operational
        .route("/health", get(health::health_check))
        .route("/metrics", get(health::metrics))
        // Public key API
        .route("/api/{platform_id}/credit", get(public::credit))
        .route("/api/{platform_id}/use", post(public::use_tokens))
        // Sessions
        .route("/auth/login", post(account::login))
        .route("/auth/logout", post(account::logout))
        .route("/auth/me", get(account::me))
        .route("/auth/password", post(account::change_password))
        // Admin: dashboard
        .route("/admin/dashboard", get(dashboard::admin_dashboard))
        // Admin: platforms
        .route(
            "/admin/platforms",
            get(platforms::list_platforms).post(platforms::create_platform),
        )
        .route(
            "/admin/platforms/{id}",
            get(platforms::get_platform)
                .put(platforms::update_platform)
                .delete(platforms::delete_platform),
        )
        .route("/admin/platforms/{id}/api", post(platforms::set_api_enabled))
        // Admin: agents
        .route(
            "/admin/agents",
            get(agents::list_agents).post(agents::create_agent),
        )
        .route(
            "/admin/agents/{id}",
            get(agents::get_agent).delete(agents::delete_agent),
        )
        .route("/admin/agents/{id}/credits", post(agents::add_credits))
        .route("/admin/agents/{id}/history", get(agents::credit_history))
        .route("/admin/agents/{id}/status", post(agents::set_status))
        .route("/admin/agents/{id}/ip-ban", post(agents::set_ip_ban_enabled))
        .route(
            "/admin/agents/{id}/keys/{platform_id}/{key}",
            put(agents::set_key_status).delete(agents::delete_key),
        )
        // Admin: standalone keys
        .route(
            "/admin/keys",
            get(keys::list_standalone_keys).post(keys::create_standalone_key),
        )
        .route(
            "/admin/keys/{id}",
            put(keys::set_standalone_key_status).delete(keys::delete_standalone_key),
        )
        // Admin: bots, logs, IP bans, maintenance
        .route("/admin/bots", get(bots::list_bots).post(bots::create_bot))
        .route("/admin/bots/{id}", delete(bots::delete_bot))
        .route("/admin/logs", get(logs::list_logs))
        .route(
            "/admin/ip-bans",
            get(ip_bans::list_admin_bans).post(ip_bans::add_admin_bans),
        )
        .route("/admin/ip-bans/{id}", delete(ip_bans::delete_admin_ban))
        .route(
            "/admin/maintenance",
            get(maintenance::get_maintenance).put(maintenance::update_maintenance),
        )
        // Agent portal
        .route("/agent/profile", get(agent::profile))
        .route("/agent/dashboard", get(agent::dashboard))
        .route("/agent/keys", get(agent::list_keys).post(agent::create_key))
        .route(
            "/agent/keys/{platform_id}/{key}",
            put(agent::set_key_status).delete(agent::delete_key),
        )
        .route(
            "/agent/agents",
            get(agent::list_sub_agents).post(agent::create_sub_agent),
        )
        .route("/agent/agents/{id}", delete(agent::delete_sub_agent))
        .route("/agent/agents/{id}/credits", post(agent::transfer_credits))
        .route("/agent/agents/{id}/status", post(agent::set_sub_agent_status))
        .route(
            "/agent/agents/{id}/expiration",
            put(agent::set_sub_agent_expiration),
        )
        .route("/agent/logs", get(agent::list_logs))
        .route("/agent/platforms", get(agent::list_platforms))
        .route("/agent/bots", get(bots::list_bots_for_agent))
        .route(
            "/agent/ip-bans",
            get(ip_bans::list_agent_bans).post(ip_bans::add_agent_bans),
        )
        .route("/agent/ip-bans/{id}", delete(ip_bans::delete_agent_ban))
        .route_layer(middleware::from_fn_with_state(
            state.metrics.clone(),
            track_http,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
