//! Maintenance mode endpoints.

use axum::{extract::State, Json};
use chrono::Utc;
use keyledger_core::{parse_ip_list, MaintenanceConfig, ADMIN_OWNER};
use serde::Deserialize;

use super::router::AppState;
use crate::auth::AdminSession;
use crate::error::ProblemDetails;

/// `allowedAdminIps` is free-form text, one address per line or separated
/// by commas or semicolons.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceRequest {
    pub enabled: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub allowed_admin_ips: Option<String>,
}

/// GET /admin/maintenance
pub async fn get_maintenance(
    _admin: AdminSession,
    State(state): State<AppState>,
) -> Result<Json<MaintenanceConfig>, ProblemDetails> {
    Ok(Json(state.repos.maintenance.get().await?))
}

/// PUT /admin/maintenance
pub async fn update_maintenance(
    _admin: AdminSession,
    State(state): State<AppState>,
    Json(input): Json<MaintenanceRequest>,
) -> Result<Json<MaintenanceConfig>, ProblemDetails> {
    let config = MaintenanceConfig {
        enabled: input.enabled,
        message: input
            .message
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty()),
        allowed_admin_ips: input
            .allowed_admin_ips
            .as_deref()
            .map(parse_ip_list)
            .unwrap_or_default(),
        updated_at: Some(Utc::now()),
        updated_by: Some(ADMIN_OWNER.to_string()),
    };
    state.repos.maintenance.put(&config).await?;
    tracing::warn!(
        enabled = config.enabled,
        allowed_admin_ips = config.allowed_admin_ips.len(),
        "maintenance mode updated"
    );
    Ok(Json(config))
}
