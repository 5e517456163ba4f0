//! Public key API consumed by integrated platforms.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    Json,
};
use keyledger_core::{parse_use_request, KeyStatus, UsageError};
use keyledger_telemetry::{log_key_rejected, log_key_used};
use serde::{Deserialize, Serialize};

use super::router::AppState;
use crate::client_ip::ClientIp;
use crate::error::PublicApiError;

#[derive(Debug, Deserialize)]
pub struct CreditQuery {
    #[serde(default)]
    pub key: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreditResponse {
    pub ok: bool,
    pub tokens_remaining: u64,
    pub status: KeyStatus,
}

#[derive(Debug, Serialize)]
pub struct UseResponse {
    pub ok: bool,
    pub tokens_remaining: u64,
    pub tokens_used: u64,
    pub message: String,
}

fn rejected(state: &AppState, platform_id: &str, endpoint: &str, ip: &str, err: UsageError) -> PublicApiError {
    let code = err.code();
    state.metrics.record_key_check(platform_id, endpoint, code);
    log_key_rejected!(platform = %platform_id, endpoint, ip = %ip, code, "key request rejected");
    PublicApiError(err)
}

/// GET /api/{platform_id}/credit?key=...
pub async fn credit(
    State(state): State<AppState>,
    Path(platform_id): Path<String>,
    Query(query): Query<CreditQuery>,
    ClientIp(ip): ClientIp,
) -> Result<Json<CreditResponse>, PublicApiError> {
    let key = query.key.unwrap_or_default();
    let report = state
        .usage
        .check_credit(&platform_id, &key, &ip)
        .await
        .map_err(|e| rejected(&state, &platform_id, "credit", &ip, e))?;

    state.metrics.record_key_check(&platform_id, "credit", "ok");
    Ok(Json(CreditResponse {
        ok: true,
        tokens_remaining: report.tokens_remaining,
        status: report.status,
    }))
}

/// POST /api/{platform_id}/use
pub async fn use_tokens(
    State(state): State<AppState>,
    Path(platform_id): Path<String>,
    ClientIp(ip): ClientIp,
    body: Bytes,
) -> Result<Json<UseResponse>, PublicApiError> {
    let request =
        parse_use_request(&body).map_err(|e| rejected(&state, &platform_id, "use", &ip, e))?;
    let report = state
        .usage
        .use_tokens(&platform_id, &request.key, request.tokens, &ip)
        .await
        .map_err(|e| rejected(&state, &platform_id, "use", &ip, e))?;

    state.metrics.record_key_check(&platform_id, "use", "ok");
    state
        .metrics
        .record_tokens_consumed(&platform_id, report.tokens_used);
    log_key_used!(
        platform = %platform_id,
        owner = report.owner.log_id(),
        ip = %ip,
        tokens = report.tokens_used,
        remaining = report.tokens_remaining,
        "tokens consumed"
    );

    Ok(Json(UseResponse {
        ok: true,
        tokens_remaining: report.tokens_remaining,
        tokens_used: report.tokens_used,
        message: format!("{} token(s) used", report.tokens_used),
    }))
}
