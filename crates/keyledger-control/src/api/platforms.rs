//! Platform management endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use keyledger_core::{
    keygen::{parse_pattern, validate_platform},
    Identified, Platform,
};
use serde::Deserialize;

use super::router::AppState;
use crate::auth::AdminSession;
use crate::error::ProblemDetails;

/// Body of a platform create or update.
///
/// `pattern` is dash-separated (`4-4-4-4`); omitted means the default.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformInput {
    #[serde(default)]
    pub id: Option<String>,
    pub title: String,
    pub prefix: String,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub api_enabled: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct ApiToggle {
    pub enabled: bool,
}

fn build_platform(id: &str, input: PlatformInput) -> Result<Platform, ProblemDetails> {
    let pattern = match input.pattern.as_deref().map(str::trim) {
        Some(p) if !p.is_empty() => parse_pattern(p)?,
        _ => Vec::new(),
    };
    let mut platform = Platform {
        title: input.title.trim().to_string(),
        prefix: input.prefix,
        pattern,
        api_enabled: input.api_enabled,
    };
    validate_platform(id, &mut platform)?;
    Ok(platform)
}

/// GET /admin/platforms
pub async fn list_platforms(
    _admin: AdminSession,
    State(state): State<AppState>,
) -> Result<Json<Vec<Identified<Platform>>>, ProblemDetails> {
    Ok(Json(state.repos.platforms.list().await?))
}

/// POST /admin/platforms
pub async fn create_platform(
    _admin: AdminSession,
    State(state): State<AppState>,
    Json(mut input): Json<PlatformInput>,
) -> Result<(StatusCode, Json<Identified<Platform>>), ProblemDetails> {
    let id = input
        .id
        .take()
        .map(|id| id.trim().to_string())
        .ok_or_else(|| ProblemDetails::bad_request("platform id is required"))?;
    let platform = build_platform(&id, input)?;

    if state.repos.platforms.get(&id).await?.is_some() {
        return Err(ProblemDetails::conflict(format!(
            "platform '{}' already exists",
            id
        )));
    }
    state.repos.platforms.put(&id, &platform).await?;
    tracing::info!(platform = %id, prefix = %platform.prefix, "platform created");

    Ok((
        StatusCode::CREATED,
        Json(Identified {
            id,
            record: platform,
        }),
    ))
}

/// GET /admin/platforms/{id}
pub async fn get_platform(
    _admin: AdminSession,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Identified<Platform>>, ProblemDetails> {
    let platform = state
        .repos
        .platforms
        .get(&id)
        .await?
        .ok_or_else(|| ProblemDetails::not_found(format!("platform '{}' not found", id)))?;
    Ok(Json(Identified {
        id,
        record: platform,
    }))
}

/// PUT /admin/platforms/{id}
///
/// The API switch keeps its stored value unless the body sets it.
pub async fn update_platform(
    _admin: AdminSession,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<PlatformInput>,
) -> Result<Json<Identified<Platform>>, ProblemDetails> {
    let existing = state
        .repos
        .platforms
        .get(&id)
        .await?
        .ok_or_else(|| ProblemDetails::not_found(format!("platform '{}' not found", id)))?;
    let mut platform = build_platform(&id, input)?;
    if platform.api_enabled.is_none() {
        platform.api_enabled = existing.api_enabled;
    }
    state.repos.platforms.put(&id, &platform).await?;
    tracing::info!(platform = %id, "platform updated");

    Ok(Json(Identified {
        id,
        record: platform,
    }))
}

/// DELETE /admin/platforms/{id}
///
/// Keys already issued for the platform are left in place.
pub async fn delete_platform(
    _admin: AdminSession,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ProblemDetails> {
    if state.repos.platforms.get(&id).await?.is_none() {
        return Err(ProblemDetails::not_found(format!("platform '{}' not found", id)));
    }
    state.repos.platforms.delete(&id).await?;
    tracing::info!(platform = %id, "platform deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// POST /admin/platforms/{id}/api
pub async fn set_api_enabled(
    _admin: AdminSession,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(input): Json<ApiToggle>,
) -> Result<Json<Identified<Platform>>, ProblemDetails> {
    if state.repos.platforms.get(&id).await?.is_none() {
        return Err(ProblemDetails::not_found(format!("platform '{}' not found", id)));
    }
    state.repos.platforms.set_api_enabled(&id, input.enabled).await?;
    tracing::info!(platform = %id, enabled = input.enabled, "platform API switched");

    let platform = state
        .repos
        .platforms
        .get(&id)
        .await?
        .ok_or_else(|| ProblemDetails::not_found(format!("platform '{}' not found", id)))?;
    Ok(Json(Identified {
        id,
        record: platform,
    }))
}
