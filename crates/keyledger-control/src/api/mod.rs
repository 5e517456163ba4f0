//! REST API handlers.

mod account;
mod agent;
mod agents;
mod bots;
mod dashboard;
mod health;
mod ip_bans;
mod keys;
mod logs;
mod maintenance;
mod platforms;
mod public;
mod router;

#[cfg(test)]
mod tests;

pub use router::{create_router, ApiConfig, AppState};

use axum::body::Bytes;
use serde::de::DeserializeOwned;

use crate::error::ProblemDetails;

/// Decode a JSON body that may be omitted entirely.
pub(crate) fn optional_json<T: DeserializeOwned>(body: &Bytes) -> Result<Option<T>, ProblemDetails> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(body)
        .map(Some)
        .map_err(|e| ProblemDetails::bad_request(format!("invalid JSON body: {}", e)))
}
