//! Error responses.
//!
//! The admin, agent and auth APIs answer with RFC 9457 Problem Details.
//! The public key API keeps its own `{ok: false, error, message}` envelope,
//! which existing integrations parse by error code.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use keyledger_core::{LedgerError, LoginRefusal, StoreError, UsageError};
use keyledger_telemetry::log_store_error;
use serde::Serialize;

/// RFC 9457 Problem Details response.
#[derive(Debug, Clone, Serialize)]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    pub error_type: String,
    pub title: String,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
}

impl ProblemDetails {
    fn new(kind: &str, title: &str, status: StatusCode, detail: Option<String>) -> Self {
        Self {
            error_type: format!("urn:keyledger:error:{}", kind),
            title: title.into(),
            status: status.as_u16(),
            detail,
            instance: None,
        }
    }

    /// Create a 404 Not Found error.
    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new("not-found", "Not Found", StatusCode::NOT_FOUND, Some(detail.into()))
    }

    /// Create a 400 Bad Request error.
    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self::new("bad-request", "Bad Request", StatusCode::BAD_REQUEST, Some(detail.into()))
    }

    /// Create a 400 error for a debit larger than the balance.
    pub fn insufficient_credits(detail: impl Into<String>) -> Self {
        Self::new(
            "insufficient-credits",
            "Insufficient Credits",
            StatusCode::BAD_REQUEST,
            Some(detail.into()),
        )
    }

    /// Create a 401 Unauthorized error.
    pub fn unauthorized(detail: impl Into<String>) -> Self {
        Self::new("unauthorized", "Unauthorized", StatusCode::UNAUTHORIZED, Some(detail.into()))
    }

    /// Create a 403 Forbidden error.
    pub fn forbidden(detail: impl Into<String>) -> Self {
        Self::new("forbidden", "Forbidden", StatusCode::FORBIDDEN, Some(detail.into()))
    }

    /// Create a 409 Conflict error.
    pub fn conflict(detail: impl Into<String>) -> Self {
        Self::new("conflict", "Conflict", StatusCode::CONFLICT, Some(detail.into()))
    }

    /// Create a 500 Internal Server Error.
    pub fn internal_error() -> Self {
        Self::new(
            "internal-error",
            "Internal Server Error",
            StatusCode::INTERNAL_SERVER_ERROR,
            None,
        )
    }

    /// Create a 503 Service Unavailable error.
    pub fn service_unavailable(detail: impl Into<String>) -> Self {
        Self::new(
            "service-unavailable",
            "Service Unavailable",
            StatusCode::SERVICE_UNAVAILABLE,
            Some(detail.into()),
        )
    }
}

impl IntoResponse for ProblemDetails {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut response = Json(&self).into_response();
        *response.status_mut() = status;
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/problem+json"),
        );
        response
    }
}

/// Store failures are logged here and never echoed to the client.
impl From<StoreError> for ProblemDetails {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidPath(segment) => {
                Self::bad_request(format!("invalid identifier {:?}", segment))
            }
            err => {
                log_store_error!(error = %err, "store error");
                Self::internal_error()
            }
        }
    }
}

impl From<LedgerError> for ProblemDetails {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::NotFound { .. } => Self::not_found(err.to_string()),
            LedgerError::AlreadyExists(detail) => Self::conflict(detail),
            LedgerError::Validation(detail) => Self::bad_request(detail),
            LedgerError::InsufficientCredits { .. } => Self::insufficient_credits(err.to_string()),
            LedgerError::Forbidden(detail) => Self::forbidden(detail),
            LedgerError::Contention(_) => Self::conflict(err.to_string()),
            LedgerError::Store(e) => e.into(),
        }
    }
}

impl From<LoginRefusal> for ProblemDetails {
    fn from(err: LoginRefusal) -> Self {
        match err {
            LoginRefusal::Invalid => Self::unauthorized(err.to_string()),
            LoginRefusal::Banned | LoginRefusal::Expired | LoginRefusal::AdminIpNotAllowed => {
                Self::forbidden(err.to_string())
            }
            LoginRefusal::Maintenance(message) => Self::service_unavailable(message),
            LoginRefusal::Store(e) => e.into(),
        }
    }
}

/// Error envelope of the public key API.
#[derive(Debug)]
pub struct PublicApiError(pub UsageError);

#[derive(Serialize)]
struct PublicErrorBody<'a> {
    ok: bool,
    error: &'a str,
    message: String,
}

impl PublicApiError {
    pub fn status(&self) -> StatusCode {
        match self.0 {
            UsageError::MissingParams(_)
            | UsageError::InvalidJson(_)
            | UsageError::InvalidTokens
            | UsageError::InsufficientTokens { .. } => StatusCode::BAD_REQUEST,
            UsageError::PlatformDisabled | UsageError::IpBanned | UsageError::KeySuspended => {
                StatusCode::FORBIDDEN
            }
            UsageError::KeyNotFound => StatusCode::NOT_FOUND,
            UsageError::Contention => StatusCode::CONFLICT,
            UsageError::Store(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl From<UsageError> for PublicApiError {
    fn from(err: UsageError) -> Self {
        Self(err)
    }
}

impl IntoResponse for PublicApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self.0 {
            UsageError::Store(e) => {
                log_store_error!(error = %e, "store error on public API");
                "the key store is temporarily unavailable".to_string()
            }
            other => other.to_string(),
        };
        let body = PublicErrorBody {
            ok: false,
            error: self.0.code(),
            message,
        };
        (status, Json(body)).into_response()
    }
}
