//! Shared API plumbing: the error type every handler returns and the
//! blocking database helper.

use crate::settings::SettingsError;
use crate::AppState;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use codex_export::ExportError;
use codex_generation::GenerationError;
use codex_identity::IdentityError;
use codex_lightathon::LightathonError;
use codex_observe::ObserveError;
use codex_sharing::ShareError;
use rusqlite::Connection;
use thiserror::Error;

/// API error type mapping to HTTP status codes.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid input: {0}")]
    BadRequest(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// A password-protected share link was opened without a valid grant.
    #[error("password required")]
    PasswordRequired,
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("gone: {0}")]
    Gone(String),
    #[error("too many requests: {0}")]
    TooManyRequests(String),
    #[error("internal server error: {0}")]
    InternalServerError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::PasswordRequired => {
                let body = Json(serde_json::json!({
                    "error": "password required",
                    "password_required": true
                }));
                return (StatusCode::UNAUTHORIZED, body).into_response();
            }
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Gone(msg) => (StatusCode::GONE, msg),
            ApiError::TooManyRequests(msg) => {
                let mut response =
                    (StatusCode::TOO_MANY_REQUESTS, Json(serde_json::json!({ "error": msg })))
                        .into_response();
                response.headers_mut().insert(
                    axum::http::header::RETRY_AFTER,
                    axum::http::HeaderValue::from_static("60"),
                );
                return response;
            }
            ApiError::InternalServerError(msg) => {
                tracing::error!(error = %msg, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = Json(serde_json::json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

impl From<IdentityError> for ApiError {
    fn from(e: IdentityError) -> Self {
        match e {
            IdentityError::InvalidEmail(_)
            | IdentityError::WeakPassword
            | IdentityError::InvalidDisplayName => ApiError::BadRequest(e.to_string()),
            IdentityError::EmailTaken | IdentityError::LastAdmin => {
                ApiError::Conflict(e.to_string())
            }
            IdentityError::InvalidCredentials | IdentityError::SessionInvalid => {
                ApiError::Unauthorized(e.to_string())
            }
            IdentityError::Inactive => ApiError::Forbidden(e.to_string()),
            IdentityError::UserNotFound(_) => ApiError::NotFound(e.to_string()),
            IdentityError::Database(_) => ApiError::InternalServerError(e.to_string()),
        }
    }
}

impl From<GenerationError> for ApiError {
    fn from(e: GenerationError) -> Self {
        match e {
            GenerationError::InvalidInput(msg) => ApiError::BadRequest(msg),
            GenerationError::NotFound(_) => ApiError::NotFound(e.to_string()),
            GenerationError::Busy(_) => ApiError::Conflict(e.to_string()),
            _ => ApiError::InternalServerError(e.to_string()),
        }
    }
}

impl From<ShareError> for ApiError {
    fn from(e: ShareError) -> Self {
        match e {
            ShareError::InvalidInput(msg) => ApiError::BadRequest(msg),
            ShareError::NotFound => ApiError::NotFound(e.to_string()),
            ShareError::NotReady => ApiError::Conflict(e.to_string()),
            ShareError::Revoked | ShareError::Expired => ApiError::Gone(e.to_string()),
            ShareError::InvalidPassword => ApiError::Unauthorized(e.to_string()),
            ShareError::RateLimited => ApiError::TooManyRequests(e.to_string()),
            ShareError::AccessDenied => ApiError::PasswordRequired,
            ShareError::Database(_) | ShareError::Observe(_) => {
                ApiError::InternalServerError(e.to_string())
            }
        }
    }
}

impl From<LightathonError> for ApiError {
    fn from(e: LightathonError) -> Self {
        match e {
            LightathonError::NotEligible => ApiError::BadRequest(e.to_string()),
            LightathonError::NotFound => ApiError::NotFound(e.to_string()),
            LightathonError::DayLocked(_) => ApiError::Forbidden(e.to_string()),
            LightathonError::AlreadyEnrolled
            | LightathonError::NotActive
            | LightathonError::AlreadyCompleted(_) => ApiError::Conflict(e.to_string()),
            LightathonError::Database(_) | LightathonError::Observe(_) => {
                ApiError::InternalServerError(e.to_string())
            }
        }
    }
}

impl From<ObserveError> for ApiError {
    fn from(e: ObserveError) -> Self {
        ApiError::InternalServerError(e.to_string())
    }
}

impl From<ExportError> for ApiError {
    fn from(e: ExportError) -> Self {
        ApiError::InternalServerError(e.to_string())
    }
}

impl From<SettingsError> for ApiError {
    fn from(e: SettingsError) -> Self {
        ApiError::InternalServerError(e.to_string())
    }
}

impl From<rusqlite::Error> for ApiError {
    fn from(e: rusqlite::Error) -> Self {
        ApiError::InternalServerError(format!("database error: {}", e))
    }
}

impl From<r2d2::Error> for ApiError {
    fn from(e: r2d2::Error) -> Self {
        ApiError::InternalServerError(format!("db connection failed: {}", e))
    }
}

/// Runs `f` on a pooled connection inside `spawn_blocking`.
pub async fn with_conn<T, F>(state: &AppState, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&Connection) -> Result<T, ApiError> + Send + 'static,
{
    let pool = state.pool.clone();
    tokio::task::spawn_blocking(move || {
        let conn = pool.get()?;
        f(&conn)
    })
    .await
    .map_err(|e| ApiError::InternalServerError(format!("task join error: {}", e)))?
}

/// Records a usage event, logging instead of failing the request.
pub(crate) fn record_event(
    conn: &Connection,
    user_id: Option<&str>,
    entity_id: &str,
    payload: &codex_observe::EventPayload,
) {
    if let Err(e) = codex_observe::emit_event(conn, user_id, entity_id, payload) {
        tracing::warn!(
            event_type = payload.event_type(),
            "failed to record usage event: {}",
            e
        );
    }
}
