//! API error responses
//!
//! Maps core errors to HTTP status codes with a small JSON body:
//! `{"error": "<kind>", "message": "<detail>"}`.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use ipam_core::IpamError;
use thiserror::Error;
use tracing::warn;

/// Errors returned by request handlers
#[derive(Debug, Error)]
pub enum ApiError {
    /// Error reported by the IPAM core
    #[error(transparent)]
    Ipam(#[from] IpamError),

    /// Malformed query parameter or path value
    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl ApiError {
    fn status(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            ApiError::Ipam(e) => match e {
                IpamError::InvalidFormat(_) => (StatusCode::BAD_REQUEST, "invalid_format"),
                IpamError::InvalidPrefix(_) => (StatusCode::BAD_REQUEST, "invalid_prefix"),
                IpamError::InvalidRange(_) => (StatusCode::BAD_REQUEST, "invalid_range"),
                IpamError::InvalidConfig(_) => (StatusCode::BAD_REQUEST, "invalid_config"),
                IpamError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
                IpamError::DuplicateKey(_) => (StatusCode::CONFLICT, "duplicate_key"),
                IpamError::Overlap(_) => (StatusCode::CONFLICT, "overlap"),
                IpamError::AlreadyAssigned(_) => (StatusCode::CONFLICT, "already_assigned"),
                IpamError::Exhausted(_) => (StatusCode::CONFLICT, "exhausted"),
                IpamError::ProtectedDelete(_) => (StatusCode::CONFLICT, "protected_delete"),
                IpamError::InvalidTransition(_) => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "invalid_transition")
                }
                IpamError::OutOfRange(_) => (StatusCode::UNPROCESSABLE_ENTITY, "out_of_range"),
                IpamError::InvalidOperation(_) => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "invalid_operation")
                }
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = self.status();
        warn!("Request failed ({}): {}", status, self);

        let body = Json(serde_json::json!({
            "error": kind,
            "message": self.to_string(),
        }));
        (status, body).into_response()
    }
}
