use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::store::StoreError;

/// Every failure a request can surface, resolved at the service boundary.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed input: bad email syntax, password length, age out of range.
    #[error("{0}")]
    Validation(String),

    #[error("Email already registered")]
    EmailTaken,

    /// Unknown email and wrong password are deliberately indistinguishable.
    #[error("Invalid email or password")]
    InvalidCredentials,

    /// Credentials or token were fine, but the account is not active.
    #[error("Account is disabled")]
    AccountDisabled,

    /// Missing, malformed, expired or otherwise unverifiable bearer token.
    #[error("Could not validate credentials")]
    Unauthenticated,

    #[error("Account not found")]
    NotFound,

    #[error("storage failure")]
    Storage(#[from] StoreError),

    #[error("internal error")]
    Internal(#[source] anyhow::Error),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::EmailTaken => StatusCode::CONFLICT,
            ApiError::InvalidCredentials | ApiError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ApiError::AccountDisabled => StatusCode::FORBIDDEN,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Storage(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn log(&self) {
        match self {
            ApiError::Storage(e) => tracing::error!(error = %e, "storage failure"),
            ApiError::Internal(e) => tracing::error!(error = %e, "internal error"),
            ApiError::InvalidCredentials => tracing::warn!("invalid login attempt"),
            ApiError::Unauthenticated => tracing::warn!("unauthenticated request"),
            _ => tracing::debug!(error = %self, "request rejected"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.log();
        let status = self.status_code();
        // Internal detail stays in the logs.
        let message = if status.is_server_error() {
            "Internal server error".to_string()
        } else {
            self.to_string()
        };
        let body = Json(json!({ "error": message }));
        if status == StatusCode::UNAUTHORIZED {
            (status, [(header::WWW_AUTHENTICATE, "Bearer")], body).into_response()
        } else {
            (status, body).into_response()
        }
    }
}
