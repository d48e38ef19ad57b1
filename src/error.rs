//! API error taxonomy and its HTTP rendering.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use crate::api::response::Envelope;
use crate::auth::AuthError;

/// A single rejected input field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Detail of an internal failure, attached to the response so a
/// development-posture layer can surface it.
#[derive(Debug, Clone)]
pub struct InternalDetail(pub String);

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("account is inactive")]
    InactiveAccount,

    #[error("company is inactive")]
    InactiveTenant,

    #[error("authentication required")]
    Unauthenticated,

    #[error("invalid token")]
    InvalidToken,

    #[error("token expired")]
    ExpiredToken,

    #[error("insufficient permissions")]
    Forbidden,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("validation failed")]
    Validation(Vec<FieldError>),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Conflict(String),

    #[error("internal server error")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidCredentials
            | ApiError::InactiveAccount
            | ApiError::Unauthenticated
            | ApiError::InvalidToken
            | ApiError::ExpiredToken => StatusCode::UNAUTHORIZED,
            ApiError::InactiveTenant | ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Validation(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Single-field validation failure.
    pub fn invalid(field: &str, message: &str) -> Self {
        ApiError::Validation(vec![FieldError::new(field, message)])
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidCredentials => ApiError::InvalidCredentials,
            AuthError::InactiveAccount => ApiError::InactiveAccount,
            AuthError::InactiveTenant => ApiError::InactiveTenant,
            AuthError::Unauthenticated => ApiError::Unauthenticated,
            AuthError::InvalidToken(_) => ApiError::InvalidToken,
            AuthError::ExpiredToken => ApiError::ExpiredToken,
            AuthError::Forbidden => ApiError::Forbidden,
            AuthError::InvalidApiKey => ApiError::Unauthenticated,
            AuthError::Provider(msg) | AuthError::Signing(msg) => {
                ApiError::Internal(anyhow::anyhow!(msg))
            }
            AuthError::Store(e) => ApiError::Internal(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (errors, detail) = match &self {
            ApiError::Validation(fields) => (
                Some(serde_json::to_value(fields).unwrap_or_default()),
                None,
            ),
            ApiError::Internal(e) => {
                tracing::error!(error = ?e, "request failed with internal error");
                (None, Some(format!("{e:#}")))
            }
            _ => (None, None),
        };

        let mut response = Envelope::failure(status, self.to_string(), errors).into_response();
        if let Some(detail) = detail {
            response.extensions_mut().insert(InternalDetail(detail));
        }
        response
    }
}

/// Heuristic for SurrealDB unique-index violations.
pub fn is_unique_violation(err: &anyhow::Error) -> bool {
    let msg = err.to_string();
    msg.contains("already contains")
}
