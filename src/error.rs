//! Error types for keygate.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::crypto::CryptoError;

/// Result type alias for keygate operations.
pub type Result<T> = std::result::Result<T, Error>;

/// A single field-level validation failure.
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

/// Main error type for keygate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Invalid request: {message}")]
    Validation {
        message: String,
        fields: Vec<FieldError>,
    },

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Admin access required")]
    Forbidden,

    #[error("Missing bearer credential")]
    Unauthorized,

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Upstream request failed: {message}")]
    Upstream { status: Option<u16>, message: String },

    #[error("Call log write failed: {0}")]
    Log(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Validation failure without field details.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Error::Validation {
            message: message.into(),
            fields: Vec::new(),
        }
    }

    /// Validation failure carrying the offending fields.
    pub fn invalid_fields(fields: Vec<FieldError>) -> Self {
        let message = fields
            .iter()
            .map(|f| format!("{}: {}", f.field, f.message))
            .collect::<Vec<_>>()
            .join("; ");
        Error::Validation { message, fields }
    }

    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Error::Validation { .. } => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::Forbidden => StatusCode::FORBIDDEN,
            Error::Unauthorized => StatusCode::UNAUTHORIZED,
            Error::Upstream { status, .. } => status
                .and_then(|s| StatusCode::from_u16(s).ok())
                .filter(|s| s.is_client_error() || s.is_server_error())
                .unwrap_or(StatusCode::BAD_GATEWAY),
            Error::Config(_)
            | Error::Crypto(_)
            | Error::Log(_)
            | Error::Database(_)
            | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Error::Validation { .. } => "invalid_request_error",
            Error::NotFound(_) => "not_found_error",
            Error::Conflict(_) => "conflict_error",
            Error::Forbidden => "permission_error",
            Error::Unauthorized => "authentication_error",
            Error::Upstream { .. } => "upstream_error",
            _ => "internal_error",
        }
    }

    /// Message safe to show to clients. Internal failures are replaced by a
    /// fixed string so no envelope, key or SQL detail leaks.
    fn public_message(&self) -> String {
        match self {
            Error::Config(_) | Error::Log(_) | Error::Database(_) | Error::Internal(_) => {
                "Internal server error".to_string()
            }
            Error::Crypto(_) => "Failed to process stored credential".to_string(),
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() && !matches!(self, Error::Upstream { .. }) {
            tracing::error!(error = %self, "Request failed");
        }

        // OpenAI-compatible error format
        let mut error = serde_json::json!({
            "message": self.public_message(),
            "type": self.kind(),
            "code": status.as_u16()
        });
        if let Error::Validation { fields, .. } = &self {
            if !fields.is_empty() {
                error["fields"] = serde_json::json!(fields);
            }
        }

        (status, axum::Json(serde_json::json!({ "error": error }))).into_response()
    }
}
