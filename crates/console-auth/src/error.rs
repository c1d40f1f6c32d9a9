//! Error types for the authenticated client.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Code used when neither the envelope nor the transport supplied one.
pub const FALLBACK_ERROR_CODE: i64 = 500;

/// Message used when neither the envelope nor the transport supplied one.
pub const FALLBACK_ERROR_MESSAGE: &str = "Request failed";

/// Uniform failure shape surfaced to callers.
///
/// `code` is the envelope's code, else the HTTP status, else 500.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Just the fields of an error envelope we care about; everything optional
/// so that a non-JSON or partial body still normalizes.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl ApiError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Normalize a non-success HTTP response.
    pub fn from_response(status: u16, body: &[u8]) -> Self {
        let parsed: ErrorBody = serde_json::from_slice(body).unwrap_or_default();

        let code = parsed
            .code
            .filter(|c| *c != 0)
            .or_else(|| (status != 0).then_some(i64::from(status)))
            .unwrap_or(FALLBACK_ERROR_CODE);

        let message = parsed
            .message
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| {
                if status != 0 {
                    format!("Request failed with status code {}", status)
                } else {
                    FALLBACK_ERROR_MESSAGE.to_string()
                }
            });

        Self {
            code,
            message,
            details: parsed.error.filter(|e| !e.is_empty()),
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.code == 401
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)?;
        if let Some(details) = &self.details {
            write!(f, ": {}", details)?;
        }
        Ok(())
    }
}

impl std::error::Error for ApiError {}

/// Authentication error type.
#[derive(Error, Debug)]
pub enum AuthError {
    /// Backend returned a non-success response
    #[error("API error: {0}")]
    Api(ApiError),

    /// Request was rejected as unauthorized and not recovered
    #[error("Unauthorized: {0}")]
    Unauthorized(ApiError),

    /// Access token renewal failed; the session has been cleared
    #[error("Token renewal failed: {0}")]
    RenewalFailed(ApiError),

    /// No session present
    #[error("Not logged in")]
    NotLoggedIn,

    /// Invalid state transition in the session FSM
    #[error("Invalid session state transition: {0}")]
    InvalidStateTransition(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] console_storage::StorageError),

    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parse error
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Timeout error
    #[error("Request timed out")]
    Timeout,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl AuthError {
    /// Collapse any failure into the uniform `{ code, message, details }` shape.
    pub fn to_api_error(&self) -> ApiError {
        match self {
            AuthError::Api(e) | AuthError::Unauthorized(e) | AuthError::RenewalFailed(e) => {
                e.clone()
            }
            AuthError::NotLoggedIn => ApiError::new(401, "Not logged in"),
            AuthError::Http(e) => ApiError::new(
                e.status()
                    .map(|s| i64::from(s.as_u16()))
                    .unwrap_or(FALLBACK_ERROR_CODE),
                e.to_string(),
            ),
            other => ApiError::new(FALLBACK_ERROR_CODE, other.to_string()),
        }
    }

    /// True when the failure means the caller no longer holds a session.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            AuthError::Unauthorized(_) | AuthError::RenewalFailed(_) | AuthError::NotLoggedIn
        )
    }
}

impl From<console_config_and_utils::CoreError> for AuthError {
    fn from(e: console_config_and_utils::CoreError) -> Self {
        AuthError::Config(e.to_string())
    }
}

/// Result type alias using AuthError.
pub type AuthResult<T> = Result<T, AuthError>;
