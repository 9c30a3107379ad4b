// Error handling module
// Defines the client error taxonomy and status classification

use reqwest::StatusCode;
use thiserror::Error;

use crate::auth::types::ErrorBody;

/// Status code the backend uses to signal a missing, invalid or expired credential
pub const AUTH_FAILURE_STATUS: u16 = 401;

/// Maximum length for error response bodies kept in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Errors surfaced to callers of the client
#[derive(Error, Debug)]
pub enum ClientError {
    /// Transport-level failure (connect, timeout, broken body)
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Credential missing, invalid or expired
    #[error("Authentication failed: {status} - {message}")]
    AuthenticationFailure { status: u16, message: String },

    /// Request rejected by the backend (bad login, duplicate code, malformed input)
    #[error("Validation error: {status} - {message}")]
    Validation { status: u16, message: String },

    /// Any other non-2xx response
    #[error("HTTP error: {status} - {message}")]
    Http { status: u16, message: String },

    /// The refresh endpoint did not hand out a new credential
    #[error("Token refresh failed: {0}")]
    RefreshFailure(String),

    /// Response body did not have the expected shape
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Internal client error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ClientError {
    /// Classify a non-2xx response
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let status = status.as_u16();
        let message = error_message(body);
        match status {
            AUTH_FAILURE_STATUS => ClientError::AuthenticationFailure { status, message },
            400 | 409 | 422 => ClientError::Validation { status, message },
            _ => ClientError::Http { status, message },
        }
    }

    /// Whether this error should enter the refresh cycle
    pub fn is_authentication_failure(&self) -> bool {
        matches!(self, ClientError::AuthenticationFailure { .. })
    }

    /// HTTP status carried by the error, if the backend answered at all
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::AuthenticationFailure { status, .. }
            | ClientError::Validation { status, .. }
            | ClientError::Http { status, .. } => Some(*status),
            ClientError::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Short label for the kind of transport failure, used in log fields
    pub fn network_kind(error: &reqwest::Error) -> &'static str {
        if error.is_timeout() {
            "timeout"
        } else if error.is_connect() {
            "connection_failed"
        } else if error.is_request() {
            "request_error"
        } else if error.is_body() {
            "body_error"
        } else if error.is_decode() {
            "decode_error"
        } else {
            "unknown"
        }
    }
}

/// Pull the `error` field out of a JSON error body, falling back to the raw text
fn error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => truncate_body(&parsed.error),
        Err(_) => truncate_body(body.trim()),
    }
}

/// Truncate a response body to avoid carrying excessive data around
fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY_LENGTH {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY_LENGTH;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
}

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;
