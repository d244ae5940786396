//! Request pipeline error types.

use client_config::CoreError;
use credential_store::StorageError;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Body of a non-2xx response.
///
/// The raw text is kept unmodified. When it is a JSON object the server's
/// `detail` and per-field messages can be read from it.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorBody {
    raw: String,
    parsed: Option<Value>,
}

impl ErrorBody {
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let parsed = serde_json::from_str(&raw).ok();
        Self { raw, parsed }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn json(&self) -> Option<&Value> {
        self.parsed.as_ref()
    }

    /// The server's `detail` message.
    pub fn detail(&self) -> Option<&str> {
        self.parsed.as_ref()?.get("detail")?.as_str()
    }

    /// Validation messages keyed by field, sorted by field name.
    ///
    /// Accepts both `{"field": ["msg", ...]}` and `{"field": "msg"}`.
    pub fn field_errors(&self) -> Vec<(String, Vec<String>)> {
        let Some(Value::Object(map)) = self.parsed.as_ref() else {
            return Vec::new();
        };

        map.iter()
            .filter(|(field, _)| field.as_str() != "detail")
            .filter_map(|(field, value)| {
                let messages: Vec<String> = match value {
                    Value::String(message) => vec![message.clone()],
                    Value::Array(items) => items
                        .iter()
                        .filter_map(|item| item.as_str().map(str::to_string))
                        .collect(),
                    _ => Vec::new(),
                };
                (!messages.is_empty()).then(|| (field.clone(), messages))
            })
            .collect()
    }

    /// `detail` if present, otherwise the first field message as `field: message`.
    pub fn user_message(&self) -> Option<String> {
        if let Some(detail) = self.detail() {
            return Some(detail.to_string());
        }
        self.field_errors()
            .into_iter()
            .next()
            .and_then(|(field, messages)| {
                messages
                    .into_iter()
                    .next()
                    .map(|message| format!("{field}: {message}"))
            })
    }
}

impl fmt::Display for ErrorBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.user_message() {
            Some(message) => f.write_str(&message),
            None if self.raw.is_empty() => f.write_str("<empty body>"),
            None => f.write_str(&self.raw),
        }
    }
}

/// Request pipeline error type.
#[derive(Error, Debug)]
pub enum ApiError {
    /// Transport failure before a response was received
    #[error("Network error: {0}")]
    Network(String),

    /// No response within the request timeout
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Non-2xx response other than an intercepted 401
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: ErrorBody },

    /// Session renewal failed or the renewed token was refused
    #[error("Session expired")]
    AuthExpired,

    /// Credential storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Response body did not have the expected shape
    #[error("Invalid response body: {0}")]
    Decode(#[from] serde_json::Error),

    /// The request could not be built
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] CoreError),
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_builder() {
            ApiError::InvalidRequest(err.to_string())
        } else {
            ApiError::Network(err.to_string())
        }
    }
}

impl ApiError {
    /// Returns true if this error is transient and the operation can be retried.
    ///
    /// Transient errors include:
    /// - Transport failures and timeouts
    /// - HTTP errors with 5xx status codes
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Network(_) | ApiError::Timeout(_) => true,
            ApiError::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Returns true for failures where the server never answered.
    pub fn is_network(&self) -> bool {
        matches!(self, ApiError::Network(_) | ApiError::Timeout(_))
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Message suitable for showing to the user.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Http { body, status } => body
                .user_message()
                .unwrap_or_else(|| format!("The server rejected the request (HTTP {status}).")),
            ApiError::AuthExpired => "Your session has expired. Please log in again.".to_string(),
            ApiError::Network(_) => "Could not reach the server.".to_string(),
            ApiError::Timeout(_) => "The server took too long to respond.".to_string(),
            _ => "Something went wrong. Please try again.".to_string(),
        }
    }
}

/// Result type alias using ApiError.
pub type ApiResult<T> = Result<T, ApiError>;
