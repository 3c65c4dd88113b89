//! Error types for the Scope client
//!
//! Every failure surfaced by the library is a [`ScopeError`]. HTTP responses
//! that classify as errors carry an [`ApiError`] with the raw response details.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::transport::TransportError;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, ScopeError>;

/// Kind of an HTTP-classified error, derived from the status code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    /// 401
    Authentication,
    /// 403
    Authorization,
    /// 404
    NotFound,
    /// 409
    Conflict,
    /// 429
    RateLimit,
    /// 5xx
    Server,
    /// Any other status >= 400
    Other,
}

impl ApiErrorKind {
    /// Map an HTTP status code to an error kind
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => ApiErrorKind::Authentication,
            403 => ApiErrorKind::Authorization,
            404 => ApiErrorKind::NotFound,
            409 => ApiErrorKind::Conflict,
            429 => ApiErrorKind::RateLimit,
            500..=599 => ApiErrorKind::Server,
            _ => ApiErrorKind::Other,
        }
    }

    fn default_message(&self, status: u16) -> String {
        match self {
            ApiErrorKind::Authentication => "Authentication failed. Check your API key.".to_string(),
            ApiErrorKind::Authorization => "Access denied. Insufficient permissions.".to_string(),
            ApiErrorKind::NotFound => "Resource not found.".to_string(),
            ApiErrorKind::Conflict => "Resource conflict.".to_string(),
            ApiErrorKind::RateLimit => "Rate limit exceeded. Please retry later.".to_string(),
            ApiErrorKind::Server => "Server error. Please retry later.".to_string(),
            ApiErrorKind::Other => format!("API error (HTTP {})", status),
        }
    }
}

/// Details of an error response returned by the API
#[derive(Debug, Clone, PartialEq)]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub message: String,
    pub status: u16,
    pub body: Option<String>,
    pub error_code: Option<String>,
    pub request_id: Option<String>,
    /// Only set for rate-limit responses carrying a numeric `Retry-After`
    pub retry_after: Option<Duration>,
}

impl ApiError {
    /// Build an error from a status code, using the server message when present
    pub fn from_status(status: u16, message: Option<String>) -> Self {
        let kind = ApiErrorKind::from_status(status);
        let message = message
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| kind.default_message(status));
        Self {
            kind,
            message,
            status,
            body: None,
            error_code: None,
            request_id: None,
            retry_after: None,
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_error_code(mut self, code: Option<String>) -> Self {
        self.error_code = code;
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        if self.kind == ApiErrorKind::RateLimit {
            self.retry_after = retry_after;
        }
        self
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} | HTTP Status: {}", self.message, self.status)?;
        if let Some(code) = &self.error_code {
            write!(f, " | Error Code: {}", code)?;
        }
        if let Some(request_id) = &self.request_id {
            write!(f, " | Request ID: {}", request_id)?;
        }
        Ok(())
    }
}

/// Errors that can occur while talking to the Scope API or rendering prompts
#[derive(Debug, Error)]
pub enum ScopeError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Missing credential: {field} is required")]
    MissingCredential { field: String },

    #[error("{0}")]
    Api(ApiError),

    #[error("{message}")]
    Connection {
        message: String,
        #[source]
        source: Option<TransportError>,
    },

    #[error("{message}")]
    Timeout {
        message: String,
        #[source]
        source: Option<TransportError>,
    },

    #[error("{message}")]
    Validation {
        message: String,
        field: Option<String>,
        value: Option<String>,
    },

    #[error("{message}")]
    Render { message: String, template: String },

    #[error("Missing required variables: {}", missing.join(", "))]
    MissingVariable { missing: Vec<String>, template: String },

    #[error("Prompt '{prompt_id}' has no production version.")]
    NoProductionVersion { prompt_id: String },

    #[error("{0}")]
    InvalidCredentials(String),

    #[error("{message}")]
    TokenRefresh {
        message: String,
        #[source]
        source: Option<TransportError>,
    },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ScopeError {
    /// Shortcut for a connection failure without an underlying transport error
    pub fn connection(message: impl Into<String>) -> Self {
        ScopeError::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// The API error payload, when the failure came from an HTTP response
    pub fn api(&self) -> Option<&ApiError> {
        match self {
            ScopeError::Api(api) => Some(api),
            _ => None,
        }
    }

    /// The classified kind of an HTTP error, if any
    pub fn api_kind(&self) -> Option<ApiErrorKind> {
        self.api().map(|api| api.kind)
    }

    pub fn http_status(&self) -> Option<u16> {
        self.api().map(|api| api.status)
    }

    pub fn http_body(&self) -> Option<&str> {
        self.api().and_then(|api| api.body.as_deref())
    }

    pub fn error_code(&self) -> Option<&str> {
        self.api().and_then(|api| api.error_code.as_deref())
    }

    pub fn request_id(&self) -> Option<&str> {
        self.api().and_then(|api| api.request_id.as_deref())
    }

    /// Server-requested wait before retrying a rate-limited call
    pub fn retry_after(&self) -> Option<Duration> {
        self.api().and_then(|api| api.retry_after)
    }

    pub fn is_not_found(&self) -> bool {
        self.api_kind() == Some(ApiErrorKind::NotFound)
    }

    /// Timeouts are a kind of connection failure
    pub fn is_connection(&self) -> bool {
        matches!(self, ScopeError::Connection { .. } | ScopeError::Timeout { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ScopeError::Timeout { .. })
    }

    /// Missing variables are a kind of render failure
    pub fn is_render(&self) -> bool {
        matches!(self, ScopeError::Render { .. } | ScopeError::MissingVariable { .. })
    }

    /// Check if a fresh attempt could succeed without changing the request
    pub fn is_retryable(&self) -> bool {
        match self {
            ScopeError::Connection { .. } | ScopeError::Timeout { .. } => true,
            ScopeError::Api(api) => matches!(api.status, 429 | 500 | 502 | 503 | 504),
            _ => false,
        }
    }
}
