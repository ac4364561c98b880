//! Error types for the Druid client.

use std::time::Duration;

/// Errors that can occur when using the Druid client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// HTTP transport error (connection, DNS, TLS, etc.)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Transport error raised by the retry middleware
    #[error("HTTP request error: {0}")]
    HttpMiddleware(#[from] reqwest_middleware::Error),

    /// The caller used the API incorrectly: blank SQL, an operation on a
    /// failed query handle, more than one worker for a role.
    #[error("Usage error: {0}")]
    Usage(String),

    /// Druid reported a failure: a non-2xx response, or an async query or
    /// task that ended in the FAILED state (`status` is `None` then).
    #[error("Druid error{}: {message}", .status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Query {
        /// HTTP status code, when the failure came from an HTTP response
        status: Option<u16>,
        /// Best-effort human-readable message
        message: String,
    },

    /// The cluster has no service that can handle the request: no lead
    /// Coordinator, no Broker, no worker for a role
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// A resource the client positively identified as missing (404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// The server answered with a payload of an unexpected shape
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// URL parsing error
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A join deadline elapsed before the query reached a terminal state
    #[error("Query {id} still {state} after {elapsed:?}")]
    Timeout {
        /// Query or task id
        id: String,
        /// Last observed engine state
        state: String,
        /// Time spent waiting
        elapsed: Duration,
    },
}

impl ClientError {
    pub(crate) fn usage(msg: impl Into<String>) -> Self {
        ClientError::Usage(msg.into())
    }

    pub(crate) fn query(status: Option<u16>, msg: impl Into<String>) -> Self {
        ClientError::Query {
            status,
            message: msg.into(),
        }
    }

    /// Returns true if this error means the requested resource does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound(_))
    }

    /// Returns true if no service was available for a role.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, ClientError::Unavailable(_))
    }

    /// Returns true if the caller misused the API.
    pub fn is_usage(&self) -> bool {
        matches!(self, ClientError::Usage(_))
    }

    /// Returns the HTTP status reported by Druid, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Query { status, .. } => *status,
            ClientError::NotFound(_) => Some(404),
            _ => None,
        }
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
