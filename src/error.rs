//! Error types for the agent runtime.
//!
//! All fallible public APIs in this crate return [`Result`], an alias over the
//! single [`Error`] enum. The enum doubles as the retry engine's
//! classification surface: the [`Error::Permanent`] and [`Error::RetryAfter`]
//! variants wrap an inner error and carry retry intent alongside it (see
//! [`crate::retry`]).

use std::time::Duration;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the agent runtime
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Filesystem error (file-backed memory)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Request parameters rejected before any backend call
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Unknown model, subscriber, or other named entity
    #[error("Not found: {0}")]
    NotFound(String),

    /// Unknown tool name in a dispatch request
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// Duplicate provider or model registration
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Credential rejected by the backend
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Backend rate limit hit; transient
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Request timeout; transient
    #[error("Request timeout")]
    Timeout,

    /// Backend temporarily unavailable; transient
    #[error("Unavailable: {0}")]
    Unavailable(String),

    /// Context cancelled, with the cancellation cause
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Capability mismatch, e.g. chat on an embedding-only model
    #[error("Model feature not matched: {0}")]
    FeatureNotMatched(String),

    /// Chat adapter surfaced a session-level failure
    #[error("Chat session failed: {0}")]
    ChatSession(String),

    /// Embedder adapter surfaced a session-level failure
    #[error("Embedding session failed: {0}")]
    EmbeddingSession(String),

    /// API error from the model server
    #[error("API error: {0}")]
    Api(String),

    /// Streaming error
    #[error("Streaming error: {0}")]
    Stream(String),

    /// Tool execution infrastructure error
    #[error("Tool execution error: {0}")]
    Tool(String),

    /// Publish on a closed event bus
    #[error("Event bus already closed")]
    BusClosed,

    /// Terminal failure after retries
    #[error("Failed: {0}")]
    Failed(String),

    /// Internal invariant violation
    #[error("Internal error: {0}")]
    Internal(String),

    /// Retry sentinel: the wrapped error is terminal, stop retrying.
    #[error("{0}")]
    Permanent(#[source] Box<Error>),

    /// Retry sentinel: retry after the given delay, resetting the backoff.
    #[error("{source} (retry after {delay:?})")]
    RetryAfter {
        delay: Duration,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create a new invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    /// Create a new config error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a new not-found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    /// Create a new already-exists error
    pub fn already_exists(msg: impl Into<String>) -> Self {
        Error::AlreadyExists(msg.into())
    }

    /// Create a new unauthorized error
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Error::Unauthorized(msg.into())
    }

    /// Create a new rate-limited error
    pub fn rate_limited(msg: impl Into<String>) -> Self {
        Error::RateLimited(msg.into())
    }

    /// Create a timeout error
    pub fn timeout() -> Self {
        Error::Timeout
    }

    /// Create a new unavailable error
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Error::Unavailable(msg.into())
    }

    /// Create a new cancelled error
    pub fn cancelled(cause: impl Into<String>) -> Self {
        Error::Cancelled(cause.into())
    }

    /// Create a new feature-not-matched error
    pub fn feature_not_matched(msg: impl Into<String>) -> Self {
        Error::FeatureNotMatched(msg.into())
    }

    /// Create a new API error
    pub fn api(msg: impl Into<String>) -> Self {
        Error::Api(msg.into())
    }

    /// Create a new stream error
    pub fn stream(msg: impl Into<String>) -> Self {
        Error::Stream(msg.into())
    }

    /// Create a new tool error
    pub fn tool(msg: impl Into<String>) -> Self {
        Error::Tool(msg.into())
    }

    /// Create a new terminal failure
    pub fn failed(msg: impl Into<String>) -> Self {
        Error::Failed(msg.into())
    }

    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    /// Wrap an error as permanent so the retry engine returns it at once.
    ///
    /// Wrapping an already-permanent error does not nest.
    pub fn permanent(err: Error) -> Self {
        match err {
            Error::Permanent(_) => err,
            other => Error::Permanent(Box::new(other)),
        }
    }

    /// Wrap an error with an explicit retry delay.
    ///
    /// The retry engine sleeps exactly `delay` before the next attempt and
    /// resets its backoff policy.
    pub fn retry_after(delay: Duration, err: Error) -> Self {
        Error::RetryAfter {
            delay,
            source: Box::new(err),
        }
    }

    /// Returns true if this error is wrapped as permanent.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Error::Permanent(_))
    }

    /// Strip retry sentinels, yielding the underlying error.
    pub fn into_inner(self) -> Error {
        match self {
            Error::Permanent(inner) => *inner,
            Error::RetryAfter { source, .. } => *source,
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_invalid_input() {
        let err = Error::invalid_input("Missing parameter");
        assert!(matches!(err, Error::InvalidInput(_)));
        assert_eq!(err.to_string(), "Invalid input: Missing parameter");
    }

    #[test]
    fn test_error_not_found() {
        let err = Error::not_found("model gpt-0");
        assert!(matches!(err, Error::NotFound(_)));
        assert_eq!(err.to_string(), "Not found: model gpt-0");
    }

    #[test]
    fn test_error_already_exists() {
        let err = Error::already_exists("provider openai");
        assert_eq!(err.to_string(), "Already exists: provider openai");
    }

    #[test]
    fn test_error_timeout() {
        let err = Error::timeout();
        assert!(matches!(err, Error::Timeout));
        assert_eq!(err.to_string(), "Request timeout");
    }

    #[test]
    fn test_error_cancelled() {
        let err = Error::cancelled("session closed");
        assert_eq!(err.to_string(), "Cancelled: session closed");
    }

    #[test]
    fn test_permanent_wraps_once() {
        let err = Error::permanent(Error::permanent(Error::unauthorized("bad key")));
        match &err {
            Error::Permanent(inner) => assert!(matches!(**inner, Error::Unauthorized(_))),
            _ => panic!("expected permanent"),
        }
        assert!(err.is_permanent());
    }

    #[test]
    fn test_into_inner_strips_sentinels() {
        let err = Error::retry_after(Duration::from_secs(1), Error::rate_limited("429"));
        assert!(matches!(err.into_inner(), Error::RateLimited(_)));

        let err = Error::permanent(Error::api("boom"));
        assert!(matches!(err.into_inner(), Error::Api(_)));

        assert!(matches!(Error::Timeout.into_inner(), Error::Timeout));
    }

    #[test]
    fn test_error_from_serde_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn test_result_type_alias() {
        fn _returns_result() -> Result<i32> {
            Ok(42)
        }

        fn _returns_error() -> Result<i32> {
            Err(Error::timeout())
        }
    }
}
