//! Error types shared by the crawler, its hook chains and the transport layer.
//!
//! `SpiderError` is what hook chains return and what the error chains receive.
//! `FetchError` is the narrower failure of the fetch collaborator; it is routed
//! to the response-error chain wrapped in `SpiderError::Fetch`.

use std::any::Any;
use std::backtrace::Backtrace;
use thiserror::Error;

/// The error type used throughout the crawler.
#[derive(Debug, Error)]
pub enum SpiderError {
    /// The request was malformed before any network activity took place.
    #[error("invalid request `{url}`: {reason}")]
    InvalidRequest { url: String, reason: String },

    /// The fetch collaborator could not complete the exchange.
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    /// A user handler or hook returned an error.
    #[error("handler error: {0}")]
    Handler(#[from] anyhow::Error),

    /// A panic caught at a worker boundary.
    #[error("panic in {stage}: {message}")]
    Panic {
        stage: &'static str,
        message: String,
        backtrace: String,
    },

    #[error("configuration error: {0}")]
    ConfigurationError(String),

    #[error("{0}")]
    GeneralError(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SpiderError {
    /// Builds a handler error from a plain message.
    pub fn handler(message: impl Into<String>) -> Self {
        SpiderError::Handler(anyhow::anyhow!(message.into()))
    }

    /// Converts a caught panic payload into an error value, capturing the
    /// current stack.
    pub(crate) fn from_panic(stage: &'static str, payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        SpiderError::Panic {
            stage,
            message,
            backtrace: Backtrace::force_capture().to_string(),
        }
    }

    /// Returns the captured stack trace for panics.
    pub fn backtrace(&self) -> Option<&str> {
        match self {
            SpiderError::Panic { backtrace, .. } => Some(backtrace),
            _ => None,
        }
    }

    pub fn is_panic(&self) -> bool {
        matches!(self, SpiderError::Panic { .. })
    }
}

/// Failures of the fetch collaborator and the transport middleware chain.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("request has no usable URL: {0}")]
    MissingUrl(String),

    #[error("request dropped by middleware `{middleware}`: {reason}")]
    Dropped { middleware: String, reason: String },

    #[error("{0}")]
    Other(String),
}
