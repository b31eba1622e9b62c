//! Error types for the upstream issue-tracker and source-control clients.

use std::time::Duration;
use thiserror::Error;

use crate::normalize::MalformedRecordError;

/// Additional context from upstream errors for debugging.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// HTTP status code from the upstream.
    pub http_status: Option<u16>,
    /// Request path that failed.
    pub path: Option<String>,
    /// Request ID from upstream (x-request-id / x-github-request-id / x-arequestid).
    pub request_id: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }
}

/// Errors that can occur when calling Jira or GitHub.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// Rate limited - retried after the hinted duration when one is given.
    #[error("{upstream} rate limited, retry after {retry_after:?}")]
    RateLimited {
        upstream: &'static str,
        retry_after: Option<Duration>,
        context: ErrorContext,
    },

    /// Credentials rejected - fatal for the affected tenant only.
    #[error("{upstream} rejected credentials for {tenant}")]
    Authentication {
        upstream: &'static str,
        tenant: String,
        context: ErrorContext,
    },

    /// The requested resource does not exist.
    #[error("{upstream} resource not found: {resource}")]
    NotFound {
        upstream: &'static str,
        resource: String,
    },

    /// Upstream error - may be retryable.
    #[error("{upstream} error: {message}")]
    Provider {
        upstream: &'static str,
        message: String,
        retryable: bool,
        context: Option<ErrorContext>,
    },

    /// Response body could not be decoded.
    #[error("{upstream} returned an undecodable body: {message}")]
    Decode {
        upstream: &'static str,
        message: String,
    },

    /// One record of an otherwise readable page did not decode.
    #[error(transparent)]
    MalformedRecord(#[from] MalformedRecordError),

    /// HTTP/network error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Configuration error (missing token for an organization, bad URL, etc.).
    #[error("configuration error: {0}")]
    Config(String),

    /// The retry budget ran out; carries the last failure.
    #[error("gave up after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<UpstreamError>,
    },
}

impl UpstreamError {
    /// Create a provider error.
    pub fn provider(upstream: &'static str, message: impl Into<String>, retryable: bool) -> Self {
        Self::Provider {
            upstream,
            message: message.into(),
            retryable,
            context: None,
        }
    }

    /// Create a provider error with context.
    pub fn provider_with_context(
        upstream: &'static str,
        message: impl Into<String>,
        retryable: bool,
        context: ErrorContext,
    ) -> Self {
        Self::Provider {
            upstream,
            message: message.into(),
            retryable,
            context: Some(context),
        }
    }

    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } => true,
            Self::Provider { retryable, .. } => *retryable,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::Authentication { .. } => false,
            Self::NotFound { .. } => false,
            Self::Decode { .. } => false,
            Self::MalformedRecord(_) => false,
            Self::Config(_) => false,
            Self::RetriesExhausted { .. } => false,
        }
    }

    /// Delay requested by the upstream, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Get a short error code for logging.
    pub fn code(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "rate_limited",
            Self::Authentication { .. } => "authentication",
            Self::NotFound { .. } => "not_found",
            Self::Provider { .. } => "provider_error",
            Self::Decode { .. } => "decode_error",
            Self::MalformedRecord(_) => "malformed_record",
            Self::Http(e) if e.is_timeout() => "timeout",
            Self::Http(_) => "http_error",
            Self::Config(_) => "config_error",
            Self::RetriesExhausted { .. } => "retries_exhausted",
        }
    }

    /// Get the error context if available.
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Self::RateLimited { context, .. } => Some(context),
            Self::Authentication { context, .. } => Some(context),
            Self::Provider { context, .. } => context.as_ref(),
            Self::RetriesExhausted { source, .. } => source.context(),
            Self::NotFound { .. }
            | Self::Decode { .. }
            | Self::MalformedRecord(_)
            | Self::Http(_)
            | Self::Config(_) => None,
        }
    }

    /// Get the request ID if available.
    pub fn request_id(&self) -> Option<&str> {
        self.context().and_then(|c| c.request_id.as_deref())
    }

    /// Strips the retry wrapper so callers can match on the underlying failure.
    pub fn root(&self) -> &UpstreamError {
        match self {
            Self::RetriesExhausted { source, .. } => source.root(),
            other => other,
        }
    }
}
