//! Error types for the chat-completion gateway.

use std::time::Duration;
use thiserror::Error;

/// Source of a rate limit: local (our limiter) or remote (provider 429).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitSource {
    /// Our local rate limiter blocked the request.
    Local,
    /// The provider returned a 429 response.
    Remote,
}

/// Additional context from provider errors for debugging.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// HTTP status code from the provider.
    pub http_status: Option<u16>,
    /// Provider-specific error code (e.g. "rate_limit_exceeded").
    pub provider_code: Option<String>,
    /// Request ID from provider (x-request-id header).
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

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.provider_code = Some(code.into());
        self
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }
}

/// Errors that can occur when calling a provider endpoint.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Rate limited - caller should retry after the specified duration.
    #[error("rate limited ({limit_source:?}), retry after {retry_after:?}")]
    RateLimited {
        retry_after: Duration,
        limit_source: RateLimitSource,
        context: Option<ErrorContext>,
    },

    /// Transport-level failure (timeout, connect error) after exhausting
    /// the retry budget.
    #[error("transport error: {message}")]
    Transport {
        message: String,
        context: Option<ErrorContext>,
    },

    /// Provider-level API error - may be retryable (5xx) or permanent (4xx).
    #[error("{provider} error: {message}")]
    Api {
        provider: &'static str,
        message: String,
        retryable: bool,
        context: Option<ErrorContext>,
    },

    /// Response body did not match the expected chat-completion shape.
    #[error("malformed response: {message}")]
    Malformed {
        message: String,
        context: Option<ErrorContext>,
    },

    /// HTTP/network error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Configuration error (missing API key, etc.).
    #[error("configuration error: {0}")]
    Config(String),
}

impl ProviderError {
    /// Create a rate limited error from the remote provider.
    pub fn rate_limited_remote(retry_after: Duration, context: ErrorContext) -> Self {
        Self::RateLimited {
            retry_after,
            limit_source: RateLimitSource::Remote,
            context: Some(context),
        }
    }

    /// Create a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            context: None,
        }
    }

    /// Create a provider API error.
    pub fn api(provider: &'static str, message: impl Into<String>, retryable: bool) -> Self {
        Self::Api {
            provider,
            message: message.into(),
            retryable,
            context: None,
        }
    }

    /// Create a provider API error with context.
    pub fn api_with_context(
        provider: &'static str,
        message: impl Into<String>,
        retryable: bool,
        context: ErrorContext,
    ) -> Self {
        Self::Api {
            provider,
            message: message.into(),
            retryable,
            context: Some(context),
        }
    }

    /// Create a malformed response error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed {
            message: message.into(),
            context: None,
        }
    }

    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Whether this error is worth retrying at the transport level.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } => true,
            Self::Transport { .. } => true,
            Self::Api { retryable, .. } => *retryable,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::Malformed { .. } => false,
            Self::Config(_) => false,
        }
    }

    /// Get a short error code for logging and report rows.
    pub fn code(&self) -> &'static str {
        match self {
            Self::RateLimited {
                limit_source: RateLimitSource::Local,
                ..
            } => "rate_limited_local",
            Self::RateLimited {
                limit_source: RateLimitSource::Remote,
                ..
            } => "rate_limited_remote",
            Self::Transport { .. } => "transport_error",
            Self::Api { .. } => "api_error",
            Self::Malformed { .. } => "malformed_response",
            Self::Http(_) => "http_error",
            Self::Config(_) => "config_error",
        }
    }

    /// Get the error context if available.
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Self::RateLimited { context, .. } => context.as_ref(),
            Self::Transport { context, .. } => context.as_ref(),
            Self::Api { context, .. } => context.as_ref(),
            Self::Malformed { context, .. } => context.as_ref(),
            Self::Http(_) => None,
            Self::Config(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryability_by_variant() {
        assert!(ProviderError::transport("timed out").is_retryable());
        assert!(ProviderError::api("deepseek", "overloaded", true).is_retryable());
        assert!(!ProviderError::api("deepseek", "bad request", false).is_retryable());
        assert!(!ProviderError::malformed("no choices").is_retryable());
        assert!(!ProviderError::config("missing key").is_retryable());
        assert!(
            ProviderError::rate_limited_remote(Duration::from_secs(1), ErrorContext::new())
                .is_retryable()
        );
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(ProviderError::transport("x").code(), "transport_error");
        assert_eq!(ProviderError::malformed("x").code(), "malformed_response");
        assert_eq!(
            ProviderError::rate_limited_remote(Duration::ZERO, ErrorContext::new()).code(),
            "rate_limited_remote"
        );
    }
}
