use std::time::Duration;
use thiserror::Error;

/// Top-level error types for uniscrape
#[derive(Error, Debug)]
pub enum CrawlError {
    // Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Invalid configuration file: {path}")]
    InvalidConfig { path: String },

    // Network errors
    #[error("Proxy source unreachable: {source_url} - {message}")]
    SourceFetch { source_url: String, message: String },

    #[error("Invalid URL: {url}")]
    InvalidUrl { url: String },

    // Fetch errors that escaped page-level handling
    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),

    // System errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("Operation cancelled")]
    Cancelled,
}

impl CrawlError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Check if error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::SourceFetch { .. } => true,
            Self::Fetch(e) => e.is_recoverable(),
            Self::Configuration { .. }
            | Self::InvalidConfig { .. }
            | Self::InvalidUrl { .. }
            | Self::Io(_)
            | Self::Internal { .. }
            | Self::Cancelled => false,
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::Configuration { .. } | Self::InvalidConfig { .. } => "configuration",
            Self::SourceFetch { .. } | Self::InvalidUrl { .. } => "network",
            Self::Fetch(e) => e.category(),
            Self::Io(_) => "system",
            Self::Internal { .. } | Self::Cancelled => "internal",
        }
    }
}

/// Outcome kind of a failed fetch. Fetches never panic or raise on network
/// failure; they return one of these so the caller can branch on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("possible bot detection (HTTP {status})")]
    BotDetected { status: u16 },

    #[error("unexpected HTTP status {status}")]
    UnexpectedStatus { status: u16 },

    #[error("proxy connection failed: {message}")]
    ProxyConnection { message: String },

    #[error("request timed out")]
    Timeout,

    #[error("transport error: {message}")]
    Transport { message: String },

    #[error("no working proxy available")]
    NoProxyAvailable,
}

impl FetchError {
    pub fn proxy(message: impl Into<String>) -> Self {
        Self::ProxyConnection { message: message.into() }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport { message: message.into() }
    }

    /// Whether the failure should be charged to the proxy that carried the request
    pub fn penalizes_proxy(&self) -> bool {
        matches!(
            self,
            Self::BotDetected { .. } | Self::ProxyConnection { .. } | Self::Timeout | Self::Transport { .. }
        )
    }

    /// Whether retrying through a different proxy is worthwhile
    pub fn should_rotate_proxy(&self) -> bool {
        self.penalizes_proxy()
    }

    /// Failures the per-site driver can skip past. `NoProxyAvailable` with
    /// mandatory proxies means no page of the site can ever be fetched.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::NoProxyAvailable)
    }

    pub fn category(&self) -> &'static str {
        match self {
            Self::BotDetected { .. } => "bot_detection",
            Self::UnexpectedStatus { .. } => "http_status",
            Self::ProxyConnection { .. } | Self::NoProxyAvailable => "proxy",
            Self::Timeout => "timeout",
            Self::Transport { .. } => "network",
        }
    }
}

/// Errors raised inside the extraction oracle boundary. They never escape
/// `RetryingOracle`, which turns exhaustion into an empty result.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OracleError {
    #[error("oracle rate limit hit")]
    RateLimited,

    #[error("oracle API error (HTTP {status})")]
    Api { status: u16 },

    #[error("oracle transport error: {message}")]
    Transport { message: String },

    #[error("oracle returned an unparseable response: {message}")]
    InvalidResponse { message: String },
}

impl OracleError {
    /// Suggested wait before the next attempt, given a base delay and the
    /// zero-based attempt number
    pub fn retry_delay(&self, base: Duration, attempt: u32) -> Duration {
        match self {
            Self::RateLimited => base * (attempt + 1),
            _ => base,
        }
    }

    /// A malformed answer will not improve on a second ask
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::InvalidResponse { .. })
    }
}

/// Result type alias for uniscrape
pub type CrawlResult<T> = std::result::Result<T, CrawlError>;
