use reqwest::StatusCode;
use strum::{Display, IntoStaticStr};

/// Coarse failure category used for retry decisions, logs and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    Format,
    Auth,
    Quota,
    RateLimit,
    Transient,
    Parse,
    Rejected,
}

/// Failure of an external vision provider, mapped at the adapter boundary so
/// callers never inspect provider-specific error shapes.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Unsupported image format: {0}")]
    UnsupportedFormat(String),

    #[error("Provider authentication or configuration error: {0}")]
    Auth(String),

    #[error("Provider quota or billing limit reached: {0}")]
    Quota(String),

    #[error("Provider rate limited the request")]
    RateLimited,

    #[error("Provider server error (HTTP {status})")]
    Server { status: u16 },

    #[error("Provider request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Provider returned an empty response")]
    EmptyResponse,

    #[error("Failed to parse provider response: {0}")]
    Parse(String),

    #[error("Provider rejected the request (HTTP {status})")]
    Rejected { status: u16 },
}

impl ProviderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProviderError::UnsupportedFormat(_) => ErrorKind::Format,
            ProviderError::Auth(_) => ErrorKind::Auth,
            ProviderError::Quota(_) => ErrorKind::Quota,
            ProviderError::RateLimited => ErrorKind::RateLimit,
            ProviderError::Server { .. } | ProviderError::Network(_) => ErrorKind::Transient,
            ProviderError::EmptyResponse | ProviderError::Parse(_) => ErrorKind::Parse,
            ProviderError::Rejected { .. } => ErrorKind::Rejected,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::RateLimit | ErrorKind::Transient | ErrorKind::Parse
        )
    }

    /// Failures an operator has to fix; retrying will not help.
    pub fn needs_operator(&self) -> bool {
        matches!(self.kind(), ErrorKind::Auth | ErrorKind::Quota)
    }
}

const QUOTA_MARKERS: &[&str] = &[
    "insufficient_quota",
    "quota",
    "billing",
    "credit balance",
    "payment required",
];

/// Map a non-success HTTP response into the provider error taxonomy.
pub fn classify_http_failure(status: StatusCode, body: &str) -> ProviderError {
    let snippet: String = body.chars().take(200).collect();

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::Auth(snippet),
        StatusCode::PAYMENT_REQUIRED => ProviderError::Quota(snippet),
        StatusCode::TOO_MANY_REQUESTS => {
            let lower = body.to_lowercase();
            if QUOTA_MARKERS.iter().any(|m| lower.contains(m)) {
                ProviderError::Quota(snippet)
            } else {
                ProviderError::RateLimited
            }
        }
        StatusCode::REQUEST_TIMEOUT => ProviderError::Server {
            status: status.as_u16(),
        },
        s if s.is_server_error() => ProviderError::Server { status: s.as_u16() },
        s => ProviderError::Rejected { status: s.as_u16() },
    }
}
