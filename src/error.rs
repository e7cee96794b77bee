//! Error types for image generation routing.

use serde::Serialize;
use std::time::Duration;

/// Maximum number of characters kept from an upstream error body.
const MAX_DETAIL_CHARS: usize = 500;

/// Canonical error classification.
///
/// Every failure, regardless of which provider served the request, collapses
/// into exactly one of these kinds before it reaches a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    /// Client input defect. Never retried.
    InvalidRequest,
    /// The provider rejected our credential (server misconfiguration).
    ProviderAuthFailed,
    /// The provider throttled us.
    RateLimited,
    /// The provider explicitly failed or could not be reached.
    ProviderUnavailable,
    /// A local deadline elapsed.
    Timeout,
    /// The provider answered but the payload was unusable.
    UnexpectedResponse,
    /// Anything unclassified.
    Internal,
}

impl ErrorKind {
    /// HTTP status a front door should answer with for this kind.
    ///
    /// Auth failures are reported as 500: they are our misconfiguration, not
    /// something the client can act on.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidRequest => 400,
            Self::RateLimited => 429,
            Self::Timeout => 504,
            Self::ProviderAuthFailed
            | Self::ProviderUnavailable
            | Self::UnexpectedResponse
            | Self::Internal => 500,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::InvalidRequest => "invalid_request",
            Self::ProviderAuthFailed => "provider_auth_failed",
            Self::RateLimited => "rate_limited",
            Self::ProviderUnavailable => "provider_unavailable",
            Self::Timeout => "timeout",
            Self::UnexpectedResponse => "unexpected_response",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Errors that can occur while routing a generation request.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    /// Request failed validation.
    #[error("invalid request: {message} ({details})")]
    InvalidRequest {
        /// Short client-facing summary, e.g. "Prompt is required".
        message: String,
        /// Longer client-facing explanation.
        details: String,
    },

    /// Provider returned 401/403.
    #[error("provider authentication failed: {0}")]
    ProviderAuthFailed(String),

    /// Provider returned 429.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited {
        /// Parsed `Retry-After` hint, if the provider sent one.
        retry_after: Option<Duration>,
    },

    /// Provider reported an explicit failure or could not be reached.
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Local deadline exceeded.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// Provider responded with a non-2xx status we don't classify, or a
    /// success payload without usable image data.
    #[error("unexpected response (status {status:?}): {message}")]
    UnexpectedResponse {
        /// Upstream HTTP status when the failure came from one.
        status: Option<u16>,
        /// What was wrong with the response.
        message: String,
    },

    /// No credential is configured for the selected provider.
    #[error("missing credential for provider {0}")]
    MissingCredential(String),

    /// The caller went away before the request finished.
    #[error("request cancelled")]
    Cancelled,

    /// Network or HTTP transport error.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration file or settings.
    #[error("configuration error: {0}")]
    Config(String),

    /// Unclassified internal failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GenerationError {
    /// Shorthand for a validation failure.
    pub fn invalid(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
            details: details.into(),
        }
    }

    /// Shorthand for a 2xx response that carried no usable image.
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::UnexpectedResponse {
            status: None,
            message: message.into(),
        }
    }

    /// Canonical kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidRequest { .. } => ErrorKind::InvalidRequest,
            Self::ProviderAuthFailed(_) => ErrorKind::ProviderAuthFailed,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::ProviderUnavailable(_) => ErrorKind::ProviderUnavailable,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::UnexpectedResponse { .. } | Self::Json(_) => ErrorKind::UnexpectedResponse,
            Self::Network(e) if e.is_timeout() => ErrorKind::Timeout,
            Self::Network(e) if e.is_decode() => ErrorKind::UnexpectedResponse,
            Self::Network(_) => ErrorKind::ProviderUnavailable,
            Self::MissingCredential(_) | Self::Cancelled | Self::Config(_) | Self::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// HTTP status mirroring [`Self::kind`].
    pub fn http_status(&self) -> u16 {
        self.kind().http_status()
    }

    /// Client-facing summary. Never contains provider bodies or credentials.
    pub fn message(&self) -> &str {
        match self {
            Self::InvalidRequest { message, .. } => message,
            Self::ProviderAuthFailed(_) => "API authentication failed",
            Self::RateLimited { .. } => "Rate limit exceeded",
            Self::ProviderUnavailable(_) | Self::UnexpectedResponse { .. } | Self::Json(_) => {
                "Image generation failed"
            }
            Self::Timeout(_) => "Image generation timed out",
            Self::Network(e) if e.is_timeout() => "Image generation timed out",
            Self::Network(_) => "Image generation failed",
            Self::MissingCredential(_) | Self::Config(_) => "Server configuration error",
            Self::Cancelled | Self::Internal(_) => "Internal server error",
        }
    }

    /// Client-facing explanation to accompany [`Self::message`].
    pub fn details(&self) -> Option<String> {
        match self {
            Self::InvalidRequest { details, .. } => Some(details.clone()),
            Self::ProviderAuthFailed(_) => Some("Invalid API key. Please contact support.".into()),
            Self::RateLimited { .. } => Some("Too many requests. Please try again later.".into()),
            Self::ProviderUnavailable(_) => Some("The AI service reported a failure".into()),
            Self::UnexpectedResponse {
                status: Some(status),
                ..
            } => Some(format!("AI service returned {status}")),
            Self::UnexpectedResponse { status: None, .. } | Self::Json(_) => {
                Some("No image data returned by AI service".into())
            }
            Self::Timeout(d) => Some(format!(
                "The AI service did not finish within {}s",
                d.as_secs()
            )),
            Self::Network(e) if e.is_timeout() => {
                Some("The AI service did not respond in time".into())
            }
            Self::Network(_) => Some("Could not reach the AI service".into()),
            Self::MissingCredential(_) => {
                Some("API key not configured. Please contact support.".into())
            }
            Self::Cancelled | Self::Config(_) | Self::Internal(_) => None,
        }
    }

    /// Provider-originated detail for server-side logs.
    pub fn provider_detail(&self) -> Option<String> {
        match self {
            Self::ProviderAuthFailed(d) | Self::ProviderUnavailable(d) => Some(d.clone()),
            Self::UnexpectedResponse { message, .. } => Some(message.clone()),
            Self::Network(e) => Some(e.to_string()),
            Self::Json(e) => Some(e.to_string()),
            _ => None,
        }
    }

    /// Returns true if a caller could reasonably resubmit later.
    ///
    /// Informational only; nothing in this crate retries on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::RateLimited | ErrorKind::Timeout | ErrorKind::ProviderUnavailable
        )
    }

    /// Returns the suggested retry delay, if available.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Maps a non-2xx upstream status to a canonical error.
///
/// 401/403 become auth failures and 429 passes through as rate limiting.
/// Everything else is an unexpected response carrying the upstream status
/// and a sanitized copy of its body.
pub(crate) fn from_status(
    status: u16,
    body: &str,
    headers: &reqwest::header::HeaderMap,
) -> GenerationError {
    let body = sanitize_error_message(body);
    match status {
        401 | 403 => GenerationError::ProviderAuthFailed(body),
        429 => GenerationError::RateLimited {
            retry_after: parse_retry_after(headers).map(Duration::from_secs),
        },
        _ => GenerationError::UnexpectedResponse {
            status: Some(status),
            message: body,
        },
    }
}

/// Reads a `Retry-After` header given in whole seconds.
pub(crate) fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// Collapses whitespace and truncates an upstream error body.
///
/// Base64 blobs echoed back in error bodies can be megabytes long; only a
/// bounded prefix is kept.
pub(crate) fn sanitize_error_message(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= MAX_DETAIL_CHARS {
        return collapsed;
    }
    let mut truncated: String = collapsed.chars().take(MAX_DETAIL_CHARS).collect();
    truncated.push_str("...");
    truncated
}

/// Result type alias for generation operations.
pub type Result<T> = std::result::Result<T, GenerationError>;

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue, RETRY_AFTER};

    #[test]
    fn test_status_mapping() {
        let headers = HeaderMap::new();
        assert_eq!(
            from_status(401, "bad key", &headers).kind(),
            ErrorKind::ProviderAuthFailed
        );
        assert_eq!(
            from_status(403, "forbidden", &headers).kind(),
            ErrorKind::ProviderAuthFailed
        );
        assert_eq!(from_status(429, "", &headers).kind(), ErrorKind::RateLimited);

        let err = from_status(502, "bad gateway", &headers);
        assert_eq!(err.kind(), ErrorKind::UnexpectedResponse);
        assert!(matches!(
            err,
            GenerationError::UnexpectedResponse {
                status: Some(502),
                ..
            }
        ));
        assert_eq!(err.provider_detail().as_deref(), Some("bad gateway"));
    }

    #[test]
    fn test_http_status_per_kind() {
        assert_eq!(ErrorKind::InvalidRequest.http_status(), 400);
        assert_eq!(ErrorKind::ProviderAuthFailed.http_status(), 500);
        assert_eq!(ErrorKind::RateLimited.http_status(), 429);
        assert_eq!(ErrorKind::ProviderUnavailable.http_status(), 500);
        assert_eq!(ErrorKind::Timeout.http_status(), 504);
        assert_eq!(ErrorKind::UnexpectedResponse.http_status(), 500);
        assert_eq!(ErrorKind::Internal.http_status(), 500);
    }

    #[test]
    fn test_retry_after_header() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("17"));
        let err = from_status(429, "slow down", &headers);
        assert_eq!(err.retry_after(), Some(Duration::from_secs(17)));
        assert!(err.is_retryable());

        headers.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn test_auth_failure_hides_detail_from_client() {
        let err = GenerationError::ProviderAuthFailed("key sk-123 revoked".into());
        assert_eq!(err.http_status(), 500);
        assert_eq!(err.message(), "API authentication failed");
        assert!(!err.details().unwrap_or_default().contains("sk-123"));
        assert_eq!(err.provider_detail().as_deref(), Some("key sk-123 revoked"));
    }

    #[test]
    fn test_missing_credential_is_internal() {
        let err = GenerationError::MissingCredential("stability".into());
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(err.message(), "Server configuration error");
        assert_eq!(
            err.details().as_deref(),
            Some("API key not configured. Please contact support.")
        );
    }

    #[test]
    fn test_sanitize_truncates() {
        let long = "x".repeat(2000);
        let clean = sanitize_error_message(&long);
        assert_eq!(clean.len(), MAX_DETAIL_CHARS + 3);
        assert!(clean.ends_with("..."));

        assert_eq!(sanitize_error_message("  a \n\t b  "), "a b");
    }

    #[test]
    fn test_error_display() {
        let err =
            GenerationError::invalid("Prompt is required", "Prompt must be a non-empty string");
        assert_eq!(
            err.to_string(),
            "invalid request: Prompt is required (Prompt must be a non-empty string)"
        );

        let err = GenerationError::Timeout(Duration::from_secs(120));
        assert_eq!(err.to_string(), "operation timed out after 120s");
    }
}
