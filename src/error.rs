//! Typed errors for the generation pipeline.
//!
//! Every failure the pipeline can surface falls into one of the
//! [`ErrorKind`] classes. Input errors are the caller's to fix, service
//! errors carry enough detail to decide on backoff, and quality errors
//! (unparseable or ungrounded model output) call for a simpler request or a
//! smaller context rather than a retry.

use std::time::Duration;
use thiserror::Error;

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the pipeline components.
#[derive(Debug, Error)]
pub enum Error {
    /// The declared document format is not one the parser knows.
    #[error("unsupported document format: {0}")]
    UnsupportedFormat(String),

    /// The content could not be parsed as its declared format.
    #[error("malformed {format} content: {reason}")]
    MalformedContent { format: String, reason: String },

    /// Chunker precondition `window > overlap` violated.
    #[error("invalid chunk configuration: window_words ({window}) must exceed overlap_words ({overlap})")]
    InvalidChunkConfig { window: usize, overlap: usize },

    /// The embedding service failed for at least one text in a batch.
    #[error("embedding service error: {0}")]
    EmbeddingService(#[source] ServiceError),

    /// The generation service failed.
    #[error("generation service error: {0}")]
    GenerationService(#[source] ServiceError),

    /// A vector does not match the dimensionality the index was built with.
    #[error("embedding dimension mismatch: index holds {expected}-dim vectors, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Retrieval was attempted against an index with zero records.
    #[error("the knowledge index is empty; build it before retrieving")]
    EmptyIndex,

    /// Model output did not match the required structure.
    #[error("could not parse generation output: {0}")]
    GenerationParse(String),

    /// Every generated test case cited a source that was not supplied.
    #[error("no grounded test cases: all {discarded} generated cases cited sources outside the retrieved context")]
    NoGroundedOutput { discarded: usize },

    /// Script synthesis was requested without page markup.
    #[error("page markup is empty")]
    MissingMarkup,

    /// No generated test case carries this id.
    #[error("test case not found: {0}")]
    UnknownTestCase(String),

    /// Two documents in one index batch share a source id.
    #[error("duplicate source_id in batch: {0}")]
    DuplicateSource(String),

    /// The index was rebuilt or reset while output was being generated.
    #[error("the knowledge index was rebuilt or reset during generation; output discarded")]
    IndexChanged,

    /// A document failed to parse or chunk while building the index.
    #[error("failed to index {source_id}: {source}")]
    IndexBuild {
        source_id: String,
        #[source]
        source: Box<Error>,
    },

    /// The backing store failed.
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

/// Coarse classification of [`Error`] values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad document, markup or configuration. Not retryable.
    Input,
    /// External embedding/generation failure.
    Service,
    /// Generated output failed schema validation or grounding.
    Quality,
    /// A referenced entity does not exist (unknown test case, empty index).
    NotFound,
    /// Persistence failure.
    Storage,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::UnsupportedFormat(_)
            | Error::MalformedContent { .. }
            | Error::InvalidChunkConfig { .. }
            | Error::MissingMarkup
            | Error::DuplicateSource(_) => ErrorKind::Input,
            Error::EmbeddingService(_)
            | Error::GenerationService(_)
            | Error::DimensionMismatch { .. } => ErrorKind::Service,
            Error::GenerationParse(_) | Error::NoGroundedOutput { .. } => ErrorKind::Quality,
            Error::EmptyIndex | Error::UnknownTestCase(_) | Error::IndexChanged => {
                ErrorKind::NotFound
            }
            Error::IndexBuild { source, .. } => source.kind(),
            Error::Storage(_) => ErrorKind::Storage,
        }
    }

    /// The service error behind this error, if it came from an external call.
    pub fn service_error(&self) -> Option<&ServiceError> {
        match self {
            Error::EmbeddingService(e) | Error::GenerationService(e) => Some(e),
            _ => None,
        }
    }

    pub(crate) fn malformed(format: impl Into<String>, reason: impl ToString) -> Self {
        Error::MalformedContent {
            format: format.into(),
            reason: reason.to_string(),
        }
    }
}

/// Failure of an external embedding or generation service.
///
/// Adapters never retry; a `Quota` error carries the provider's suggested
/// delay when one was given.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Rate limit or quota exhausted (HTTP 429).
    #[error("{provider} quota exhausted: {message}")]
    Quota {
        provider: String,
        message: String,
        retry_after: Option<Duration>,
    },

    /// The request never produced an HTTP response.
    #[error("{provider} request failed: {message}")]
    Transport { provider: String, message: String },

    /// Non-success HTTP status other than 429.
    #[error("{provider} returned HTTP {status}: {body}")]
    Api {
        provider: String,
        status: u16,
        body: String,
    },

    /// A 2xx response whose body is not what the API documents.
    #[error("{provider} returned an unusable response: {message}")]
    InvalidResponse { provider: String, message: String },

    /// The model refused to produce content (safety or recitation filters).
    #[error("{provider} blocked the generation: {reason}")]
    Blocked { provider: String, reason: String },

    /// The provider is not configured.
    #[error("{0} provider is disabled")]
    Disabled(&'static str),
}

impl ServiceError {
    /// True for failures that may succeed later without changing the request.
    pub fn is_transient(&self) -> bool {
        match self {
            ServiceError::Quota { .. } | ServiceError::Transport { .. } => true,
            ServiceError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ServiceError::Quota { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    pub(crate) fn transport(provider: &str, err: impl ToString) -> Self {
        ServiceError::Transport {
            provider: provider.to_string(),
            message: err.to_string(),
        }
    }

    pub(crate) fn invalid(provider: &str, message: impl Into<String>) -> Self {
        ServiceError::InvalidResponse {
            provider: provider.to_string(),
            message: message.into(),
        }
    }
}

/// Map a non-success HTTP response to a [`ServiceError`].
///
/// 429 becomes `Quota`, with the delay taken from the `Retry-After` header
/// or a "retry in 12.5s" phrase in the body.
pub(crate) async fn from_http_failure(provider: &str, response: reqwest::Response) -> ServiceError {
    let status = response.status();
    let header_delay = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<f64>().ok())
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok());
    let body = response.text().await.unwrap_or_default();

    if status.as_u16() == 429 {
        return ServiceError::Quota {
            provider: provider.to_string(),
            retry_after: header_delay.or_else(|| parse_retry_hint(&body)),
            message: body,
        };
    }

    ServiceError::Api {
        provider: provider.to_string(),
        status: status.as_u16(),
        body,
    }
}

/// Find a "retry in <seconds>s" hint in a provider error message.
fn parse_retry_hint(message: &str) -> Option<Duration> {
    let lower = message.to_lowercase();
    let start = lower.find("retry in ")? + "retry in ".len();
    let digits: String = lower[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let secs: f64 = digits.parse().ok()?;
    Duration::try_from_secs_f64(secs).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_hint_is_parsed_from_message() {
        let d = parse_retry_hint("Quota exceeded. Please retry in 12.5s.").unwrap();
        assert_eq!(d, Duration::from_millis(12_500));
        assert!(parse_retry_hint("quota exceeded").is_none());
    }

    #[test]
    fn out_of_range_retry_hint_is_ignored() {
        assert!(parse_retry_hint("Quota exceeded, retry in 100000000000000000000s").is_none());
    }

    fn quota_response(retry_after: &str, body: &'static str) -> reqwest::Response {
        let response = axum::http::Response::builder()
            .status(429)
            .header("retry-after", retry_after)
            .body(body)
            .unwrap();
        reqwest::Response::from(response)
    }

    #[tokio::test]
    async fn unusable_retry_after_header_falls_back_to_body() {
        for header in ["-1", "1e20", "NaN", "inf"] {
            let err = from_http_failure("gemini", quota_response(header, "retry in 3s")).await;
            assert_eq!(err.retry_after(), Some(Duration::from_secs(3)), "{header}");
        }
        let err = from_http_failure("openai", quota_response("-5", "slow down")).await;
        assert!(matches!(err, ServiceError::Quota { retry_after: None, .. }));
    }

    #[test]
    fn kinds_follow_taxonomy() {
        assert_eq!(Error::MissingMarkup.kind(), ErrorKind::Input);
        assert_eq!(
            Error::GenerationParse("x".into()).kind(),
            ErrorKind::Quality
        );
        assert_eq!(
            Error::NoGroundedOutput { discarded: 2 }.kind(),
            ErrorKind::Quality
        );
        assert_eq!(Error::EmptyIndex.kind(), ErrorKind::NotFound);
        let quota = ServiceError::Quota {
            provider: "openai".into(),
            message: "slow down".into(),
            retry_after: Some(Duration::from_secs(3)),
        };
        assert!(quota.is_transient());
        let err = Error::GenerationService(quota);
        assert_eq!(err.kind(), ErrorKind::Service);
        assert_eq!(
            err.service_error().and_then(|e| e.retry_after()),
            Some(Duration::from_secs(3))
        );
    }

    #[test]
    fn index_build_inherits_inner_kind() {
        let err = Error::IndexBuild {
            source_id: "a.json".into(),
            source: Box::new(Error::malformed("tagged-data", "eof")),
        };
        assert_eq!(err.kind(), ErrorKind::Input);
        assert!(err.to_string().contains("a.json"));
    }

    #[test]
    fn client_errors_are_not_transient() {
        let e = ServiceError::Api {
            provider: "gemini".into(),
            status: 400,
            body: String::new(),
        };
        assert!(!e.is_transient());
        assert!(!ServiceError::Disabled("embedding").is_transient());
    }
}
