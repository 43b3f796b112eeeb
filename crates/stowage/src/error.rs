use std::path::{Path, PathBuf};

use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum StowageError {
    #[error("operation cancelled")]
    Cancelled,

    #[error("malformed manifest {location}: {reason}")]
    MalformedManifest { location: String, reason: String },

    #[error("fetch of {target} failed: {reason}")]
    FetchFailed {
        target: String,
        reason: String,
        retryable: bool,
    },

    #[error("request failed with HTTP {status} during {operation} for {url}")]
    HttpStatus {
        status: StatusCode,
        url: String,
        operation: &'static str,
    },

    #[error("HTTP request failed: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },

    #[error("{op} {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },

    #[error("metadata has no usable `{field}` field")]
    MissingField { field: String },

    #[error("free disk space {available} bytes is below the floor of {floor} bytes")]
    DiskSpaceExhausted { available: u64, floor: u64 },

    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    #[error("invalid URL `{input}`: {reason}")]
    InvalidUrl { input: String, reason: String },
}

pub type Result<T, E = StowageError> = std::result::Result<T, E>;

impl StowageError {
    pub fn malformed(location: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedManifest {
            location: location.into(),
            reason: reason.into(),
        }
    }

    pub fn fetch_failed(
        target: impl Into<String>,
        reason: impl Into<String>,
        retryable: bool,
    ) -> Self {
        Self::FetchFailed {
            target: target.into(),
            reason: reason.into(),
            retryable,
        }
    }

    pub fn http_status(
        status: StatusCode,
        url: impl Into<String>,
        operation: &'static str,
    ) -> Self {
        Self::HttpStatus {
            status,
            url: url.into(),
            operation,
        }
    }

    pub fn io(op: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            op,
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    pub fn invalid_url(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Cancelled
            | Self::MalformedManifest { .. }
            | Self::Json { .. }
            | Self::MissingField { .. }
            | Self::DiskSpaceExhausted { .. }
            | Self::Configuration { .. }
            | Self::InvalidUrl { .. } => false,
            Self::FetchFailed { retryable, .. } => *retryable,
            Self::HttpStatus { status, .. } => {
                status.is_server_error()
                    || *status == StatusCode::TOO_MANY_REQUESTS
                    || *status == StatusCode::REQUEST_TIMEOUT
            }
            Self::Network { source } => is_retryable_reqwest_error(source),
            Self::Io { .. } => true,
        }
    }
}

/// Classify a reqwest error as retryable or non-retryable.
///
/// Retryable: connect, timeout, request, body read, and decode errors.
/// Non-retryable: redirect and builder errors.
pub fn is_retryable_reqwest_error(e: &reqwest::Error) -> bool {
    e.is_connect() || e.is_timeout() || e.is_request() || e.is_body() || e.is_decode()
}

impl From<hls::ManifestError> for StowageError {
    fn from(err: hls::ManifestError) -> Self {
        Self::malformed("playlist", err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(StowageError::fetch_failed("a", "reset", true).is_retryable());
        assert!(!StowageError::fetch_failed("a", "gone", false).is_retryable());
        assert!(
            StowageError::http_status(StatusCode::BAD_GATEWAY, "u", "fetching fragment")
                .is_retryable()
        );
        assert!(
            StowageError::http_status(StatusCode::TOO_MANY_REQUESTS, "u", "fetching fragment")
                .is_retryable()
        );
        assert!(
            !StowageError::http_status(StatusCode::NOT_FOUND, "u", "fetching fragment")
                .is_retryable()
        );
        assert!(!StowageError::Cancelled.is_retryable());
        assert!(!StowageError::malformed("x", "y").is_retryable());
        assert!(
            !StowageError::DiskSpaceExhausted {
                available: 1,
                floor: 2
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_io_error_mentions_path() {
        let err = StowageError::io(
            "writing manifest",
            Path::new("/tmp/x/playlist.m3u8"),
            std::io::Error::other("boom"),
        );
        let text = err.to_string();
        assert!(text.contains("writing manifest"));
        assert!(text.contains("/tmp/x/playlist.m3u8"));
    }
}
