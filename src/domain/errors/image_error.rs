//! Image loading error types.

use thiserror::Error;

/// Classification of a network failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkErrorKind {
    /// The request did not finish in time.
    Timeout,
    /// No connection could be established.
    Connect,
    /// The connection broke mid-transfer.
    Transport,
    /// The server answered with a status outside the accepted set.
    Status(u16),
    /// The response content type is not on the allowlist.
    ContentType,
}

/// Errors surfaced by the load pipeline.
#[derive(Debug, Clone, Error)]
#[allow(missing_docs)]
pub enum ImageError {
    #[error("invalid key: {reason}")]
    InvalidKey { reason: String },

    #[error("network error: {message}")]
    Network {
        kind: NetworkErrorKind,
        message: String,
    },

    #[error("bad image data: {message}")]
    BadImageData { message: String },

    #[error("image not found in cache")]
    NotCached,

    #[error("url failed recently and is blocked: {url}")]
    RecentlyFailed { url: String },

    #[error("cache io error: {message}")]
    CacheIo { message: String },

    #[error("load cancelled")]
    Cancelled,
}

impl ImageError {
    /// Creates invalid key error.
    #[must_use]
    pub fn invalid_key(reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            reason: reason.into(),
        }
    }

    /// Creates network error.
    #[must_use]
    pub fn network(kind: NetworkErrorKind, message: impl Into<String>) -> Self {
        Self::Network {
            kind,
            message: message.into(),
        }
    }

    /// Creates bad image data error.
    #[must_use]
    pub fn bad_data(message: impl Into<String>) -> Self {
        Self::BadImageData {
            message: message.into(),
        }
    }

    /// Creates cache io error.
    #[must_use]
    pub fn cache_io(message: impl Into<String>) -> Self {
        Self::CacheIo {
            message: message.into(),
        }
    }

    /// Returns whether error is network related.
    #[must_use]
    pub const fn is_network_error(&self) -> bool {
        matches!(self, Self::Network { .. })
    }

    /// Returns whether error is a decode failure.
    #[must_use]
    pub const fn is_decode_error(&self) -> bool {
        matches!(self, Self::BadImageData { .. })
    }

    /// Returns whether a retry could plausibly succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Network { kind, .. } => match kind {
                NetworkErrorKind::Timeout
                | NetworkErrorKind::Connect
                | NetworkErrorKind::Transport => true,
                NetworkErrorKind::Status(code) => *code >= 500 || *code == 408 || *code == 429,
                NetworkErrorKind::ContentType => false,
            },
            Self::Cancelled | Self::CacheIo { .. } => true,
            _ => false,
        }
    }

    /// Returns whether the URL should be added to the failed-URL blocklist.
    #[must_use]
    pub const fn should_block_url(&self) -> bool {
        match self {
            Self::Network { .. } | Self::BadImageData { .. } | Self::InvalidKey { .. } => {
                !self.is_transient()
            }
            _ => false,
        }
    }
}
