use axum::http::StatusCode;
use thiserror::Error;

/// Transport-level failure reaching the network.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl NetworkError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }
}

/// Failure resolving a single resource from the network or the cache.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network request for `{url}` failed: {source}")]
    Network {
        url: String,
        #[source]
        source: NetworkError,
    },
    #[error("`{key}` is not available from the network or the cache")]
    NotFound {
        key: String,
        status: Option<StatusCode>,
    },
}

impl FetchError {
    pub fn not_found(key: impl Into<String>, status: Option<StatusCode>) -> Self {
        Self::NotFound {
            key: key.into(),
            status,
        }
    }

    /// Last HTTP status observed before giving up, if any.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Network { .. } => None,
            Self::NotFound { status, .. } => *status,
        }
    }
}

/// Failure opening, reading or writing a cache generation.
///
/// Callers never surface these to a page: a failed write means the response is
/// served without being cached.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheStoreError {
    #[error("cache quota of {quota} bytes exceeded while storing `{key}`")]
    QuotaExceeded { key: String, quota: usize },
    #[error("cache generation `{name}` is unavailable: {reason}")]
    Unavailable { name: String, reason: String },
    #[error("cache entry `{key}` could not be read or written: {reason}")]
    Io { key: String, reason: String },
}

impl CacheStoreError {
    pub fn unavailable(name: impl Into<String>, reason: impl ToString) -> Self {
        Self::Unavailable {
            name: name.into(),
            reason: reason.to_string(),
        }
    }

    pub fn io(key: impl Into<String>, reason: impl ToString) -> Self {
        Self::Io {
            key: key.into(),
            reason: reason.to_string(),
        }
    }
}

/// Rejected control message.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("malformed control message: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("control message has no `type` field")]
    MissingType,
    #[error("unknown control message type `{0}`")]
    UnknownType(String),
}
