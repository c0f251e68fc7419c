//! Error types for the cluster cache.

/// Cache errors.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The cluster could not be reached when the cache was started.
    #[error("cache startup failed: {message}")]
    Startup { message: String },

    /// The cluster client is not connected.
    #[error("cluster client is offline")]
    Offline,

    /// A cluster operation did not complete in time.
    #[error("cluster operation timed out: {operation}")]
    Timeout { operation: String },

    /// Any other failure reported by the cluster backend.
    #[error("cluster error: {message}")]
    Cluster { message: String },

    /// A stored value carries a type identifier no record kind is registered for.
    #[error("unknown entry type id: {type_id}")]
    UnknownTypeId { type_id: i32 },

    /// A stored value is truncated or malformed.
    #[error("codec error: {message}")]
    Codec { message: String },

    /// Configuration error.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// The operation is not supported by this cache.
    #[error("not implemented: {operation}")]
    NotImplemented { operation: String },
}

impl CacheError {
    /// Whether the error is transient and the operation may succeed later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Offline | Self::Timeout { .. })
    }

    /// Whether the error comes from losing the cluster connection.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Offline | Self::Timeout { .. })
    }

    /// Whether a lookup that hit this error must behave like a cache miss.
    pub fn is_miss_equivalent(&self) -> bool {
        matches!(self, Self::UnknownTypeId { .. } | Self::Codec { .. })
    }

    pub(crate) fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }
}

impl From<serde_yaml::Error> for CacheError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Config {
            message: err.to_string(),
        }
    }
}

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;
