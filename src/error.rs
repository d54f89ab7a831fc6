//! Error types for the requeue delay queue library.

use thiserror::Error;

/// The main error type for the requeue library.
#[derive(Error, Debug)]
pub enum RequeueError {
    /// Redis connection or operation error.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// JSON serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A caller-supplied value was rejected (empty payload, zero delay,
    /// invalid queue configuration).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// An operation was attempted in the wrong lifecycle state.
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// The expiration-event subscription failed or was closed.
    #[error("Pub/sub error: {0}")]
    PubSub(String),

    /// Timeout error.
    #[error("Timeout: {0}")]
    Timeout(String),
}

/// Result type alias using RequeueError.
pub type Result<T> = std::result::Result<T, RequeueError>;
