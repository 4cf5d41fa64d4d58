//! Error types for transport operations.

use crate::message::MessageId;
use crate::transport::Disposition;
use std::time::Duration;
use thiserror::Error;

/// Error type for all broker-facing operations
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Queue not found: {queue_name}")]
    QueueNotFound { queue_name: String },

    #[error("Message lock lost or receipt unknown: {receipt}")]
    LockLost { receipt: String },

    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Message too large: {size} bytes (max: {max_size})")]
    MessageTooLarge { size: usize, max_size: usize },

    #[error("Transport client is closed")]
    Closed,

    #[error("Provider error ({provider}): {code} - {message}")]
    ProviderError {
        provider: String,
        code: String,
        message: String,
    },

    #[error("Serialization failed: {0}")]
    SerializationError(#[from] SerializationError),

    #[error("Configuration error: {0}")]
    ConfigurationError(#[from] ConfigurationError),

    #[error("Validation error: {0}")]
    ValidationError(#[from] ValidationError),
}

impl TransportError {
    /// Check if error is transient and the operation may succeed when repeated
    pub fn is_transient(&self) -> bool {
        match self {
            Self::QueueNotFound { .. } => false,
            Self::LockLost { .. } => false,
            Self::Timeout { .. } => true,
            Self::ConnectionFailed { .. } => true,
            Self::AuthenticationFailed { .. } => false,
            Self::MessageTooLarge { .. } => false,
            Self::Closed => false,
            Self::ProviderError { .. } => true,
            Self::SerializationError(_) => false,
            Self::ConfigurationError(_) => false,
            Self::ValidationError(_) => false,
        }
    }

    /// Get suggested retry delay
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Timeout { .. } => Some(Duration::from_secs(1)),
            Self::ConnectionFailed { .. } => Some(Duration::from_secs(5)),
            Self::ProviderError { .. } => Some(Duration::from_secs(1)),
            _ => None,
        }
    }
}

/// Errors raised by a [`DispositionHandle`](crate::transport::DispositionHandle)
///
/// `AlreadySettled` and `InProgress` indicate a logic defect in the caller: a
/// second terminal operation was attempted on the same handle. They never
/// reach the broker.
#[derive(Debug, Error)]
pub enum DispositionError {
    #[error("Message {message_id} was already settled as {disposition}")]
    AlreadySettled {
        message_id: MessageId,
        disposition: Disposition,
    },

    #[error("Message {message_id} has a disposition in progress")]
    InProgress { message_id: MessageId },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl DispositionError {
    /// Check whether the error is a double-disposition defect rather than a broker failure
    pub fn is_programming_error(&self) -> bool {
        matches!(self, Self::AlreadySettled { .. } | Self::InProgress { .. })
    }
}

/// Errors during message serialization/deserialization
#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("JSON serialization failed: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Message body is not valid UTF-8")]
    InvalidUtf8,
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required configuration: {key}")]
    Missing { key: String },

    #[error("Unsupported provider '{provider}': {message}")]
    UnsupportedProvider { provider: String, message: String },
}

/// Validation errors
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    Required { field: String },

    #[error("Invalid format for {field}: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Value out of range for {field}: {message}")]
    OutOfRange { field: String, message: String },
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
