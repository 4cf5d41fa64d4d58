//! Typed settings for the relay components.
//!
//! These are resolved once at startup from the service configuration document
//! and are immutable afterwards.

use crate::retry::RetryPolicy;
use relay_runtime::QueueName;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Minimum accepted text length when none is configured
pub const DEFAULT_MIN_LENGTH: usize = 10;

/// Settings for the receive/relay loop
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Queue the relay consumes from
    pub queue: QueueName,

    /// Queue that receives transformed payloads, if any
    pub forward_to: Option<QueueName>,

    /// How long a single receive waits for a message
    pub receive_timeout: Duration,

    /// Upper bound on messages being disposed concurrently
    pub max_concurrent_dispositions: usize,

    /// Pause after a failed receive when the error carries no retry hint
    pub receive_error_backoff: Duration,
}

impl RelayConfig {
    pub fn new(queue: QueueName) -> Self {
        Self {
            queue,
            forward_to: None,
            receive_timeout: Duration::from_secs(2),
            max_concurrent_dispositions: 16,
            receive_error_backoff: Duration::from_secs(1),
        }
    }

    pub fn with_forward_to(mut self, queue: QueueName) -> Self {
        self.forward_to = Some(queue);
        self
    }

    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }

    pub fn with_max_concurrent_dispositions(mut self, max: usize) -> Self {
        self.max_concurrent_dispositions = max;
        self
    }
}

/// Settings for the outbound emitter and its send loop
#[derive(Debug, Clone)]
pub struct EmitterConfig {
    /// Number of messages the outbound buffer holds before rejecting submissions
    pub capacity: usize,

    /// Retry policy for transient send failures
    pub retry_policy: RetryPolicy,
}

impl EmitterConfig {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }
}

impl Default for EmitterConfig {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Settings for the minimum-length validation rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Shortest accepted text, counted in characters
    pub min_length: usize,

    /// JSON field holding the text; `None` validates the whole body as text
    pub text_field: Option<String>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_length: DEFAULT_MIN_LENGTH,
            text_field: Some("name".to_string()),
        }
    }
}

/// Options for the diagnostic dead-letter drain
#[derive(Debug, Clone)]
pub struct DrainOptions {
    /// Wait per receive; the first empty receive ends the drain
    pub receive_timeout: Duration,

    /// Stop after this many messages
    pub max_messages: Option<usize>,
}

impl Default for DrainOptions {
    fn default() -> Self {
        Self {
            receive_timeout: Duration::from_secs(2),
            max_messages: None,
        }
    }
}
