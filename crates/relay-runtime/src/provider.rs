//! Provider types and configuration.

use crate::error::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Enumeration of supported broker providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderType {
    InMemory,
}

impl ProviderType {
    /// Get maximum message size for provider
    pub fn max_message_size(&self) -> usize {
        match self {
            Self::InMemory => 10 * 1024 * 1024, // 10MB
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InMemory => "in-memory",
        }
    }
}

/// Provider-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ProviderConfig {
    InMemory(InMemoryConfig),
}

impl ProviderConfig {
    /// Resolve the provider for a broker endpoint URL
    ///
    /// Only the `memory` scheme is wired in; broker SDK adapters live outside
    /// this crate and register their own transports.
    pub fn from_endpoint(endpoint: &str) -> Result<Self, ConfigurationError> {
        let url = Url::parse(endpoint).map_err(|e| ConfigurationError::Invalid {
            message: format!("broker endpoint '{}' is not a valid URL: {}", endpoint, e),
        })?;

        match url.scheme() {
            "memory" => Ok(Self::InMemory(InMemoryConfig::default())),
            other => Err(ConfigurationError::UnsupportedProvider {
                provider: other.to_string(),
                message: "no transport adapter is registered for this scheme".to_string(),
            }),
        }
    }

    pub fn provider_type(&self) -> ProviderType {
        match self {
            Self::InMemory(_) => ProviderType::InMemory,
        }
    }
}

/// In-memory provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InMemoryConfig {
    /// Maximum number of messages held in a single queue
    pub max_queue_size: usize,
    /// Delivery count at which an abandoned message is dead-lettered
    pub max_delivery_count: u32,
    /// Peek-lock duration for received messages
    pub lock_duration: Duration,
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 10_000,
            max_delivery_count: 10,
            lock_duration: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
#[path = "provider_tests.rs"]
mod tests;
