//! Configuration document for the relay service.
//!
//! Every field carries a serde default, so a missing file or an empty
//! environment yields a runnable in-memory relay. The typed settings used by
//! the relay components are derived from this document once at startup.

use crate::errors::ConfigError;
use relay_core::{DrainOptions, EmitterConfig, RelayConfig, RetryPolicy, ValidationConfig};
use relay_runtime::{ProviderConfig, QueueName};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tracing::info;
use zeroize::{Zeroize, ZeroizeOnDrop};

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

/// Prefix for environment overrides, e.g. `RELAY__SERVER__PORT=9090`
pub const ENV_PREFIX: &str = "RELAY";

/// Environment variable naming an explicit configuration file
pub const CONFIG_FILE_ENV: &str = "RELAY_CONFIG_FILE";

const SYSTEM_CONFIG_FILE: &str = "/etc/message-relay/service";
const LOCAL_CONFIG_FILE: &str = "config/service";

/// Service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// HTTP server settings
    pub server: ServerConfig,

    /// Broker connection and queue names
    pub broker: BrokerConfig,

    /// Receive/relay loop settings
    pub relay: RelaySettings,

    /// Minimum-length validation rule
    pub validation: ValidationConfig,

    /// Outbound buffer and send retry settings
    pub emitter: EmitterSettings,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Time allowed for background loops to finish after the server stops
    pub shutdown_timeout_seconds: u64,

    /// Maximum request size in bytes
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            shutdown_timeout_seconds: 30,
            max_body_size: 1024 * 1024, // 1MB
        }
    }
}

/// Secret used to authenticate with the broker
///
/// Never printed; the buffer is wiped when dropped.
#[derive(Clone, Default, PartialEq, Eq, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct BrokerCredential(String);

impl BrokerCredential {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Get the secret (only for immediate use)
    pub fn expose_secret(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for BrokerCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BrokerCredential")
            .field(&"<REDACTED>")
            .finish()
    }
}

impl Serialize for BrokerCredential {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("<REDACTED>")
    }
}

/// Broker connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Broker endpoint URL; the scheme selects the provider
    pub endpoint: String,

    /// Broker credential, if the provider needs one
    pub credential: Option<BrokerCredential>,

    /// Queue the relay consumes from
    pub queue: String,

    /// Queue receiving transformed payloads (disabled when absent)
    pub forward_to: Option<String>,

    /// In-memory provider: messages held per queue
    pub max_queue_size: usize,

    /// In-memory provider: deliveries before automatic dead-lettering
    pub max_delivery_count: u32,

    /// In-memory provider: peek-lock duration
    pub lock_duration_seconds: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            endpoint: "memory://local".to_string(),
            credential: None,
            queue: "relay-inbound".to_string(),
            forward_to: None,
            max_queue_size: 10_000,
            max_delivery_count: 10,
            lock_duration_seconds: 30,
        }
    }
}

/// Receive/relay loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    pub receive_timeout_ms: u64,
    pub max_concurrent_dispositions: usize,
    pub receive_error_backoff_ms: u64,

    /// Per-receive wait of the dead-letter drain
    pub drain_timeout_ms: u64,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            receive_timeout_ms: 2_000,
            max_concurrent_dispositions: 16,
            receive_error_backoff_ms: 1_000,
            drain_timeout_ms: 2_000,
        }
    }
}

/// Outbound emitter settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmitterSettings {
    /// Messages buffered before submissions are rejected
    pub capacity: usize,

    /// Destination of ingress messages; defaults to the broker queue
    pub queue: Option<String>,

    pub max_send_attempts: u32,
    pub initial_retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
}

impl Default for EmitterSettings {
    fn default() -> Self {
        Self {
            capacity: 256,
            queue: None,
            max_send_attempts: 5,
            initial_retry_delay_ms: 1_000,
            max_retry_delay_ms: 16_000,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,

    /// Enable JSON structured logging
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl ServiceConfig {
    /// Load configuration from files and the environment
    ///
    /// Later sources override earlier ones:
    ///  1. `/etc/message-relay/service.yaml`
    ///  2. `./config/service.yaml`
    ///  3. `explicit_path` (must exist when given)
    ///  4. `RELAY__SECTION__KEY` environment variables
    pub fn load(explicit_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = ::config::Config::builder()
            .add_source(
                ::config::File::with_name(SYSTEM_CONFIG_FILE)
                    .required(false)
                    .format(::config::FileFormat::Yaml),
            )
            .add_source(
                ::config::File::with_name(LOCAL_CONFIG_FILE)
                    .required(false)
                    .format(::config::FileFormat::Yaml),
            );

        if let Some(path) = explicit_path {
            info!(path = %path.display(), "Loading configuration from explicit path");
            builder = builder.add_source(
                ::config::File::from(path)
                    .required(true)
                    .format(::config::FileFormat::Yaml),
            );
        }

        let config = builder
            .add_source(::config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Check the document for values the relay cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.max_body_size == 0 {
            return Err(invalid("server.max_body_size must be greater than zero"));
        }
        if self.emitter.capacity == 0 {
            return Err(invalid("emitter.capacity must be greater than zero"));
        }
        if self.emitter.max_retry_delay_ms < self.emitter.initial_retry_delay_ms {
            return Err(invalid(
                "emitter.max_retry_delay_ms must not be less than emitter.initial_retry_delay_ms",
            ));
        }
        if self.relay.receive_timeout_ms == 0 {
            return Err(invalid("relay.receive_timeout_ms must be greater than zero"));
        }
        if self.relay.max_concurrent_dispositions == 0 {
            return Err(invalid(
                "relay.max_concurrent_dispositions must be greater than zero",
            ));
        }
        if self.broker.lock_duration_seconds == 0 {
            return Err(invalid("broker.lock_duration_seconds must be greater than zero"));
        }
        if matches!(&self.broker.credential, Some(credential) if credential.is_empty()) {
            return Err(invalid("broker.credential must not be empty when set"));
        }

        let source = self.source_queue()?;
        if let Some(forward_to) = self.forward_queue()? {
            if forward_to == source {
                return Err(invalid(
                    "broker.forward_to must differ from broker.queue",
                ));
            }
        }
        self.destination_queue()?;
        self.provider_config()?;

        Ok(())
    }

    /// Queue the relay consumes from
    pub fn source_queue(&self) -> Result<QueueName, ConfigError> {
        parse_queue("broker.queue", &self.broker.queue)
    }

    /// Queue transformed payloads are forwarded to, if any
    pub fn forward_queue(&self) -> Result<Option<QueueName>, ConfigError> {
        self.broker
            .forward_to
            .as_deref()
            .map(|name| parse_queue("broker.forward_to", name))
            .transpose()
    }

    /// Queue ingress messages are sent to
    pub fn destination_queue(&self) -> Result<QueueName, ConfigError> {
        match &self.emitter.queue {
            Some(name) => parse_queue("emitter.queue", name),
            None => self.source_queue(),
        }
    }

    /// Broker provider selected by the endpoint, with in-memory tuning applied
    pub fn provider_config(&self) -> Result<ProviderConfig, ConfigError> {
        let provider = match ProviderConfig::from_endpoint(&self.broker.endpoint)? {
            ProviderConfig::InMemory(mut memory) => {
                memory.max_queue_size = self.broker.max_queue_size;
                memory.max_delivery_count = self.broker.max_delivery_count;
                memory.lock_duration = Duration::from_secs(self.broker.lock_duration_seconds);
                ProviderConfig::InMemory(memory)
            }
        };
        Ok(provider)
    }

    pub fn relay_config(&self) -> Result<RelayConfig, ConfigError> {
        let mut relay = RelayConfig::new(self.source_queue()?)
            .with_receive_timeout(Duration::from_millis(self.relay.receive_timeout_ms))
            .with_max_concurrent_dispositions(self.relay.max_concurrent_dispositions);
        relay.receive_error_backoff = Duration::from_millis(self.relay.receive_error_backoff_ms);

        if let Some(forward_to) = self.forward_queue()? {
            relay = relay.with_forward_to(forward_to);
        }
        Ok(relay)
    }

    pub fn emitter_config(&self) -> EmitterConfig {
        let retry_policy = RetryPolicy::new(
            self.emitter.max_send_attempts,
            Duration::from_millis(self.emitter.initial_retry_delay_ms),
            Duration::from_millis(self.emitter.max_retry_delay_ms),
            2.0,
        );
        EmitterConfig::new(self.emitter.capacity).with_retry_policy(retry_policy)
    }

    pub fn drain_options(&self) -> DrainOptions {
        DrainOptions {
            receive_timeout: Duration::from_millis(self.relay.drain_timeout_ms),
            max_messages: None,
        }
    }
}

fn parse_queue(key: &str, name: &str) -> Result<QueueName, ConfigError> {
    QueueName::new(name.to_string()).map_err(|e| ConfigError::Invalid {
        message: format!("{} is not a valid queue name: {}", key, e),
    })
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::Invalid {
        message: message.to_string(),
    }
}
