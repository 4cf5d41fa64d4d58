//! # Relay Runtime
//!
//! Broker-facing vocabulary for the message relay.
//!
//! This library provides:
//! - Message envelopes and validated identifiers
//! - The `TransportClient` interface the relay consumes
//! - Strongly-typed disposition handles that admit a single terminal operation
//! - An in-memory broker with peek-lock and dead-letter semantics
//!
//! ## Module Organization
//!
//! - [error] - Error types for transport and disposition operations
//! - [message] - Message structures and receipt handles
//! - [provider] - Provider types and configuration
//! - [transport] - Transport traits and the disposition handle
//! - [providers] - Concrete transports

pub mod error;
pub mod message;
pub mod provider;
pub mod providers;
pub mod transport;

// Re-export commonly used types at crate root for convenience
pub use error::{
    ConfigurationError, DispositionError, SerializationError, TransportError, ValidationError,
};
pub use message::{
    DeadLetterInfo, Message, MessageId, QueueName, ReceiptHandle, ReceivedMessage, Timestamp,
};
pub use provider::{InMemoryConfig, ProviderConfig, ProviderType};
pub use providers::{InMemoryTransport, MAX_DELIVERY_COUNT_EXCEEDED};
pub use transport::{Delivery, Disposition, DispositionHandle, DispositionSink, TransportClient};
