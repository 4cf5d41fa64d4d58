//! Transport provider implementations.
//!
//! This module contains concrete implementations of the `TransportClient` and
//! `DispositionSink` traits for different broker backends.

pub mod memory;

pub use memory::{InMemoryTransport, MAX_DELIVERY_COUNT_EXCEEDED};
