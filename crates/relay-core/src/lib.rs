//! # Relay Core
//!
//! Validation, relay and emission logic of the message relay, independent of
//! any particular broker. Everything here talks to the broker through
//! [`relay_runtime::TransportClient`].
//!
//! Two loops run side by side and share nothing but the outbound buffer:
//!
//! - the **relay loop** ([`RelayEngine::run`]) receives messages, validates
//!   them and settles each one by checkpoint or dead-letter;
//! - the **send loop** ([`SendLoop::run`]) drains the [`OutboundEmitter`]
//!   buffer that the [`Ingress`] fills.

pub mod config;
pub mod dead_letter;
pub mod emitter;
pub mod engine;
pub mod ingress;
pub mod outcome;
pub mod retry;
pub mod shutdown;
pub mod transform;
pub mod validator;

pub use config::{DrainOptions, EmitterConfig, RelayConfig, ValidationConfig, DEFAULT_MIN_LENGTH};
pub use dead_letter::{drain_dead_letters, DeadLetteredMessage};
pub use emitter::{
    BackpressureError, EmitterStats, EmitterStatsSnapshot, OutboundEmitter, SendLoop,
};
pub use engine::{ProcessingError, RelayEngine, PROCESSING_EXCEPTION};
pub use ingress::{Ingress, CONTENT_TYPE_HEADER};
pub use outcome::{RelayOutcome, RelayReport, RelayStats, RelayStatsSnapshot};
pub use retry::{RetryPolicy, RetryState};
pub use shutdown::{Shutdown, ShutdownSignal};
pub use transform::{SuffixTransformer, TransformError, Transformer, DEFAULT_SUFFIX};
pub use validator::{
    MinLengthValidator, Payload, ValidationResult, Validator, MALFORMED_PAYLOAD,
    VALIDATION_EXCEPTION,
};
