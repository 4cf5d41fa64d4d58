//! Error types for the HTTP service

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use relay_core::BackpressureError;
use relay_runtime::{ConfigurationError, TransportError};
use tracing::{error, warn};

/// Handler errors with HTTP status code mapping
///
/// - `400 Bad Request`: the request itself is unusable; do not retry
/// - `502 Bad Gateway`: the broker failed while serving the request
/// - `503 Service Unavailable`: the relay cannot take the message right now;
///   a full buffer carries `Retry-After: 1`
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Outbound buffer full or closed
    #[error("{0}")]
    Backpressure(#[from] BackpressureError),

    /// Broker failure while draining the dead-letter sub-queue
    #[error("Dead-letter drain failed: {0}")]
    DeadLetterDrain(#[source] TransportError),

    #[error("Bad request: {message}")]
    BadRequest { message: String },
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, retry_after) = match &self {
            Self::Backpressure(BackpressureError::BufferFull { capacity }) => {
                warn!(capacity = capacity, "Rejecting submission: outbound buffer full");
                (StatusCode::SERVICE_UNAVAILABLE, Some(1))
            }
            Self::Backpressure(BackpressureError::Closed) => {
                warn!("Rejecting submission: relay is shutting down");
                (StatusCode::SERVICE_UNAVAILABLE, None)
            }
            Self::DeadLetterDrain(e) => {
                error!(error = %e, "Dead-letter drain failed");
                (StatusCode::BAD_GATEWAY, None)
            }
            Self::BadRequest { .. } => (StatusCode::BAD_REQUEST, None),
        };

        let body = serde_json::json!({
            "error": self.to_string(),
            "status": status.as_u16(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        let mut response = (status, Json(body)).into_response();

        if let Some(retry_seconds) = retry_after {
            if let Ok(header_value) = retry_seconds.to_string().parse() {
                response.headers_mut().insert("Retry-After", header_value);
            }
        }

        response
    }
}

/// Service-level errors
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Failed to bind to address {address}: {message}")]
    BindFailed { address: String, message: String },

    #[error("Server failed: {message}")]
    ServerFailed { message: String },

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),
}

impl ServiceError {
    /// Process exit code for a fatal service error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::BindFailed { .. } => 1,
            Self::ServerFailed { .. } => 2,
            Self::Configuration(_) => 3,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Unusable broker settings: {0}")]
    Provider(#[from] ConfigurationError),

    #[error("Configuration loading failed: {0}")]
    Load(#[from] ::config::ConfigError),
}
