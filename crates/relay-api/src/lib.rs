//! # Message Relay HTTP Service
//!
//! HTTP surface of the message relay.
//!
//! This service provides:
//! - `POST /send`: ingress; buffers the request body for sending
//! - `GET /dead-letters`: diagnostic drain of the dead-letter sub-queue
//! - `GET /health`: liveness and outbound buffer usage
//! - `GET /api/stats`: relay and emitter counters

pub mod config;
pub mod errors;

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;

pub use crate::config::{
    BrokerConfig, BrokerCredential, EmitterSettings, LoggingConfig, RelaySettings, ServerConfig,
    ServiceConfig, CONFIG_FILE_ENV, ENV_PREFIX,
};
pub use crate::errors::{ApiError, ConfigError, ServiceError};

use axum::{
    extract::{DefaultBodyLimit, Query, State},
    http::{header::CONTENT_TYPE, HeaderMap, StatusCode},
    middleware,
    response::{Json, Response},
    routing::{get, post},
    Router,
};
use bytes::Bytes;
use relay_core::{
    drain_dead_letters, DeadLetteredMessage, DrainOptions, EmitterStatsSnapshot, Ingress,
    RelayEngine, RelayStatsSnapshot, ShutdownSignal,
};
use relay_runtime::{QueueName, Timestamp, TransportClient};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, sync::Arc};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument, warn};

/// Header carrying the request correlation ID
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

// ============================================================================
// Application State
// ============================================================================

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// HTTP server settings
    pub server: ServerConfig,

    /// Entry point for submitted payloads
    pub ingress: Ingress,

    /// Relay engine, for statistics
    pub engine: RelayEngine,

    /// Transport used for the dead-letter drain
    pub transport: Arc<dyn TransportClient>,

    /// Queue whose dead-letter sub-queue is drained
    pub dead_letter_queue: QueueName,

    pub drain_options: DrainOptions,
}

impl AppState {
    pub fn new(
        server: ServerConfig,
        ingress: Ingress,
        engine: RelayEngine,
        transport: Arc<dyn TransportClient>,
        dead_letter_queue: QueueName,
        drain_options: DrainOptions,
    ) -> Self {
        Self {
            server,
            ingress,
            engine,
            transport,
            dead_letter_queue,
            drain_options,
        }
    }
}

// ============================================================================
// HTTP Server
// ============================================================================

/// Create HTTP router with all endpoints
pub fn create_router(state: AppState) -> Router {
    let max_body_size = state.server.max_body_size;

    Router::new()
        .route("/send", post(handle_send))
        .route("/dead-letters", get(handle_drain_dead_letters))
        .route("/health", get(handle_health_check))
        .route("/api/stats", get(get_statistics))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::from_fn(request_logging_middleware))
                .layer(DefaultBodyLimit::max(max_body_size))
                .into_inner(),
        )
        .with_state(state)
}

/// Serve the router until `shutdown` fires
///
/// In-flight requests complete before this returns.
pub async fn start_server(state: AppState, mut shutdown: ShutdownSignal) -> Result<(), ServiceError> {
    let address = format!("{}:{}", state.server.host, state.server.port);
    let addr: SocketAddr = address.parse().map_err(|e| ServiceError::BindFailed {
        address: address.clone(),
        message: format!("invalid address: {}", e),
    })?;

    let listener =
        tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| ServiceError::BindFailed {
                address: addr.to_string(),
                message: e.to_string(),
            })?;

    info!("Starting HTTP server on {}", addr);

    let app = create_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.triggered().await })
        .await
        .map_err(|e| ServiceError::ServerFailed {
            message: e.to_string(),
        })?;

    info!("HTTP server shutdown complete");
    Ok(())
}

// ============================================================================
// Handlers
// ============================================================================

/// Accept a payload for relaying
///
/// Returns as soon as the payload is buffered; broker acknowledgement is not
/// awaited.
#[instrument(skip(state, headers, body), fields(size = body.len()))]
pub async fn handle_send(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<SendResponse>), ApiError> {
    if body.is_empty() {
        return Err(ApiError::BadRequest {
            message: "request body must not be empty".to_string(),
        });
    }

    let content_type = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok());
    let message_id = state.ingress.submit(body, content_type)?;

    info!(message_id = %message_id, "Payload accepted for relay");

    Ok((
        StatusCode::ACCEPTED,
        Json(SendResponse {
            message_id: message_id.to_string(),
            status: "accepted".to_string(),
        }),
    ))
}

/// Drain and list the dead-lettered messages
#[instrument(skip(state))]
async fn handle_drain_dead_letters(
    State(state): State<AppState>,
    Query(params): Query<DeadLetterParams>,
) -> Result<Json<DeadLetterListResponse>, ApiError> {
    let options = DrainOptions {
        max_messages: params.limit,
        ..state.drain_options.clone()
    };

    let messages = drain_dead_letters(state.transport.as_ref(), &state.dead_letter_queue, &options)
        .await
        .map_err(ApiError::DeadLetterDrain)?;

    Ok(Json(DeadLetterListResponse {
        queue: state.dead_letter_queue.to_string(),
        count: messages.len(),
        messages,
    }))
}

/// Basic health check endpoint
#[instrument(skip(state))]
async fn handle_health_check(
    State(state): State<AppState>,
) -> Result<Json<HealthResponse>, (StatusCode, Json<HealthResponse>)> {
    let emitter = state.ingress.emitter();
    let is_healthy = !emitter.is_closed();

    let response = HealthResponse {
        status: if is_healthy { "healthy" } else { "unhealthy" }.to_string(),
        timestamp: Timestamp::now(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        outbound_buffered: emitter.buffered(),
        outbound_capacity: emitter.capacity(),
    };

    if is_healthy {
        Ok(Json(response))
    } else {
        Err((StatusCode::SERVICE_UNAVAILABLE, Json(response)))
    }
}

async fn get_statistics(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        relay: state.engine.stats(),
        emitter: state.ingress.emitter().stats(),
    })
}

// ============================================================================
// Middleware
// ============================================================================

/// Request logging middleware
///
/// Extracts or generates a correlation ID, logs request start and completion,
/// and echoes the correlation ID in the response headers.
#[instrument(skip(request, next), fields(
    method = %request.method(),
    uri = %request.uri(),
    correlation_id
))]
async fn request_logging_middleware(
    mut request: axum::extract::Request,
    next: axum::middleware::Next,
) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = std::time::Instant::now();

    let correlation_id = request
        .headers()
        .get(CORRELATION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    tracing::Span::current().record("correlation_id", correlation_id.as_str());
    request.extensions_mut().insert(correlation_id.clone());

    let mut response = next.run(request).await;
    let duration = start.elapsed();

    if let Ok(header_value) = correlation_id.parse() {
        response
            .headers_mut()
            .insert(CORRELATION_ID_HEADER, header_value);
    }

    let status = response.status();
    if status.is_server_error() {
        error!(
            method = %method,
            uri = %uri,
            status = %status,
            duration_ms = %duration.as_millis(),
            "Request completed with server error"
        );
    } else if status.is_client_error() {
        warn!(
            method = %method,
            uri = %uri,
            status = %status,
            duration_ms = %duration.as_millis(),
            "Request completed with client error"
        );
    } else {
        info!(
            method = %method,
            uri = %uri,
            status = %status,
            duration_ms = %duration.as_millis(),
            "Request completed successfully"
        );
    }

    response
}

// ============================================================================
// Request and Response Types
// ============================================================================

/// Ingress response
#[derive(Debug, Serialize, Deserialize)]
pub struct SendResponse {
    pub message_id: String,
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct DeadLetterParams {
    /// Stop after this many messages
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct DeadLetterListResponse {
    pub queue: String,
    pub count: usize,
    pub messages: Vec<DeadLetteredMessage>,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: Timestamp,
    pub version: String,
    pub outbound_buffered: usize,
    pub outbound_capacity: usize,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub relay: RelayStatsSnapshot,
    pub emitter: EmitterStatsSnapshot,
}
