//! Common test utilities for message relay integration tests
//!
//! This module provides:
//! - A fully wired relay (in-memory transport, engine, emitter, ingress, router)
//!   with its background loops running
//! - Request builders for the HTTP surface
//! - Helpers for collecting relay outcomes

#![allow(dead_code)]

use axum::body::Body;
use axum::http::Request;
use axum::Router;
use relay_api::{create_router, AppState, ServerConfig};
use relay_core::{
    DrainOptions, EmitterConfig, Ingress, MinLengthValidator, OutboundEmitter, RelayConfig,
    RelayEngine, RelayReport, RetryPolicy, Shutdown, SuffixTransformer,
};
use relay_runtime::{InMemoryConfig, InMemoryTransport, QueueName};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Duration;

pub const SOURCE_QUEUE: &str = "relay-inbound";
pub const FORWARD_QUEUE: &str = "relay-outbound";

pub fn queue(name: &str) -> QueueName {
    QueueName::new(name.to_string()).unwrap()
}

/// A relay with its relay loop and send loop running
pub struct TestRelay {
    pub transport: InMemoryTransport,
    pub engine: RelayEngine,
    pub state: AppState,
    pub reports: broadcast::Receiver<RelayReport>,
    shutdown: Shutdown,
    tasks: Vec<JoinHandle<()>>,
}

impl TestRelay {
    /// Start a relay whose ingress feeds the queue it consumes from
    pub fn start(capacity: usize) -> Self {
        Self::start_with(capacity, InMemoryConfig::default(), None)
    }

    /// Start a relay that also forwards transformed payloads
    pub fn start_forwarding(capacity: usize) -> Self {
        Self::start_with(capacity, InMemoryConfig::default(), Some(queue(FORWARD_QUEUE)))
    }

    pub fn start_with(
        capacity: usize,
        broker: InMemoryConfig,
        forward_to: Option<QueueName>,
    ) -> Self {
        let transport = InMemoryTransport::new(broker);
        let source = queue(SOURCE_QUEUE);

        let mut relay_config =
            RelayConfig::new(source.clone()).with_receive_timeout(Duration::from_millis(20));
        if let Some(forward_to) = forward_to {
            relay_config = relay_config.with_forward_to(forward_to);
        }

        let engine = RelayEngine::new(
            Arc::new(transport.clone()),
            Arc::new(MinLengthValidator::default()),
            Arc::new(SuffixTransformer::default()),
            relay_config,
        );
        let reports = engine.subscribe();

        let emitter_config = EmitterConfig::new(capacity).with_retry_policy(fast_retry());
        let (emitter, send_loop) = OutboundEmitter::new(emitter_config);

        let shutdown = Shutdown::new();
        let relay_task = {
            let engine = engine.clone();
            let signal = shutdown.signal();
            tokio::spawn(async move { engine.run(signal).await })
        };
        let send_task = tokio::spawn(send_loop.run(
            Arc::new(transport.clone()),
            source.clone(),
            shutdown.signal(),
        ));

        let state = AppState::new(
            ServerConfig::default(),
            Ingress::new(emitter),
            engine.clone(),
            Arc::new(transport.clone()),
            source,
            drain_options(),
        );

        Self {
            transport,
            engine,
            state,
            reports,
            shutdown,
            tasks: vec![relay_task, send_task],
        }
    }

    pub fn router(&self) -> Router {
        create_router(self.state.clone())
    }

    /// Wait for the next `count` relay outcomes
    pub async fn next_reports(&mut self, count: usize) -> Vec<RelayReport> {
        let mut reports = Vec::with_capacity(count);
        for _ in 0..count {
            let report = tokio::time::timeout(Duration::from_secs(5), self.reports.recv())
                .await
                .expect("relay outcome should arrive")
                .expect("report channel should stay open");
            reports.push(report);
        }
        reports
    }

    /// Trigger shutdown and wait for both loops to finish
    pub async fn stop(self) {
        self.shutdown.trigger();
        for task in self.tasks {
            tokio::time::timeout(Duration::from_secs(5), task)
                .await
                .expect("loop should stop after shutdown")
                .expect("loop should not panic");
        }
    }
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(5), 2.0).without_jitter()
}

pub fn drain_options() -> DrainOptions {
    DrainOptions {
        receive_timeout: Duration::from_millis(20),
        max_messages: None,
    }
}

/// Build a POST /send request with a JSON body
pub fn send_json(body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/send")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
