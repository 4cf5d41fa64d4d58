//! End-to-end tests: ingress -> emitter -> transport -> relay engine -> disposition

mod common;

use axum::http::StatusCode;
use common::{get, json_body, queue, send_json, TestRelay, FORWARD_QUEUE, SOURCE_QUEUE};
use relay_core::{RelayOutcome, PROCESSING_EXCEPTION, VALIDATION_EXCEPTION};
use relay_runtime::{InMemoryConfig, TransportClient};
use std::time::Duration;
use tower::ServiceExt;

/// Verify that a short name is dead-lettered and shows up in the drain
#[tokio::test]
async fn test_short_payload_is_dead_lettered_and_listed() {
    let mut relay = TestRelay::start(8);

    let response = relay
        .router()
        .oneshot(send_json(r#"{"name":"hi"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let reports = relay.next_reports(1).await;
    assert_eq!(
        reports[0].outcome,
        RelayOutcome::DeadLettered {
            reason: VALIDATION_EXCEPTION.to_string()
        }
    );

    let response = relay.router().oneshot(get("/dead-letters")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["count"], 1);
    assert_eq!(body["messages"][0]["body"], r#"{"name":"hi"}"#);
    assert_eq!(body["messages"][0]["reason"], VALIDATION_EXCEPTION);

    relay.stop().await;
}

/// Verify that a valid payload is transformed and checkpointed
#[tokio::test]
async fn test_valid_payload_is_transformed_and_checkpointed() {
    let mut relay = TestRelay::start(8);

    relay
        .router()
        .oneshot(send_json(r#"{"name":"hello world"}"#))
        .await
        .unwrap();

    let reports = relay.next_reports(1).await;
    match &reports[0].outcome {
        RelayOutcome::Processed { payload } => {
            let document: serde_json::Value = serde_json::from_slice(payload).unwrap();
            assert_eq!(document["name"], "hello world_Modified");
        }
        other => panic!("Expected Processed, got: {:?}", other),
    }

    let source = queue(SOURCE_QUEUE);
    assert_eq!(relay.transport.queue_depth(&source), 0);
    assert_eq!(relay.transport.dead_letter_depth(&source), 0);

    relay.stop().await;
}

/// Verify that every message reaches exactly one terminal disposition
#[tokio::test]
async fn test_every_message_is_disposed_exactly_once() {
    let mut relay = TestRelay::start(32);
    let bodies = [
        r#"{"name":"hello world"}"#,
        r#"{"name":"hi"}"#,
        "not json at all",
        r#"{"name":"a sufficiently long name"}"#,
        r#"{"other":"field"}"#,
        r#"{"name":"0123456789"}"#,
    ];

    for body in bodies {
        let response = relay.router().oneshot(send_json(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    let reports = relay.next_reports(bodies.len()).await;
    let processed = reports.iter().filter(|r| r.outcome.is_processed()).count();
    let dead_lettered = reports
        .iter()
        .filter(|r| matches!(r.outcome, RelayOutcome::DeadLettered { .. }))
        .count();
    assert_eq!(processed, 3);
    assert_eq!(dead_lettered, 3);

    let source = queue(SOURCE_QUEUE);
    assert_eq!(relay.transport.in_flight_count(), 0);
    assert_eq!(relay.transport.queue_depth(&source), 0);
    assert_eq!(relay.transport.dead_letter_depth(&source), 3);

    let stats = relay.engine.stats();
    assert_eq!(stats.received, 6);
    assert_eq!(stats.failed, 0);

    relay.stop().await;
}

/// Verify that a failed checkpoint falls back to a ProcessingException dead-letter
#[tokio::test]
async fn test_checkpoint_failure_dead_letters_with_processing_exception() {
    let mut relay = TestRelay::start(8);
    relay.transport.fail_next_completions(1);

    relay
        .router()
        .oneshot(send_json(r#"{"name":"hello world"}"#))
        .await
        .unwrap();

    let reports = relay.next_reports(1).await;
    assert!(matches!(
        reports[0].outcome,
        RelayOutcome::Failed {
            dead_lettered: true,
            ..
        }
    ));

    let response = relay.router().oneshot(get("/dead-letters")).await.unwrap();
    let body = json_body(response).await;
    assert_eq!(body["count"], 1);
    assert_eq!(body["messages"][0]["reason"], PROCESSING_EXCEPTION);

    relay.stop().await;
}

/// Verify that forwarding delivers the transformed payload downstream
#[tokio::test]
async fn test_forwarding_delivers_transformed_payload() {
    let mut relay = TestRelay::start_forwarding(8);

    relay
        .router()
        .oneshot(send_json(r#"{"name":"hello world","id":42}"#))
        .await
        .unwrap();
    relay.next_reports(1).await;

    let (forwarded, handle) = relay
        .transport
        .receive(&queue(FORWARD_QUEUE), Duration::from_millis(100))
        .await
        .unwrap()
        .expect("transformed payload should be forwarded");
    let document: serde_json::Value = serde_json::from_slice(&forwarded.body).unwrap();
    assert_eq!(document["name"], "hello world_Modified");
    assert_eq!(document["id"], 42);
    assert_eq!(forwarded.header("content-type"), Some("application/json"));
    handle.checkpoint_success().await.unwrap();

    relay.stop().await;
}

/// Verify that a message whose lock expires mid-processing is redelivered and relayed
#[tokio::test]
async fn test_expired_lock_leads_to_redelivery() {
    let broker = InMemoryConfig {
        lock_duration: Duration::from_millis(200),
        ..InMemoryConfig::default()
    };
    let transport = relay_runtime::InMemoryTransport::new(broker);
    let source = queue(SOURCE_QUEUE);
    let engine = relay_core::RelayEngine::new(
        std::sync::Arc::new(transport.clone()),
        std::sync::Arc::new(relay_core::MinLengthValidator::default()),
        std::sync::Arc::new(relay_core::SuffixTransformer::default()),
        relay_core::RelayConfig::new(source.clone()),
    );
    transport
        .send(
            &source,
            relay_runtime::Message::new(bytes::Bytes::from(r#"{"name":"hello world"}"#)),
        )
        .await
        .unwrap();

    let (first, stale) = transport
        .receive(&source, Duration::ZERO)
        .await
        .unwrap()
        .unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    let outcome = engine.on_message(&first, &stale).await;
    assert!(matches!(
        outcome,
        RelayOutcome::Failed {
            dead_lettered: false,
            ..
        }
    ));

    let (second, handle) = transport
        .receive(&source, Duration::from_millis(100))
        .await
        .unwrap()
        .expect("message should be redelivered");
    assert_eq!(second.message_id, first.message_id);
    assert_eq!(second.delivery_count, 2);

    // a fresh lock; checkpoint before it can lapse
    let outcome = engine.on_message(&second, &handle).await;
    assert!(outcome.is_processed());
    assert_eq!(transport.dead_letter_depth(&source), 0);
}
