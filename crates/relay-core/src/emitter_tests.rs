//! Tests for the outbound emitter and send loop.

use super::*;
use crate::shutdown::Shutdown;
use async_trait::async_trait;
use bytes::Bytes;
use relay_runtime::{Delivery, InMemoryTransport, MessageId, ProviderType};
use std::sync::Mutex;
use std::time::Duration;

fn queue(name: &str) -> QueueName {
    QueueName::new(name.to_string()).unwrap()
}

fn text(body: &'static str) -> Message {
    Message::new(Bytes::from(body))
}

fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(
        max_attempts,
        Duration::from_millis(1),
        Duration::from_millis(5),
        2.0,
    )
    .without_jitter()
}

/// Transport whose sends fail a set number of times before succeeding
struct FlakyTransport {
    failures: Mutex<u32>,
    error: fn() -> TransportError,
    sent: Mutex<Vec<Bytes>>,
    attempts: Mutex<u32>,
}

impl FlakyTransport {
    fn new(failures: u32, error: fn() -> TransportError) -> Self {
        Self {
            failures: Mutex::new(failures),
            error,
            sent: Mutex::new(Vec::new()),
            attempts: Mutex::new(0),
        }
    }

    fn sent(&self) -> Vec<Bytes> {
        self.sent.lock().unwrap().clone()
    }

    fn attempts(&self) -> u32 {
        *self.attempts.lock().unwrap()
    }
}

#[async_trait]
impl TransportClient for FlakyTransport {
    async fn send(&self, _queue: &QueueName, message: Message) -> Result<MessageId, TransportError> {
        *self.attempts.lock().unwrap() += 1;
        let mut failures = self.failures.lock().unwrap();
        if *failures > 0 {
            *failures -= 1;
            return Err((self.error)());
        }
        self.sent.lock().unwrap().push(message.body.clone());
        Ok(message.message_id)
    }

    async fn receive(
        &self,
        _queue: &QueueName,
        _timeout: Duration,
    ) -> Result<Option<Delivery>, TransportError> {
        Ok(None)
    }

    async fn receive_dead_letter(
        &self,
        _queue: &QueueName,
        _timeout: Duration,
    ) -> Result<Option<Delivery>, TransportError> {
        Ok(None)
    }

    async fn close(&self) -> Result<(), TransportError> {
        Ok(())
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::InMemory
    }
}

// ============================================================================
// Submission
// ============================================================================

mod submit {
    use super::*;

    #[test]
    fn test_full_buffer_rejects_without_dropping_buffered_messages() {
        let (emitter, _send_loop) = OutboundEmitter::new(EmitterConfig::new(3));

        let results: Vec<_> = ["one", "two", "three", "four", "five"]
            .into_iter()
            .map(|body| emitter.submit(text(body)))
            .collect();

        assert!(results[..3].iter().all(Result::is_ok));
        assert_eq!(results[3], Err(BackpressureError::BufferFull { capacity: 3 }));
        assert_eq!(results[4], Err(BackpressureError::BufferFull { capacity: 3 }));
        assert_eq!(emitter.buffered(), 3);

        let stats = emitter.stats();
        assert_eq!(stats.submitted, 3);
        assert_eq!(stats.rejected, 2);
    }

    #[test]
    fn test_zero_capacity_is_raised_to_one() {
        let (emitter, _send_loop) = OutboundEmitter::new(EmitterConfig::new(0));

        assert_eq!(emitter.capacity(), 1);
        assert!(emitter.submit(text("one")).is_ok());
        assert!(emitter.submit(text("two")).is_err());
    }

    #[test]
    fn test_submit_after_send_loop_dropped_reports_closed() {
        let (emitter, send_loop) = OutboundEmitter::new(EmitterConfig::new(3));
        drop(send_loop);

        assert!(emitter.is_closed());
        assert_eq!(emitter.submit(text("one")), Err(BackpressureError::Closed));
    }

    #[test]
    fn test_clones_share_the_buffer() {
        let (emitter, _send_loop) = OutboundEmitter::new(EmitterConfig::new(2));
        let other = emitter.clone();

        emitter.submit(text("one")).unwrap();
        other.submit(text("two")).unwrap();

        assert_eq!(emitter.buffered(), 2);
        assert!(other.submit(text("three")).is_err());
    }
}

// ============================================================================
// Send loop
// ============================================================================

mod send_loop {
    use super::*;

    #[tokio::test]
    async fn test_buffered_messages_are_sent_in_order_after_backpressure() {
        let transport = InMemoryTransport::default();
        let q = queue("outbound");
        let (emitter, send_loop) = OutboundEmitter::new(EmitterConfig::new(3));

        for body in ["one", "two", "three", "four"] {
            let _ = emitter.submit(text(body));
        }

        let shutdown = Shutdown::new();
        let task = tokio::spawn(send_loop.run(
            Arc::new(transport.clone()),
            q.clone(),
            shutdown.signal(),
        ));

        let mut bodies = Vec::new();
        for _ in 0..3 {
            let (received, handle) = transport
                .receive(&q, Duration::from_secs(2))
                .await
                .unwrap()
                .expect("buffered message should be sent");
            bodies.push(received.body_text().unwrap().to_string());
            handle.checkpoint_success().await.unwrap();
        }
        assert_eq!(bodies, vec!["one", "two", "three"]);

        shutdown.trigger();
        task.await.unwrap();
        assert_eq!(emitter.stats().sent, 3);
    }

    #[tokio::test]
    async fn test_shutdown_sends_remaining_buffer_then_closes() {
        let transport = Arc::new(FlakyTransport::new(0, || TransportError::Closed));
        let (emitter, send_loop) = OutboundEmitter::new(EmitterConfig::new(4));
        emitter.submit(text("one")).unwrap();
        emitter.submit(text("two")).unwrap();

        let shutdown = Shutdown::new();
        shutdown.trigger();
        send_loop
            .run(transport.clone(), queue("outbound"), shutdown.signal())
            .await;

        assert_eq!(transport.sent(), vec![Bytes::from("one"), Bytes::from("two")]);
        assert_eq!(emitter.submit(text("three")), Err(BackpressureError::Closed));
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let transport = Arc::new(FlakyTransport::new(2, || TransportError::ConnectionFailed {
            message: "connection reset".to_string(),
        }));
        let (emitter, send_loop) =
            OutboundEmitter::new(EmitterConfig::new(4).with_retry_policy(fast_retry(3)));
        emitter.submit(text("one")).unwrap();

        let shutdown = Shutdown::new();
        shutdown.trigger();
        send_loop
            .run(transport.clone(), queue("outbound"), shutdown.signal())
            .await;

        assert_eq!(transport.attempts(), 3);
        assert_eq!(transport.sent(), vec![Bytes::from("one")]);
        assert_eq!(emitter.stats().sent, 1);
        assert_eq!(emitter.stats().failed, 0);
    }

    #[tokio::test]
    async fn test_retries_stop_at_policy_limit() {
        let transport = Arc::new(FlakyTransport::new(10, || TransportError::ConnectionFailed {
            message: "connection reset".to_string(),
        }));
        let (emitter, send_loop) =
            OutboundEmitter::new(EmitterConfig::new(4).with_retry_policy(fast_retry(2)));
        emitter.submit(text("one")).unwrap();

        let shutdown = Shutdown::new();
        shutdown.trigger();
        send_loop
            .run(transport.clone(), queue("outbound"), shutdown.signal())
            .await;

        // initial attempt plus two retries
        assert_eq!(transport.attempts(), 3);
        assert_eq!(emitter.stats().failed, 1);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let transport = Arc::new(FlakyTransport::new(1, || TransportError::MessageTooLarge {
            size: 20,
            max_size: 10,
        }));
        let (emitter, send_loop) =
            OutboundEmitter::new(EmitterConfig::new(4).with_retry_policy(fast_retry(5)));
        emitter.submit(text("one")).unwrap();
        emitter.submit(text("two")).unwrap();

        let shutdown = Shutdown::new();
        shutdown.trigger();
        send_loop
            .run(transport.clone(), queue("outbound"), shutdown.signal())
            .await;

        assert_eq!(transport.attempts(), 2);
        assert_eq!(transport.sent(), vec![Bytes::from("two")]);
        let stats = emitter.stats();
        assert_eq!(stats.sent, 1);
        assert_eq!(stats.failed, 1);
    }
}
