//! # Outbound Emitter
//!
//! Bounded buffer between the ingress and the transport. Producers call
//! [`OutboundEmitter::submit`], which never blocks: when the buffer is full the
//! call fails with [`BackpressureError::BufferFull`] and nothing already
//! buffered is dropped. A [`SendLoop`] drains the buffer independently of the
//! relay engine's receive loop.
//!
//! ```rust
//! use bytes::Bytes;
//! use relay_core::{EmitterConfig, OutboundEmitter};
//! use relay_runtime::Message;
//!
//! let (emitter, _send_loop) = OutboundEmitter::new(EmitterConfig::new(2));
//! assert!(emitter.submit(Message::new(Bytes::from("one"))).is_ok());
//! assert!(emitter.submit(Message::new(Bytes::from("two"))).is_ok());
//! assert!(emitter.submit(Message::new(Bytes::from("three"))).is_err());
//! ```

use crate::config::EmitterConfig;
use crate::retry::{RetryPolicy, RetryState};
use crate::shutdown::ShutdownSignal;
use relay_runtime::{Message, QueueName, TransportClient, TransportError};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

#[cfg(test)]
#[path = "emitter_tests.rs"]
mod tests;

/// Submission refused by the outbound emitter
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackpressureError {
    #[error("Outbound buffer is full ({capacity} messages)")]
    BufferFull { capacity: usize },

    #[error("Outbound emitter is closed")]
    Closed,
}

/// Counters for the emitter and its send loop
#[derive(Debug, Default)]
pub struct EmitterStats {
    submitted: AtomicU64,
    rejected: AtomicU64,
    sent: AtomicU64,
    failed: AtomicU64,
}

impl EmitterStats {
    pub fn snapshot(&self) -> EmitterStatsSnapshot {
        EmitterStatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EmitterStatsSnapshot {
    pub submitted: u64,
    pub rejected: u64,
    pub sent: u64,
    pub failed: u64,
}

/// Producer side of the outbound buffer
///
/// Clones submit into the same buffer.
#[derive(Debug, Clone)]
pub struct OutboundEmitter {
    sender: mpsc::Sender<Message>,
    capacity: usize,
    stats: Arc<EmitterStats>,
}

impl OutboundEmitter {
    /// Create an emitter and the loop that drains it
    ///
    /// A capacity of zero is raised to one.
    pub fn new(config: EmitterConfig) -> (Self, SendLoop) {
        let capacity = config.capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        let stats = Arc::new(EmitterStats::default());

        let emitter = Self {
            sender,
            capacity,
            stats: stats.clone(),
        };
        let send_loop = SendLoop {
            receiver,
            retry_policy: config.retry_policy,
            stats,
        };
        (emitter, send_loop)
    }

    /// Buffer a message for sending without waiting
    pub fn submit(&self, message: Message) -> Result<(), BackpressureError> {
        let message_id = message.message_id.clone();
        match self.sender.try_send(message) {
            Ok(()) => {
                self.stats.submitted.fetch_add(1, Ordering::Relaxed);
                debug!(message_id = %message_id, "Message buffered for sending");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                warn!(
                    message_id = %message_id,
                    capacity = self.capacity,
                    "Outbound buffer full; rejecting message"
                );
                Err(BackpressureError::BufferFull {
                    capacity: self.capacity,
                })
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                Err(BackpressureError::Closed)
            }
        }
    }

    /// Messages waiting in the buffer
    pub fn buffered(&self) -> usize {
        self.capacity - self.sender.capacity()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    pub fn stats(&self) -> EmitterStatsSnapshot {
        self.stats.snapshot()
    }
}

/// Consumer side of the outbound buffer
pub struct SendLoop {
    receiver: mpsc::Receiver<Message>,
    retry_policy: RetryPolicy,
    stats: Arc<EmitterStats>,
}

impl SendLoop {
    /// Send buffered messages to `queue` until shutdown
    ///
    /// On shutdown the buffer stops accepting submissions and whatever is
    /// already buffered is sent before returning.
    pub async fn run(
        mut self,
        transport: Arc<dyn TransportClient>,
        queue: QueueName,
        mut shutdown: ShutdownSignal,
    ) {
        info!(queue = %queue, "Send loop started");

        loop {
            let message = tokio::select! {
                biased;
                _ = shutdown.triggered() => break,
                message = self.receiver.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };
            self.send(transport.as_ref(), &queue, message).await;
        }

        self.receiver.close();
        let mut drained = 0usize;
        while let Ok(message) = self.receiver.try_recv() {
            self.send(transport.as_ref(), &queue, message).await;
            drained += 1;
        }

        info!(queue = %queue, drained, "Send loop stopped");
    }

    async fn send(&self, transport: &dyn TransportClient, queue: &QueueName, message: Message) {
        let message_id = message.message_id.clone();
        let mut retry_state = RetryState::new();

        loop {
            match transport.send(queue, message.clone()).await {
                Ok(_) => {
                    self.stats.sent.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        message_id = %message_id,
                        queue = %queue,
                        attempts = retry_state.total_attempts,
                        "Message sent"
                    );
                    return;
                }
                Err(err) if err.is_transient() && retry_state.can_retry(&self.retry_policy) => {
                    let delay = self.retry_policy.delay_for(&err, retry_state.attempt);
                    warn!(
                        message_id = %message_id,
                        error = %err,
                        attempt = retry_state.attempt,
                        delay = ?delay,
                        "Send failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    retry_state.next_attempt();
                }
                Err(err) => {
                    self.stats.failed.fetch_add(1, Ordering::Relaxed);
                    log_send_failure(&message_id, queue, &err, retry_state.total_attempts);
                    return;
                }
            }
        }
    }
}

fn log_send_failure(
    message_id: &relay_runtime::MessageId,
    queue: &QueueName,
    err: &TransportError,
    attempts: u32,
) {
    error!(
        message_id = %message_id,
        queue = %queue,
        error = %err,
        attempts,
        "Failed to send message; giving up"
    );
}
