//! In-memory broker implementation for testing and development.
//!
//! This provider implements the full consumed interface of the relay:
//! - Peek-lock receive with lock expiry and delivery counting
//! - Per-queue dead-letter sub-queue with recorded reason/description
//! - Automatic dead-lettering once the max delivery count is reached
//! - Receivers that wake on send instead of polling
//!
//! It is also the reference behaviour for broker adapters.

use crate::error::TransportError;
use crate::message::{
    DeadLetterInfo, Message, MessageId, QueueName, ReceiptHandle, ReceivedMessage, Timestamp,
};
use crate::provider::{InMemoryConfig, ProviderType};
use crate::transport::{Delivery, DispositionHandle, DispositionSink, TransportClient};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

/// Reason recorded when the broker dead-letters a message on its own
pub const MAX_DELIVERY_COUNT_EXCEEDED: &str = "MaxDeliveryCountExceeded";

/// Upper bound on a single wait so expired locks are noticed without a send
const LOCK_SCAN_INTERVAL: Duration = Duration::from_millis(50);

// ============================================================================
// Internal Storage Structures
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubQueue {
    Main,
    DeadLetter,
}

/// A message stored in the queue with metadata
#[derive(Clone)]
struct StoredMessage {
    message_id: MessageId,
    body: Bytes,
    headers: HashMap<String, String>,
    correlation_id: Option<String>,
    enqueued_at: Timestamp,
    delivery_count: u32,
    dead_letter: Option<DeadLetterInfo>,
}

impl StoredMessage {
    fn from_message(message: Message) -> Self {
        Self {
            message_id: message.message_id,
            body: message.body,
            headers: message.headers,
            correlation_id: message.correlation_id,
            enqueued_at: Timestamp::now(),
            delivery_count: 0,
            dead_letter: None,
        }
    }

    fn to_received(&self) -> ReceivedMessage {
        ReceivedMessage {
            message_id: self.message_id.clone(),
            body: self.body.clone(),
            headers: self.headers.clone(),
            correlation_id: self.correlation_id.clone(),
            delivery_count: self.delivery_count,
            enqueued_at: self.enqueued_at.clone(),
            delivered_at: Timestamp::now(),
            dead_letter: self.dead_letter.clone(),
        }
    }
}

/// Internal queue state for a single queue
#[derive(Default)]
struct InMemoryQueue {
    messages: VecDeque<StoredMessage>,
    dead_letter: VecDeque<StoredMessage>,
}

impl InMemoryQueue {
    fn sub_queue(&mut self, sub_queue: SubQueue) -> &mut VecDeque<StoredMessage> {
        match sub_queue {
            SubQueue::Main => &mut self.messages,
            SubQueue::DeadLetter => &mut self.dead_letter,
        }
    }
}

/// A message currently locked by a receiver
struct LockedMessage {
    queue: QueueName,
    sub_queue: SubQueue,
    message: StoredMessage,
    lock_expires_at: Timestamp,
}

impl LockedMessage {
    fn is_expired(&self) -> bool {
        Timestamp::now() >= self.lock_expires_at
    }
}

struct QueueStorage {
    queues: HashMap<QueueName, InMemoryQueue>,
    locks: HashMap<String, LockedMessage>,
    config: InMemoryConfig,
}

impl QueueStorage {
    fn new(config: InMemoryConfig) -> Self {
        Self {
            queues: HashMap::new(),
            locks: HashMap::new(),
            config,
        }
    }

    fn queue_mut(&mut self, queue: &QueueName) -> &mut InMemoryQueue {
        self.queues.entry(queue.clone()).or_default()
    }

    /// Return messages whose lock expired to the head of their sub-queue
    fn reclaim_expired_locks(&mut self) {
        let expired: Vec<String> = self
            .locks
            .iter()
            .filter(|(_, locked)| locked.is_expired())
            .map(|(receipt, _)| receipt.clone())
            .collect();

        for receipt in expired {
            if let Some(locked) = self.locks.remove(&receipt) {
                debug!(
                    message_id = %locked.message.message_id,
                    queue = %locked.queue,
                    "Message lock expired; returning message to queue"
                );
                self.release(locked);
            }
        }
    }

    /// Put a released message back, dead-lettering it once it has been
    /// delivered `max_delivery_count` times.
    fn release(&mut self, locked: LockedMessage) {
        let max_delivery_count = self.config.max_delivery_count;
        let LockedMessage {
            queue,
            sub_queue,
            mut message,
            ..
        } = locked;

        if sub_queue == SubQueue::Main && message.delivery_count >= max_delivery_count {
            warn!(
                message_id = %message.message_id,
                queue = %queue,
                delivery_count = message.delivery_count,
                "Max delivery count reached; dead-lettering message"
            );
            message.dead_letter = Some(DeadLetterInfo {
                reason: MAX_DELIVERY_COUNT_EXCEEDED.to_string(),
                description: format!(
                    "Message could not be consumed after {} delivery attempts",
                    message.delivery_count
                ),
            });
            self.queue_mut(&queue).dead_letter.push_back(message);
        } else {
            self.queue_mut(&queue).sub_queue(sub_queue).push_front(message);
        }
    }

    fn take_next(&mut self, queue: &QueueName, sub_queue: SubQueue) -> Option<(StoredMessage, String, Timestamp)> {
        let lock_duration = self.config.lock_duration;
        let mut message = self.queues.get_mut(queue)?.sub_queue(sub_queue).pop_front()?;
        message.delivery_count += 1;

        let receipt = uuid::Uuid::new_v4().to_string();
        let lock_expires_at = Timestamp::now().add(lock_duration);
        self.locks.insert(
            receipt.clone(),
            LockedMessage {
                queue: queue.clone(),
                sub_queue,
                message: message.clone(),
                lock_expires_at: lock_expires_at.clone(),
            },
        );

        Some((message, receipt, lock_expires_at))
    }

    /// Remove the lock for a receipt, failing if it expired or is unknown
    fn unlock(&mut self, receipt: &ReceiptHandle) -> Result<LockedMessage, TransportError> {
        self.reclaim_expired_locks();
        self.locks
            .remove(receipt.handle())
            .ok_or_else(|| TransportError::LockLost {
                receipt: receipt.handle().to_string(),
            })
    }
}

// ============================================================================
// Broker
// ============================================================================

struct Broker {
    storage: RwLock<QueueStorage>,
    notify: Notify,
    closed: AtomicBool,
    fail_completions: AtomicU32,
}

impl Broker {
    fn write(&self) -> std::sync::RwLockWriteGuard<'_, QueueStorage> {
        self.storage.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, QueueStorage> {
        self.storage.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl DispositionSink for Broker {
    async fn complete(&self, receipt: &ReceiptHandle) -> Result<(), TransportError> {
        let injected = self
            .fail_completions
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(TransportError::ProviderError {
                provider: ProviderType::InMemory.as_str().to_string(),
                code: "InjectedFailure".to_string(),
                message: "completion failure injected by test".to_string(),
            });
        }

        let locked = self.write().unlock(receipt)?;
        debug!(message_id = %locked.message.message_id, queue = %locked.queue, "Message completed");
        Ok(())
    }

    async fn abandon(&self, receipt: &ReceiptHandle) -> Result<(), TransportError> {
        {
            let mut storage = self.write();
            let locked = storage.unlock(receipt)?;
            debug!(message_id = %locked.message.message_id, queue = %locked.queue, "Message abandoned");
            storage.release(locked);
        }
        self.notify.notify_waiters();
        Ok(())
    }

    async fn dead_letter(
        &self,
        receipt: &ReceiptHandle,
        reason: &str,
        description: &str,
    ) -> Result<(), TransportError> {
        let mut storage = self.write();
        let mut locked = storage.unlock(receipt)?;
        debug!(
            message_id = %locked.message.message_id,
            queue = %locked.queue,
            reason = %reason,
            "Message dead-lettered"
        );
        locked.message.dead_letter = Some(DeadLetterInfo {
            reason: reason.to_string(),
            description: description.to_string(),
        });
        storage
            .queue_mut(&locked.queue)
            .dead_letter
            .push_back(locked.message);
        Ok(())
    }
}

// ============================================================================
// InMemoryTransport
// ============================================================================

/// In-memory transport; clones share the same broker state
///
/// # Example
///
/// ```rust
/// use bytes::Bytes;
/// use relay_runtime::{InMemoryTransport, Message, QueueName, TransportClient};
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let transport = InMemoryTransport::default();
/// let queue = QueueName::new("orders".to_string()).unwrap();
///
/// transport.send(&queue, Message::new(Bytes::from("hello"))).await.unwrap();
///
/// let (message, handle) = transport
///     .receive(&queue, Duration::from_millis(10))
///     .await
///     .unwrap()
///     .unwrap();
/// assert_eq!(message.delivery_count, 1);
///
/// handle.checkpoint_success().await.unwrap();
/// assert_eq!(transport.queue_depth(&queue), 0);
/// # });
/// ```
#[derive(Clone)]
pub struct InMemoryTransport {
    broker: Arc<Broker>,
}

impl InMemoryTransport {
    pub fn new(config: InMemoryConfig) -> Self {
        Self {
            broker: Arc::new(Broker {
                storage: RwLock::new(QueueStorage::new(config)),
                notify: Notify::new(),
                closed: AtomicBool::new(false),
                fail_completions: AtomicU32::new(0),
            }),
        }
    }

    /// Number of messages waiting in the main queue
    pub fn queue_depth(&self, queue: &QueueName) -> usize {
        let mut storage = self.broker.write();
        storage.reclaim_expired_locks();
        storage.queues.get(queue).map_or(0, |q| q.messages.len())
    }

    /// Number of messages waiting in the dead-letter sub-queue
    pub fn dead_letter_depth(&self, queue: &QueueName) -> usize {
        let mut storage = self.broker.write();
        storage.reclaim_expired_locks();
        storage.queues.get(queue).map_or(0, |q| q.dead_letter.len())
    }

    /// Number of messages currently locked by receivers
    pub fn in_flight_count(&self) -> usize {
        self.broker.read().locks.len()
    }

    /// Make the next `count` completions fail with a transient provider error
    pub fn fail_next_completions(&self, count: u32) {
        self.broker.fail_completions.store(count, Ordering::Release);
    }

    fn try_receive(&self, queue: &QueueName, sub_queue: SubQueue) -> Option<Delivery> {
        let (message, receipt, expires_at) = {
            let mut storage = self.broker.write();
            storage.reclaim_expired_locks();
            storage.take_next(queue, sub_queue)?
        };

        let received = message.to_received();
        let receipt = ReceiptHandle::new(receipt, expires_at, ProviderType::InMemory);
        let sink: Arc<dyn DispositionSink> = self.broker.clone();
        let handle = DispositionHandle::new(received.message_id.clone(), receipt, sink);
        Some((received, handle))
    }

    async fn receive_from(
        &self,
        queue: &QueueName,
        sub_queue: SubQueue,
        timeout: Duration,
    ) -> Result<Option<Delivery>, TransportError> {
        let deadline = Instant::now() + timeout;

        loop {
            self.broker.ensure_open()?;

            let notified = self.broker.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(delivery) = self.try_receive(queue, sub_queue) {
                return Ok(Some(delivery));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }

            let wait = (deadline - now).min(LOCK_SCAN_INTERVAL);
            let _ = tokio::time::timeout(wait, notified).await;
        }
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new(InMemoryConfig::default())
    }
}

#[async_trait]
impl TransportClient for InMemoryTransport {
    async fn send(&self, queue: &QueueName, message: Message) -> Result<MessageId, TransportError> {
        self.broker.ensure_open()?;

        let max_size = ProviderType::InMemory.max_message_size();
        if message.size() > max_size {
            return Err(TransportError::MessageTooLarge {
                size: message.size(),
                max_size,
            });
        }

        let message_id = message.message_id.clone();
        {
            let mut storage = self.broker.write();
            let max_queue_size = storage.config.max_queue_size;
            let target = storage.queue_mut(queue);
            if target.messages.len() >= max_queue_size {
                return Err(TransportError::ProviderError {
                    provider: ProviderType::InMemory.as_str().to_string(),
                    code: "QuotaExceeded".to_string(),
                    message: format!("queue '{}' holds {} messages", queue, max_queue_size),
                });
            }
            target.messages.push_back(StoredMessage::from_message(message));
        }

        debug!(message_id = %message_id, queue = %queue, "Message enqueued");
        self.broker.notify.notify_waiters();
        Ok(message_id)
    }

    async fn receive(
        &self,
        queue: &QueueName,
        timeout: Duration,
    ) -> Result<Option<Delivery>, TransportError> {
        self.receive_from(queue, SubQueue::Main, timeout).await
    }

    async fn receive_dead_letter(
        &self,
        queue: &QueueName,
        timeout: Duration,
    ) -> Result<Option<Delivery>, TransportError> {
        self.receive_from(queue, SubQueue::DeadLetter, timeout).await
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.broker.closed.store(true, Ordering::Release);
        self.broker.notify.notify_waiters();
        Ok(())
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::InMemory
    }
}
