//! Transport traits consumed by the relay, and the per-message disposition handle.
//!
//! A [`TransportClient`] hands out each received message together with a
//! [`DispositionHandle`]. The handle is the only way to settle that message at
//! the broker and admits exactly one successful terminal operation.

use crate::error::{DispositionError, TransportError};
use crate::message::{Message, MessageId, QueueName, ReceiptHandle, ReceivedMessage};
use crate::provider::ProviderType;
use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[cfg(test)]
#[path = "transport_tests.rs"]
mod tests;

/// A received message paired with the handle that settles it
pub type Delivery = (ReceivedMessage, DispositionHandle);

/// Interface implemented by broker adapters
#[async_trait]
pub trait TransportClient: Send + Sync {
    /// Send a message to a queue. Durability is the broker's once this returns `Ok`.
    async fn send(&self, queue: &QueueName, message: Message) -> Result<MessageId, TransportError>;

    /// Receive the next message in peek-lock mode, waiting at most `timeout`.
    ///
    /// Returns `Ok(None)` when the timeout elapses without a message.
    async fn receive(
        &self,
        queue: &QueueName,
        timeout: Duration,
    ) -> Result<Option<Delivery>, TransportError>;

    /// Receive from the queue's dead-letter sub-queue in peek-lock mode.
    async fn receive_dead_letter(
        &self,
        queue: &QueueName,
        timeout: Duration,
    ) -> Result<Option<Delivery>, TransportError>;

    /// Release broker resources; subsequent sends and receives fail with `Closed`.
    async fn close(&self) -> Result<(), TransportError>;

    fn provider_type(&self) -> ProviderType;
}

/// Broker-side settlement operations behind a [`DispositionHandle`]
#[async_trait]
pub trait DispositionSink: Send + Sync {
    /// Remove the message permanently from its queue
    async fn complete(&self, receipt: &ReceiptHandle) -> Result<(), TransportError>;

    /// Release the lock so the message is redelivered
    async fn abandon(&self, receipt: &ReceiptHandle) -> Result<(), TransportError>;

    /// Move the message to the dead-letter sub-queue
    async fn dead_letter(
        &self,
        receipt: &ReceiptHandle,
        reason: &str,
        description: &str,
    ) -> Result<(), TransportError>;
}

/// Terminal outcome applied to a received message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Completed,
    Abandoned,
    DeadLettered,
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Completed => "completed",
            Self::Abandoned => "abandoned",
            Self::DeadLettered => "dead-lettered",
        };
        f.write_str(name)
    }
}

const PENDING: u8 = 0;
const SETTLING: u8 = 1;
const COMPLETED: u8 = 2;
const ABANDONED: u8 = 3;
const DEAD_LETTERED: u8 = 4;

impl Disposition {
    fn encode(self) -> u8 {
        match self {
            Self::Completed => COMPLETED,
            Self::Abandoned => ABANDONED,
            Self::DeadLettered => DEAD_LETTERED,
        }
    }

    fn decode(state: u8) -> Option<Self> {
        match state {
            COMPLETED => Some(Self::Completed),
            ABANDONED => Some(Self::Abandoned),
            DEAD_LETTERED => Some(Self::DeadLettered),
            _ => None,
        }
    }
}

/// Capability bound 1:1 to a received message
///
/// At most one terminal operation may succeed. A broker failure leaves the
/// handle pending so the caller can fall back to another disposition; any
/// call after success, or while another call is in flight, fails with a
/// [`DispositionError`] for which `is_programming_error()` is true.
pub struct DispositionHandle {
    message_id: MessageId,
    receipt: ReceiptHandle,
    sink: Arc<dyn DispositionSink>,
    state: AtomicU8,
}

impl DispositionHandle {
    pub fn new(message_id: MessageId, receipt: ReceiptHandle, sink: Arc<dyn DispositionSink>) -> Self {
        Self {
            message_id,
            receipt,
            sink,
            state: AtomicU8::new(PENDING),
        }
    }

    pub fn message_id(&self) -> &MessageId {
        &self.message_id
    }

    pub fn receipt(&self) -> &ReceiptHandle {
        &self.receipt
    }

    /// Disposition applied so far, if any
    pub fn disposition(&self) -> Option<Disposition> {
        Disposition::decode(self.state.load(Ordering::Acquire))
    }

    pub fn is_settled(&self) -> bool {
        self.disposition().is_some()
    }

    /// Acknowledge successful processing; the broker removes the message.
    pub async fn checkpoint_success(&self) -> Result<(), DispositionError> {
        let guard = self.begin()?;
        self.sink.complete(&self.receipt).await?;
        guard.commit(Disposition::Completed);
        Ok(())
    }

    /// Negative acknowledgement: the message goes back for redelivery.
    pub async fn checkpoint_failure(&self) -> Result<(), DispositionError> {
        self.abandon().await
    }

    pub async fn abandon(&self) -> Result<(), DispositionError> {
        let guard = self.begin()?;
        self.sink.abandon(&self.receipt).await?;
        guard.commit(Disposition::Abandoned);
        Ok(())
    }

    pub async fn dead_letter(&self, reason: &str, description: &str) -> Result<(), DispositionError> {
        let guard = self.begin()?;
        self.sink
            .dead_letter(&self.receipt, reason, description)
            .await?;
        guard.commit(Disposition::DeadLettered);
        Ok(())
    }

    fn begin(&self) -> Result<SettleGuard<'_>, DispositionError> {
        match self
            .state
            .compare_exchange(PENDING, SETTLING, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Ok(SettleGuard {
                state: &self.state,
                committed: false,
            }),
            Err(SETTLING) => Err(DispositionError::InProgress {
                message_id: self.message_id.clone(),
            }),
            Err(settled) => match Disposition::decode(settled) {
                Some(disposition) => Err(DispositionError::AlreadySettled {
                    message_id: self.message_id.clone(),
                    disposition,
                }),
                None => Err(DispositionError::InProgress {
                    message_id: self.message_id.clone(),
                }),
            },
        }
    }
}

impl fmt::Debug for DispositionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispositionHandle")
            .field("message_id", &self.message_id)
            .field("receipt", &self.receipt.handle())
            .field("disposition", &self.disposition())
            .finish()
    }
}

/// Returns the handle to pending unless the broker call succeeded.
///
/// Covers both broker errors and a settle future dropped mid-flight.
struct SettleGuard<'a> {
    state: &'a AtomicU8,
    committed: bool,
}

impl SettleGuard<'_> {
    fn commit(mut self, disposition: Disposition) {
        self.state.store(disposition.encode(), Ordering::Release);
        self.committed = true;
    }
}

impl Drop for SettleGuard<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.state.store(PENDING, Ordering::Release);
        }
    }
}
