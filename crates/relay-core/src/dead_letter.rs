//! Diagnostic drain of a queue's dead-letter sub-queue.
//!
//! Each message is read in peek-lock mode and completed once copied, so a
//! drain empties the sub-queue. Draining stops at the first receive that times
//! out, which keeps an empty sub-queue from hanging the caller.

use crate::config::DrainOptions;
use relay_runtime::{QueueName, ReceivedMessage, TransportClient, TransportError};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

#[cfg(test)]
#[path = "dead_letter_tests.rs"]
mod tests;

/// Snapshot of a dead-lettered message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeadLetteredMessage {
    pub message_id: String,

    /// Body decoded as UTF-8, with invalid sequences replaced
    pub body: String,

    pub headers: HashMap<String, String>,
    pub correlation_id: Option<String>,
    pub reason: Option<String>,
    pub description: Option<String>,
    pub delivery_count: u32,
    pub enqueued_at: String,
}

impl From<&ReceivedMessage> for DeadLetteredMessage {
    fn from(message: &ReceivedMessage) -> Self {
        let (reason, description) = match &message.dead_letter {
            Some(info) => (Some(info.reason.clone()), Some(info.description.clone())),
            None => (None, None),
        };

        Self {
            message_id: message.message_id.to_string(),
            body: String::from_utf8_lossy(&message.body).into_owned(),
            headers: message.headers.clone(),
            correlation_id: message.correlation_id.clone(),
            reason,
            description,
            delivery_count: message.delivery_count,
            enqueued_at: message.enqueued_at.as_datetime().to_rfc3339(),
        }
    }
}

/// Receive and complete every dead-lettered message of `queue`
///
/// If the transport fails after some messages were collected, the partial list
/// is returned; messages already completed are gone from the broker.
///
/// A message whose completion fails stays at the broker and may be handed out
/// again once its lock expires. It is listed once: the redelivery is completed
/// without being listed, and if that completion fails too the drain stops.
pub async fn drain_dead_letters(
    transport: &dyn TransportClient,
    queue: &QueueName,
    options: &DrainOptions,
) -> Result<Vec<DeadLetteredMessage>, TransportError> {
    let mut drained = Vec::new();
    let mut seen = HashSet::new();

    loop {
        if options.max_messages.is_some_and(|max| drained.len() >= max) {
            break;
        }

        let delivery = match transport
            .receive_dead_letter(queue, options.receive_timeout)
            .await
        {
            Ok(delivery) => delivery,
            Err(err) if !drained.is_empty() => {
                warn!(
                    queue = %queue,
                    error = %err,
                    collected = drained.len(),
                    "Dead-letter drain interrupted; returning partial result"
                );
                break;
            }
            Err(err) => return Err(err),
        };

        let Some((message, handle)) = delivery else {
            break;
        };

        if seen.contains(&message.message_id) {
            if let Err(err) = handle.checkpoint_success().await {
                warn!(
                    message_id = %message.message_id,
                    error = %err,
                    "Failed to complete redelivered dead-lettered message; stopping drain"
                );
                break;
            }
            debug!(message_id = %message.message_id, "Redelivered dead-lettered message completed");
            continue;
        }
        seen.insert(message.message_id.clone());

        let snapshot = DeadLetteredMessage::from(&message);
        if let Err(err) = handle.checkpoint_success().await {
            // still listed; the broker keeps it and will hand it out again
            warn!(
                message_id = %message.message_id,
                error = %err,
                "Failed to complete dead-lettered message"
            );
        } else {
            debug!(message_id = %message.message_id, "Dead-lettered message drained");
        }
        drained.push(snapshot);
    }

    info!(queue = %queue, count = drained.len(), "Dead-letter drain finished");
    Ok(drained)
}
