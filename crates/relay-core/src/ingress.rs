//! Synchronous submission point feeding the outbound emitter.

use crate::emitter::{BackpressureError, OutboundEmitter};
use bytes::Bytes;
use relay_runtime::{Message, MessageId};
use tracing::debug;

#[cfg(test)]
#[path = "ingress_tests.rs"]
mod tests;

/// Header carrying the submitter's content type
pub const CONTENT_TYPE_HEADER: &str = "content-type";

/// Wraps raw payloads in message envelopes and hands them to the emitter
///
/// Submission returns as soon as the message is buffered; it does not wait
/// for the broker to accept it.
#[derive(Debug, Clone)]
pub struct Ingress {
    emitter: OutboundEmitter,
}

impl Ingress {
    pub fn new(emitter: OutboundEmitter) -> Self {
        Self { emitter }
    }

    /// Envelope `body` unchanged and buffer it for sending
    pub fn submit(
        &self,
        body: Bytes,
        content_type: Option<&str>,
    ) -> Result<MessageId, BackpressureError> {
        let mut message = Message::new(body);
        if let Some(content_type) = content_type {
            message = message.with_header(CONTENT_TYPE_HEADER, content_type);
        }

        let message_id = message.message_id.clone();
        self.emitter.submit(message)?;
        debug!(message_id = %message_id, "Payload accepted at ingress");
        Ok(message_id)
    }

    pub fn emitter(&self) -> &OutboundEmitter {
        &self.emitter
    }
}
