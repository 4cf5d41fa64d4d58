//! # Relay Engine
//!
//! Consumes messages from a queue and settles each one exactly once:
//!
//! 1. Validate the message.
//! 2. Rejected messages are dead-lettered with the validator's reason.
//! 3. Accepted messages are transformed, optionally forwarded, then checkpointed.
//! 4. If transformation, forwarding or the checkpoint fails, the message is
//!    dead-lettered with reason [`PROCESSING_EXCEPTION`]. If that fails too the
//!    engine gives up on the handle and the broker redelivers after lock expiry.
//!
//! Exactly one [`RelayOutcome`] is produced per message, published to
//! subscribers and counted in [`RelayStats`]. Per-message errors never escape
//! the message's own processing path.
//!
//! Transport-level failures are not retried here; reconnecting is the
//! transport's job. The engine only reacts to the result of one delivery.

use crate::config::RelayConfig;
use crate::outcome::{RelayOutcome, RelayReport, RelayStats, RelayStatsSnapshot};
use crate::shutdown::ShutdownSignal;
use crate::transform::{TransformError, Transformer};
use crate::validator::{Payload, ValidationResult, Validator};
use bytes::Bytes;
use relay_runtime::{
    DispositionError, DispositionHandle, Message, QueueName, ReceivedMessage, TransportClient,
    TransportError,
};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;

/// Dead-letter reason used when an accepted message could not be processed
pub const PROCESSING_EXCEPTION: &str = "ProcessingException";

const REPORT_CHANNEL_CAPACITY: usize = 1024;

/// Failure while handling an accepted message
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("Transformation failed: {0}")]
    Transform(#[from] TransformError),

    #[error("Forwarding to '{queue}' failed: {source}")]
    Forward {
        queue: QueueName,
        #[source]
        source: TransportError,
    },

    #[error("Checkpoint failed: {0}")]
    Checkpoint(#[from] DispositionError),
}

impl ProcessingError {
    fn is_programming_error(&self) -> bool {
        matches!(self, Self::Checkpoint(err) if err.is_programming_error())
    }
}

struct EngineInner {
    transport: Arc<dyn TransportClient>,
    validator: Arc<dyn Validator>,
    transformer: Arc<dyn Transformer>,
    config: RelayConfig,
    reports: broadcast::Sender<RelayReport>,
    stats: RelayStats,
}

/// Orchestrates receive, validate, transform and disposition
///
/// Cloning is cheap; clones share configuration, statistics and subscribers.
#[derive(Clone)]
pub struct RelayEngine {
    inner: Arc<EngineInner>,
}

impl RelayEngine {
    pub fn new(
        transport: Arc<dyn TransportClient>,
        validator: Arc<dyn Validator>,
        transformer: Arc<dyn Transformer>,
        config: RelayConfig,
    ) -> Self {
        let (reports, _) = broadcast::channel(REPORT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(EngineInner {
                transport,
                validator,
                transformer,
                config,
                reports,
                stats: RelayStats::default(),
            }),
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.inner.config
    }

    /// Receive every outcome produced after this call
    pub fn subscribe(&self) -> broadcast::Receiver<RelayReport> {
        self.inner.reports.subscribe()
    }

    pub fn stats(&self) -> RelayStatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Relay one delivered message (push model)
    pub async fn on_message(
        &self,
        message: &ReceivedMessage,
        handle: &DispositionHandle,
    ) -> RelayOutcome {
        self.inner.stats.record_received();
        let outcome = self.relay(message, handle).await;

        self.inner.stats.record(&outcome);
        let report = RelayReport {
            message_id: message.message_id.clone(),
            delivery_count: message.delivery_count,
            outcome: outcome.clone(),
        };
        // no subscribers is fine
        let _ = self.inner.reports.send(report);

        outcome
    }

    /// Pull messages until `shutdown` fires, then wait for in-flight dispositions
    pub async fn run(&self, mut shutdown: ShutdownSignal) {
        let config = &self.inner.config;
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_dispositions.max(1)));
        let mut in_flight = JoinSet::new();

        info!(queue = %config.queue, "Relay loop started");

        while !shutdown.is_triggered() {
            while let Some(result) = in_flight.try_join_next() {
                log_task_result(result);
            }

            let permit = tokio::select! {
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = shutdown.triggered() => break,
            };

            match self
                .inner
                .transport
                .receive(&config.queue, config.receive_timeout)
                .await
            {
                Ok(Some((message, handle))) => {
                    debug!(
                        message_id = %message.message_id,
                        delivery_count = message.delivery_count,
                        "Message received"
                    );
                    let engine = self.clone();
                    in_flight.spawn(async move {
                        let _permit = permit;
                        engine.on_message(&message, &handle).await;
                    });
                }
                Ok(None) => {}
                Err(TransportError::Closed) => {
                    warn!(queue = %config.queue, "Transport closed; stopping relay loop");
                    break;
                }
                Err(err) => {
                    let delay = err.retry_after().unwrap_or(config.receive_error_backoff);
                    warn!(
                        queue = %config.queue,
                        error = %err,
                        delay = ?delay,
                        "Receive failed; backing off"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.triggered() => break,
                    }
                }
            }
        }

        info!(
            in_flight = in_flight.len(),
            "Relay loop stopping; waiting for in-flight dispositions"
        );
        while let Some(result) = in_flight.join_next().await {
            log_task_result(result);
        }
        info!(queue = %config.queue, "Relay loop stopped");
    }

    async fn relay(&self, message: &ReceivedMessage, handle: &DispositionHandle) -> RelayOutcome {
        match self.inner.validator.validate(message) {
            ValidationResult::Reject {
                reason,
                description,
            } => {
                warn!(
                    message_id = %message.message_id,
                    reason = %reason,
                    description = %description,
                    "Message failed validation; dead-lettering"
                );
                match handle.dead_letter(&reason, &description).await {
                    Ok(()) => RelayOutcome::DeadLettered { reason },
                    Err(err) => {
                        log_disposition_failure(message, &err);
                        RelayOutcome::Failed {
                            error: err.to_string(),
                            dead_lettered: false,
                        }
                    }
                }
            }
            ValidationResult::Accept(payload) => {
                match self.process(message, &payload, handle).await {
                    Ok(transformed) => {
                        info!(message_id = %message.message_id, "Message processed and checkpointed");
                        RelayOutcome::Processed {
                            payload: transformed,
                        }
                    }
                    Err(err) if err.is_programming_error() => {
                        error!(
                            message_id = %message.message_id,
                            error = %err,
                            "Double disposition detected; aborting message processing"
                        );
                        RelayOutcome::Failed {
                            error: err.to_string(),
                            dead_lettered: false,
                        }
                    }
                    Err(err) => self.fall_back_to_dead_letter(message, handle, err).await,
                }
            }
        }
    }

    async fn process(
        &self,
        message: &ReceivedMessage,
        payload: &Payload,
        handle: &DispositionHandle,
    ) -> Result<Bytes, ProcessingError> {
        let transformed = self.inner.transformer.transform(payload)?;

        if let Some(target) = &self.inner.config.forward_to {
            let forwarded = forwarded_message(message, transformed.clone());
            self.inner
                .transport
                .send(target, forwarded)
                .await
                .map_err(|source| ProcessingError::Forward {
                    queue: target.clone(),
                    source,
                })?;
            debug!(message_id = %message.message_id, target = %target, "Transformed payload forwarded");
        }

        handle.checkpoint_success().await?;
        Ok(transformed)
    }

    async fn fall_back_to_dead_letter(
        &self,
        message: &ReceivedMessage,
        handle: &DispositionHandle,
        err: ProcessingError,
    ) -> RelayOutcome {
        let description = err.to_string();
        error!(
            message_id = %message.message_id,
            error = %description,
            "Processing failed; dead-lettering message"
        );

        match handle.dead_letter(PROCESSING_EXCEPTION, &description).await {
            Ok(()) => RelayOutcome::Failed {
                error: description,
                dead_lettered: true,
            },
            Err(dl_err) => {
                log_disposition_failure(message, &dl_err);
                RelayOutcome::Failed {
                    error: description,
                    dead_lettered: false,
                }
            }
        }
    }
}

/// Copy of an accepted message carrying the transformed body
fn forwarded_message(message: &ReceivedMessage, body: Bytes) -> Message {
    let correlation_id = message
        .correlation_id
        .clone()
        .unwrap_or_else(|| message.message_id.to_string());

    let mut forwarded = Message::new(body).with_correlation_id(correlation_id);
    forwarded.headers = message.headers.clone();
    forwarded
}

fn log_disposition_failure(message: &ReceivedMessage, err: &DispositionError) {
    if err.is_programming_error() {
        error!(
            message_id = %message.message_id,
            error = %err,
            "Double disposition detected; aborting message processing"
        );
    } else {
        error!(
            message_id = %message.message_id,
            error = %err,
            "Dead-letter failed; message will be redelivered after its lock expires"
        );
    }
}

fn log_task_result(result: Result<(), tokio::task::JoinError>) {
    if let Err(err) = result {
        error!(error = %err, "Relay task terminated abnormally");
    }
}
