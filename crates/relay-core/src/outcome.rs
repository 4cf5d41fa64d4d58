//! Per-message outcomes emitted by the relay engine.

use bytes::Bytes;
use relay_runtime::MessageId;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Result of relaying one received message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Transformed and checkpointed
    Processed { payload: Bytes },

    /// Rejected by validation and moved to the dead-letter sub-queue
    DeadLettered { reason: String },

    /// Processing or disposition failed. `dead_lettered` tells whether the
    /// fallback dead-letter succeeded; if not, the broker redelivers once the
    /// lock expires.
    Failed { error: String, dead_lettered: bool },
}

impl RelayOutcome {
    pub fn is_processed(&self) -> bool {
        matches!(self, Self::Processed { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Processed { .. } => "processed",
            Self::DeadLettered { .. } => "dead_lettered",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Outcome published on the engine's report channel
#[derive(Debug, Clone)]
pub struct RelayReport {
    pub message_id: MessageId,
    pub delivery_count: u32,
    pub outcome: RelayOutcome,
}

/// Running totals of relay outcomes
///
/// `received` counts messages as they enter the engine, so
/// `received - settled` is the number still being processed.
#[derive(Debug, Default)]
pub struct RelayStats {
    received: AtomicU64,
    processed: AtomicU64,
    dead_lettered: AtomicU64,
    failed: AtomicU64,
}

impl RelayStats {
    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record(&self, outcome: &RelayOutcome) {
        let counter = match outcome {
            RelayOutcome::Processed { .. } => &self.processed,
            RelayOutcome::DeadLettered { .. } => &self.dead_lettered,
            RelayOutcome::Failed { .. } => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RelayStatsSnapshot {
        let processed = self.processed.load(Ordering::Relaxed);
        let dead_lettered = self.dead_lettered.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        RelayStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            settled: processed + dead_lettered + failed,
            processed,
            dead_lettered,
            failed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RelayStatsSnapshot {
    pub received: u64,
    pub settled: u64,
    pub processed: u64,
    pub dead_lettered: u64,
    pub failed: u64,
}
