//! Metrics tracking for the indexer.
//!
//! Provides atomic counters for monitoring event processing. Batches are
//! recorded after they commit, so rolled-back attempts are not counted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use super::processor::BatchReport;
use crate::projection::ProjectionError;

/// Metrics for the indexer.
#[derive(Debug)]
pub struct IndexerMetrics {
    /// Events appended to the indexed-event log.
    events_indexed: AtomicU64,

    /// Events that failed to decode.
    decode_failures: AtomicU64,

    /// Events that wrote a derived row.
    events_projected: AtomicU64,

    /// Redelivered events skipped.
    replays_skipped: AtomicU64,

    /// Events dropped for arriving at or before the checkpoint.
    ordering_violations: AtomicU64,

    /// Rejected projections due to conflicting data.
    integrity_errors: AtomicU64,

    /// Rejected projections due to the entity's state.
    invalid_transitions: AtomicU64,

    /// Events refused because their entity is quarantined.
    quarantined_events: AtomicU64,

    /// Retries after transient errors.
    transient_retries: AtomicU64,

    /// Committed batches.
    batches_committed: AtomicU64,

    /// Total processing time in nanoseconds.
    total_processing_time_ns: AtomicU64,

    /// Start time for rate calculation.
    start_time: Instant,
}

impl Default for IndexerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexerMetrics {
    /// Creates a new metrics instance.
    #[must_use]
    pub fn new() -> Self {
        Self {
            events_indexed: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
            events_projected: AtomicU64::new(0),
            replays_skipped: AtomicU64::new(0),
            ordering_violations: AtomicU64::new(0),
            integrity_errors: AtomicU64::new(0),
            invalid_transitions: AtomicU64::new(0),
            quarantined_events: AtomicU64::new(0),
            transient_retries: AtomicU64::new(0),
            batches_committed: AtomicU64::new(0),
            total_processing_time_ns: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Records a committed batch.
    pub fn record_batch(&self, report: &BatchReport, duration: Duration) {
        let count = |f: fn(&ProjectionError) -> bool| {
            report.rejected.iter().filter(|r| f(&r.error)).count() as u64
        };
        let integrity = count(ProjectionError::is_integrity);
        let invalid = count(ProjectionError::is_invalid_transition);
        let quarantined = count(ProjectionError::is_quarantined);

        self.events_indexed
            .fetch_add(report.indexed as u64, Ordering::Relaxed);
        self.decode_failures
            .fetch_add(report.decode_failures.len() as u64, Ordering::Relaxed);
        self.events_projected
            .fetch_add(report.written as u64, Ordering::Relaxed);
        self.replays_skipped
            .fetch_add(report.replayed as u64, Ordering::Relaxed);
        self.ordering_violations
            .fetch_add(report.ordering_violations.len() as u64, Ordering::Relaxed);
        self.integrity_errors
            .fetch_add(integrity, Ordering::Relaxed);
        self.invalid_transitions
            .fetch_add(invalid, Ordering::Relaxed);
        self.quarantined_events
            .fetch_add(quarantined, Ordering::Relaxed);
        self.batches_committed.fetch_add(1, Ordering::Relaxed);
        self.total_processing_time_ns.fetch_add(
            u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX),
            Ordering::Relaxed,
        );
    }

    /// Records a retry after a transient error.
    pub fn record_retry(&self) {
        self.transient_retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of events appended to the log.
    #[must_use]
    pub fn events_indexed(&self) -> u64 {
        self.events_indexed.load(Ordering::Relaxed)
    }

    /// Returns the number of decode failures.
    #[must_use]
    pub fn decode_failures(&self) -> u64 {
        self.decode_failures.load(Ordering::Relaxed)
    }

    /// Returns the number of events that wrote a derived row.
    #[must_use]
    pub fn events_projected(&self) -> u64 {
        self.events_projected.load(Ordering::Relaxed)
    }

    /// Returns the number of redelivered events skipped.
    #[must_use]
    pub fn replays_skipped(&self) -> u64 {
        self.replays_skipped.load(Ordering::Relaxed)
    }

    /// Returns the number of ordering violations.
    #[must_use]
    pub fn ordering_violations(&self) -> u64 {
        self.ordering_violations.load(Ordering::Relaxed)
    }

    /// Returns the number of integrity errors.
    #[must_use]
    pub fn integrity_errors(&self) -> u64 {
        self.integrity_errors.load(Ordering::Relaxed)
    }

    /// Returns the number of invalid transitions.
    #[must_use]
    pub fn invalid_transitions(&self) -> u64 {
        self.invalid_transitions.load(Ordering::Relaxed)
    }

    /// Returns the number of events refused for a quarantined entity.
    #[must_use]
    pub fn quarantined_events(&self) -> u64 {
        self.quarantined_events.load(Ordering::Relaxed)
    }

    /// Returns the number of transient retries.
    #[must_use]
    pub fn transient_retries(&self) -> u64 {
        self.transient_retries.load(Ordering::Relaxed)
    }

    /// Returns the number of committed batches.
    #[must_use]
    pub fn batches_committed(&self) -> u64 {
        self.batches_committed.load(Ordering::Relaxed)
    }

    /// Returns the total processing time.
    #[must_use]
    pub fn total_processing_time(&self) -> Duration {
        Duration::from_nanos(self.total_processing_time_ns.load(Ordering::Relaxed))
    }

    /// Returns the average processing time per batch.
    #[must_use]
    pub fn average_batch_time(&self) -> Duration {
        let count = self.batches_committed();
        if count == 0 {
            return Duration::ZERO;
        }
        let total_ns = self.total_processing_time_ns.load(Ordering::Relaxed);
        Duration::from_nanos(total_ns / count)
    }

    /// Returns the events indexed per second since start.
    #[must_use]
    pub fn events_per_second(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.events_indexed() as f64 / elapsed
        } else {
            0.0
        }
    }

    /// Returns a snapshot of all metrics.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_indexed: self.events_indexed(),
            decode_failures: self.decode_failures(),
            events_projected: self.events_projected(),
            replays_skipped: self.replays_skipped(),
            ordering_violations: self.ordering_violations(),
            integrity_errors: self.integrity_errors(),
            invalid_transitions: self.invalid_transitions(),
            quarantined_events: self.quarantined_events(),
            transient_retries: self.transient_retries(),
            batches_committed: self.batches_committed(),
            average_batch_time: self.average_batch_time(),
            events_per_second: self.events_per_second(),
        }
    }
}

/// A point-in-time snapshot of indexer metrics.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    /// Events appended to the log.
    pub events_indexed: u64,
    /// Decode failures.
    pub decode_failures: u64,
    /// Events that wrote a derived row.
    pub events_projected: u64,
    /// Redelivered events skipped.
    pub replays_skipped: u64,
    /// Ordering violations.
    pub ordering_violations: u64,
    /// Integrity errors.
    pub integrity_errors: u64,
    /// Invalid transitions.
    pub invalid_transitions: u64,
    /// Events refused for a quarantined entity.
    pub quarantined_events: u64,
    /// Transient retries.
    pub transient_retries: u64,
    /// Committed batches.
    pub batches_committed: u64,
    /// Average processing time per batch.
    pub average_batch_time: Duration,
    /// Events indexed per second.
    pub events_per_second: f64,
}
