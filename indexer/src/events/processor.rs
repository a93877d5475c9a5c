//! Event processor implementation.
//!
//! Runs a batch of raw events of one contract through the pipeline inside a
//! single store transaction: ordering check, classification, decoding,
//! log append, projection and checkpoint advance. The caller commits.

use tracing::{debug, error, warn};

use super::decoder;
use super::position::{ContractId, Position};
use super::topic::EventTopic;
use super::types::{IndexedEvent, RawEvent};
use crate::checkpoint::CheckpointTracker;
use crate::error::{EventContext, IndexerError, OrderingViolation, Rejection};
use crate::log::{EventLog, LogError, LogOutcome};
use crate::projection::{ApplyError, ApplyOutcome, ProjectionEngine};
use crate::storage::StoreTx;

/// Outcome of one processed batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    /// Contract the batch belongs to.
    pub contract_id: ContractId,
    /// Events in the batch.
    pub events_seen: usize,
    /// Events appended to the log.
    pub indexed: usize,
    /// Events already present in the log (rebuilds).
    pub already_logged: usize,
    /// Events that wrote a derived row.
    pub written: usize,
    /// Events already reflected in derived state.
    pub unchanged: usize,
    /// Events without a projection (unknown topics).
    pub ignored: usize,
    /// Redelivered events skipped at or before the checkpoint.
    pub replayed: usize,
    /// Events that failed to decode.
    pub decode_failures: Vec<EventContext>,
    /// Events whose projection was rejected.
    pub rejected: Vec<Rejection>,
    /// Events dropped for arriving at or before the checkpoint.
    pub ordering_violations: Vec<OrderingViolation>,
    /// Events dropped because another event is logged at their position.
    pub log_conflicts: Vec<EventContext>,
    /// Checkpoint after the batch.
    pub last_position: Option<Position>,
}

impl BatchReport {
    /// Creates an empty report.
    #[must_use]
    pub const fn new(contract_id: ContractId) -> Self {
        Self {
            contract_id,
            events_seen: 0,
            indexed: 0,
            already_logged: 0,
            written: 0,
            unchanged: 0,
            ignored: 0,
            replayed: 0,
            decode_failures: Vec::new(),
            rejected: Vec::new(),
            ordering_violations: Vec::new(),
            log_conflicts: Vec::new(),
            last_position: None,
        }
    }

    /// Returns the number of events that advanced the checkpoint.
    #[must_use]
    pub fn advanced(&self) -> usize {
        self.written
            + self.unchanged
            + self.ignored
            + self.decode_failures.len()
            + self.rejected.len()
            + self.log_conflicts.len()
    }

    /// Returns true if every event applied cleanly.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.decode_failures.is_empty()
            && self.rejected.is_empty()
            && self.ordering_violations.is_empty()
            && self.log_conflicts.is_empty()
    }
}

/// Processes batches of raw events.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventProcessor;

impl EventProcessor {
    /// Creates a new event processor.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Processes `events` within `tx` and persists the checkpoint.
    ///
    /// Entity-level failures (decode errors, rejected transitions, ordering
    /// violations) are recorded in the report and do not stop the batch.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or an event belongs to another
    /// contract. The transaction must then be discarded.
    pub async fn process_batch<T: StoreTx>(
        &self,
        tx: &mut T,
        events: &[RawEvent],
    ) -> Result<BatchReport, IndexerError> {
        let contract_id = tx.contract_id().clone();
        let mut tracker = CheckpointTracker::load(tx).await?;
        let mut report = BatchReport::new(contract_id.clone());

        for event in events {
            report.events_seen += 1;

            if event.contract_id != contract_id {
                return Err(IndexerError::ForeignEvent {
                    expected: contract_id,
                    actual: event.contract_id.clone(),
                });
            }

            let position = event.position();
            let context = EventContext::of(event);

            let applied = tracker.position().filter(|_| tracker.is_applied(&position));
            if let Some(checkpoint) = applied {
                match EventLog::lookup(tx, &position).await? {
                    Some(entry) if entry.records(event) => {
                        debug!(%context, "skipping redelivered event");
                        report.replayed += 1;
                    }
                    logged => {
                        let violation = OrderingViolation {
                            context,
                            checkpoint,
                            conflicts_with_log: logged.is_some(),
                        };
                        warn!(%violation, "dropping event");
                        report.ordering_violations.push(violation);
                    }
                }
                continue;
            }

            self.process_event(tx, event, position, context, &mut report)
                .await?;
            tracker.advance(position)?;
        }

        tracker.persist(tx).await?;
        report.last_position = tracker.position();
        Ok(report)
    }

    async fn process_event<T: StoreTx>(
        &self,
        tx: &mut T,
        event: &RawEvent,
        position: Position,
        context: EventContext,
        report: &mut BatchReport,
    ) -> Result<(), IndexerError> {
        let topic = EventTopic::classify(&event.topic);
        let decoded = decoder::decode(&topic, &event.payload, &position);

        let entry = match &decoded {
            Ok(decoded) => IndexedEvent::observed(event, decoded.payload_json()?, None),
            Err(err) => IndexedEvent::observed(event, None, Some(err.reason.clone())),
        };

        match EventLog::record(tx, &entry).await {
            Ok(LogOutcome::Appended) => report.indexed += 1,
            Ok(LogOutcome::AlreadyPresent) => report.already_logged += 1,
            Err(LogError::Conflict { .. }) => {
                error!(%context, "a different event is already logged at this position");
                report.log_conflicts.push(context);
                return Ok(());
            }
            Err(LogError::Storage(e)) => return Err(e.into()),
        }

        let decoded = match decoded {
            Ok(decoded) => decoded,
            Err(err) => {
                warn!(%context, reason = %err.reason, "failed to decode event");
                report.decode_failures.push(context);
                return Ok(());
            }
        };

        match ProjectionEngine::apply(tx, &event.contract_id, position, &decoded).await {
            Ok(ApplyOutcome::Written) => report.written += 1,
            Ok(ApplyOutcome::Unchanged) => {
                debug!(%context, "event already reflected in state");
                report.unchanged += 1;
            }
            Ok(ApplyOutcome::Ignored) => report.ignored += 1,
            Err(ApplyError::Projection(err)) => {
                error!(%context, error = %err, "projection rejected event");
                report.rejected.push(Rejection {
                    context,
                    error: err,
                });
            }
            Err(ApplyError::Storage(e)) => return Err(e.into()),
        }

        Ok(())
    }
}
