//! Top-level error types.

use std::fmt;

use crate::checkpoint::CheckpointError;
use crate::config::ConfigError;
use crate::events::{ContractId, Position, RawEvent};
use crate::projection::ProjectionError;
use crate::retry::Retriable;
use crate::source::SourceError;
use crate::storage::StorageError;

/// Identifies the event a surfaced error belongs to, so it can be looked up
/// in the indexed-event log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventContext {
    /// Emitting contract.
    pub contract_id: ContractId,
    /// Event position.
    pub position: Position,
    /// Raw topic string.
    pub topic: String,
}

impl EventContext {
    /// Builds the context of a raw event.
    #[must_use]
    pub fn of(event: &RawEvent) -> Self {
        Self {
            contract_id: event.contract_id.clone(),
            position: event.position(),
            topic: event.topic.clone(),
        }
    }
}

impl fmt::Display for EventContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}/{}", self.topic, self.contract_id, self.position)
    }
}

/// An event whose projection was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{context}: {error}")]
pub struct Rejection {
    /// Rejected event.
    pub context: EventContext,
    /// Reason.
    pub error: ProjectionError,
}

/// An event at or before the checkpoint that is not a replay of the
/// applied event.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("ordering violation: {context} is not after checkpoint {checkpoint}")]
pub struct OrderingViolation {
    /// Dropped event.
    pub context: EventContext,
    /// Checkpoint at the time.
    pub checkpoint: Position,
    /// Whether a different event is logged at the same position.
    pub conflicts_with_log: bool,
}

/// Errors that stop processing of a batch.
#[derive(Debug, Clone, thiserror::Error)]
pub enum IndexerError {
    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Storage failure.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Checkpoint failure.
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    /// Event source failure.
    #[error(transparent)]
    Source(#[from] SourceError),

    /// A decoded payload could not be re-encoded for the log.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The source delivered an event of another contract.
    #[error("event of {actual} delivered to the worker of {expected}")]
    ForeignEvent {
        /// Worker contract.
        expected: ContractId,
        /// Event contract.
        actual: ContractId,
    },

    /// A transient error persisted through every retry.
    #[error("retries exhausted for {contract_id} after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        /// Contract.
        contract_id: ContractId,
        /// Attempts made.
        attempts: u32,
        /// Last error.
        last_error: Box<IndexerError>,
    },
}

impl IndexerError {
    /// Returns true if retrying the batch may succeed.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Storage(e) => e.is_transient(),
            Self::Source(e) => e.is_transient(),
            _ => false,
        }
    }
}

impl Retriable for IndexerError {
    fn is_retriable(&self) -> bool {
        Self::is_retriable(self)
    }
}

impl From<serde_json::Error> for IndexerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
