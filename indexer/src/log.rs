//! Indexed-event log.
//!
//! Append-only record of every observed event, decoded or not, keyed by
//! `(contract_id, position)`. It is the audit trail for decode failures and
//! the source for rebuilding derived state.

use tracing::debug;

use crate::events::{ContractId, IndexedEvent, Position};
use crate::storage::{StorageError, Store, StoreTx};

/// Result of [`EventLog::record`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutcome {
    /// The entry was appended.
    Appended,
    /// An entry for the same event already exists.
    AlreadyPresent,
}

/// Log errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LogError {
    /// A different event is already logged at this position.
    #[error("log conflict for {contract_id} at {position}: {existing_topic} already logged, got {incoming_topic}")]
    Conflict {
        /// Contract.
        contract_id: ContractId,
        /// Position.
        position: Position,
        /// Topic of the logged entry.
        existing_topic: String,
        /// Topic of the rejected entry.
        incoming_topic: String,
    },

    /// The store failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Operations on the indexed-event log.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventLog;

impl EventLog {
    /// Records an observed event.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::Conflict`] if another event occupies the
    /// position, [`LogError::Storage`] if the store fails.
    pub async fn record<T: StoreTx>(
        tx: &mut T,
        entry: &IndexedEvent,
    ) -> Result<LogOutcome, LogError> {
        match tx.indexed_event(&entry.position).await? {
            Some(existing) if existing.same_event(entry) => {
                debug!(contract = %entry.contract_id, position = %entry.position, "event already logged");
                Ok(LogOutcome::AlreadyPresent)
            }
            Some(existing) => Err(LogError::Conflict {
                contract_id: entry.contract_id.clone(),
                position: entry.position,
                existing_topic: existing.topic,
                incoming_topic: entry.topic.clone(),
            }),
            None => {
                tx.append_indexed_event(entry).await?;
                Ok(LogOutcome::Appended)
            }
        }
    }

    /// Returns the entry logged at `position`, as seen by `tx`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn lookup<T: StoreTx>(
        tx: &mut T,
        position: &Position,
    ) -> Result<Option<IndexedEvent>, StorageError> {
        tx.indexed_event(position).await
    }

    /// Returns a contract's committed log in position order.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn entries<S: Store>(
        store: &S,
        contract_id: &ContractId,
    ) -> Result<Vec<IndexedEvent>, StorageError> {
        let mut entries = store.indexed_events(contract_id).await?;
        entries.sort_by_key(|entry| entry.position);
        Ok(entries)
    }
}
