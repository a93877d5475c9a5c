//! Checkpoint tracking.
//!
//! The checkpoint is the position of the last event applied for a contract.
//! It is written in the same transaction as the batch it covers, so a
//! restart resumes exactly after the last committed event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::events::{ContractId, Position};
use crate::storage::{StorageError, Store, StoreTx};

/// Persisted checkpoint of one contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Contract the checkpoint belongs to.
    pub contract_id: ContractId,
    /// Last applied position.
    pub position: Position,
    /// Number of events applied since the checkpoint was created.
    pub events_applied: u64,
    /// Last write time.
    pub updated_at: DateTime<Utc>,
}

/// Checkpoint errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CheckpointError {
    /// The new position does not follow the current one.
    #[error("checkpoint for {contract_id} cannot move from {current} to {attempted}")]
    NotMonotonic {
        /// Contract.
        contract_id: ContractId,
        /// Current checkpoint.
        current: Position,
        /// Rejected position.
        attempted: Position,
    },
}

/// Running checkpoint of a contract within one transaction.
#[derive(Debug, Clone)]
pub struct CheckpointTracker {
    contract_id: ContractId,
    position: Option<Position>,
    events_applied: u64,
    dirty: bool,
}

impl CheckpointTracker {
    /// Creates a tracker with no applied events.
    #[must_use]
    pub const fn new(contract_id: ContractId) -> Self {
        Self {
            contract_id,
            position: None,
            events_applied: 0,
            dirty: false,
        }
    }

    /// Loads the tracker from the checkpoint visible to `tx`.
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint cannot be read.
    pub async fn load<T: StoreTx>(tx: &mut T) -> Result<Self, StorageError> {
        let mut tracker = Self::new(tx.contract_id().clone());
        if let Some(checkpoint) = tx.checkpoint().await? {
            tracker.position = Some(checkpoint.position);
            tracker.events_applied = checkpoint.events_applied;
        }
        Ok(tracker)
    }

    /// Returns the contract.
    #[must_use]
    pub const fn contract_id(&self) -> &ContractId {
        &self.contract_id
    }

    /// Returns the last applied position.
    #[must_use]
    pub const fn position(&self) -> Option<Position> {
        self.position
    }

    /// Returns the number of applied events.
    #[must_use]
    pub const fn events_applied(&self) -> u64 {
        self.events_applied
    }

    /// Returns true if `position` is at or before the checkpoint.
    #[must_use]
    pub fn is_applied(&self, position: &Position) -> bool {
        self.position.is_some_and(|current| *position <= current)
    }

    /// Returns true if the tracker moved since it was loaded or persisted.
    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Moves the checkpoint to `position`.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::NotMonotonic`] unless `position` is strictly
    /// after the current checkpoint.
    pub fn advance(&mut self, position: Position) -> Result<(), CheckpointError> {
        if let Some(current) = self.position {
            if position <= current {
                return Err(CheckpointError::NotMonotonic {
                    contract_id: self.contract_id.clone(),
                    current,
                    attempted: position,
                });
            }
        }

        self.position = Some(position);
        self.events_applied = self.events_applied.saturating_add(1);
        self.dirty = true;
        Ok(())
    }

    /// Writes the checkpoint through `tx` if it moved.
    ///
    /// Returns the written checkpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn persist<T: StoreTx>(
        &mut self,
        tx: &mut T,
    ) -> Result<Option<Checkpoint>, StorageError> {
        let Some(position) = self.position.filter(|_| self.dirty) else {
            return Ok(None);
        };

        let checkpoint = Checkpoint {
            contract_id: self.contract_id.clone(),
            position,
            events_applied: self.events_applied,
            updated_at: Utc::now(),
        };
        tx.save_checkpoint(&checkpoint).await?;
        self.dirty = false;
        Ok(Some(checkpoint))
    }
}

/// Returns the committed position to resume a contract after.
///
/// # Errors
///
/// Returns an error if the checkpoint cannot be read.
pub async fn resume_position<S: Store>(
    store: &S,
    contract_id: &ContractId,
) -> Result<Option<Position>, StorageError> {
    Ok(store
        .checkpoint(contract_id)
        .await?
        .map(|checkpoint| checkpoint.position))
}
