//! Storage layer.
//!
//! Everything the pipeline persists for a contract (indexed-event log,
//! derived rows and checkpoint) is written through one [`StoreTx`], so a
//! batch commits or rolls back as a unit.
//!
//! # Backends
//!
//! - [`MemoryStore`]: in-process, used by tests and log replay
//! - [`PgStore`]: Postgres via sqlx

pub mod memory;
pub mod postgres;

use async_trait::async_trait;

use crate::checkpoint::Checkpoint;
use crate::events::{ContractId, IndexedEvent, Position};
use crate::projection::{
    EntityRef, GrantRecord, ProjectionSnapshot, ProposalRecord, QuarantineRecord, RewardRecord,
    TradeRecord,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Storage failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    /// Retrying the transaction may succeed.
    #[error("transient storage error: {0}")]
    Transient(String),

    /// Retrying will not help.
    #[error("storage error: {0}")]
    Permanent(String),
}

impl StorageError {
    /// Returns true if the operation may be retried.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut => Self::Transient(err.to_string()),
            // serialization_failure, deadlock_detected
            sqlx::Error::Database(db) if matches!(db.code().as_deref(), Some("40001" | "40P01")) => {
                Self::Transient(err.to_string())
            }
            _ => Self::Permanent(err.to_string()),
        }
    }
}

/// A store partitioned by contract.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Transaction type.
    type Tx: StoreTx + 'static;

    /// Opens a transaction scoped to one contract.
    async fn begin(&self, contract_id: &ContractId) -> Result<Self::Tx, StorageError>;

    /// Returns the committed checkpoint of a contract.
    async fn checkpoint(&self, contract_id: &ContractId)
        -> Result<Option<Checkpoint>, StorageError>;

    /// Returns a contract's indexed-event log in position order.
    async fn indexed_events(
        &self,
        contract_id: &ContractId,
    ) -> Result<Vec<IndexedEvent>, StorageError>;

    /// Reads a trade.
    async fn trade(
        &self,
        contract_id: &ContractId,
        trade_id: u64,
    ) -> Result<Option<TradeRecord>, StorageError>;

    /// Reads a proposal.
    async fn proposal(
        &self,
        contract_id: &ContractId,
        proposal_id: u64,
    ) -> Result<Option<ProposalRecord>, StorageError>;

    /// Reads a reward.
    async fn reward(
        &self,
        contract_id: &ContractId,
        reward_id: u64,
    ) -> Result<Option<RewardRecord>, StorageError>;

    /// Reads a grant.
    async fn grant(
        &self,
        contract_id: &ContractId,
        grant_id: u64,
    ) -> Result<Option<GrantRecord>, StorageError>;

    /// Reads every derived row of a contract, sorted by key.
    async fn snapshot(&self, contract_id: &ContractId)
        -> Result<ProjectionSnapshot, StorageError>;
}

/// An open transaction over one contract's partition.
///
/// Dropping the transaction without calling [`StoreTx::commit`] discards
/// its writes.
#[async_trait]
pub trait StoreTx: Send {
    /// Contract this transaction is scoped to.
    fn contract_id(&self) -> &ContractId;

    /// Reads the checkpoint as seen by this transaction.
    async fn checkpoint(&mut self) -> Result<Option<Checkpoint>, StorageError>;

    /// Writes the checkpoint.
    async fn save_checkpoint(&mut self, checkpoint: &Checkpoint) -> Result<(), StorageError>;

    /// Deletes the derived rows, quarantine records and the checkpoint. The
    /// log is kept.
    async fn clear_projection(&mut self) -> Result<(), StorageError>;

    /// Reads the log entry at a position.
    async fn indexed_event(
        &mut self,
        position: &Position,
    ) -> Result<Option<IndexedEvent>, StorageError>;

    /// Appends a log entry. The position must be free.
    async fn append_indexed_event(&mut self, event: &IndexedEvent) -> Result<(), StorageError>;

    /// Reads the whole log in position order.
    async fn indexed_events(&mut self) -> Result<Vec<IndexedEvent>, StorageError>;

    /// Reads a trade.
    async fn load_trade(&mut self, trade_id: u64) -> Result<Option<TradeRecord>, StorageError>;

    /// Inserts or replaces a trade.
    async fn save_trade(&mut self, row: &TradeRecord) -> Result<(), StorageError>;

    /// Reads a proposal.
    async fn load_proposal(
        &mut self,
        proposal_id: u64,
    ) -> Result<Option<ProposalRecord>, StorageError>;

    /// Inserts or replaces a proposal.
    async fn save_proposal(&mut self, row: &ProposalRecord) -> Result<(), StorageError>;

    /// Reads a reward.
    async fn load_reward(&mut self, reward_id: u64) -> Result<Option<RewardRecord>, StorageError>;

    /// Inserts or replaces a reward.
    async fn save_reward(&mut self, row: &RewardRecord) -> Result<(), StorageError>;

    /// Reads a grant.
    async fn load_grant(&mut self, grant_id: u64) -> Result<Option<GrantRecord>, StorageError>;

    /// Inserts or replaces a grant.
    async fn save_grant(&mut self, row: &GrantRecord) -> Result<(), StorageError>;

    /// Reads the quarantine record of an entity.
    async fn load_quarantine(
        &mut self,
        entity: &EntityRef,
    ) -> Result<Option<QuarantineRecord>, StorageError>;

    /// Quarantines an entity. An existing record is kept.
    async fn save_quarantine(&mut self, record: &QuarantineRecord) -> Result<(), StorageError>;

    /// Commits every write made through this transaction.
    async fn commit(self) -> Result<(), StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_classification() {
        assert!(StorageError::Transient("io".to_string()).is_transient());
        assert!(!StorageError::Permanent("bad".to_string()).is_transient());
    }

    #[test]
    fn test_from_sqlx_error() {
        assert!(StorageError::from(sqlx::Error::PoolTimedOut).is_transient());
        assert!(!StorageError::from(sqlx::Error::RowNotFound).is_transient());
        assert!(!StorageError::from(sqlx::Error::PoolClosed).is_transient());
    }

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::Transient("connection reset".to_string());
        assert_eq!(err.to_string(), "transient storage error: connection reset");
    }
}
