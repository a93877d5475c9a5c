//! In-memory store.
//!
//! A transaction buffers its writes in a [`WriteSet`] and reads through to
//! the committed partition for anything it has not written. Commit merges
//! the write set into the partition under the lock, so a batch costs only
//! the rows and log entries it touches. Transactions on the same contract
//! must not overlap; the ingestion service runs a single worker per
//! contract.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use super::{StorageError, Store, StoreTx};
use crate::checkpoint::Checkpoint;
use crate::events::{ContractId, IndexedEvent, Position};
use crate::projection::{
    EntityRef, GrantRecord, ProjectionSnapshot, ProposalRecord, QuarantineRecord, RewardRecord,
    TradeRecord,
};

#[derive(Debug, Default)]
struct Partition {
    trades: BTreeMap<u64, TradeRecord>,
    proposals: BTreeMap<u64, ProposalRecord>,
    rewards: BTreeMap<u64, RewardRecord>,
    grants: BTreeMap<u64, GrantRecord>,
    quarantined: BTreeMap<EntityRef, QuarantineRecord>,
    events: BTreeMap<Position, IndexedEvent>,
    checkpoint: Option<Checkpoint>,
}

impl Partition {
    fn snapshot(&self) -> ProjectionSnapshot {
        ProjectionSnapshot {
            trades: self.trades.values().cloned().collect(),
            proposals: self.proposals.values().cloned().collect(),
            rewards: self.rewards.values().cloned().collect(),
            grants: self.grants.values().cloned().collect(),
            quarantined: self.quarantined.values().cloned().collect(),
        }
    }
}

/// Uncommitted writes of one transaction.
#[derive(Debug, Default)]
struct WriteSet {
    /// Derived rows committed before this transaction are hidden.
    cleared: bool,
    trades: BTreeMap<u64, TradeRecord>,
    proposals: BTreeMap<u64, ProposalRecord>,
    rewards: BTreeMap<u64, RewardRecord>,
    grants: BTreeMap<u64, GrantRecord>,
    quarantined: BTreeMap<EntityRef, QuarantineRecord>,
    events: BTreeMap<Position, IndexedEvent>,
    /// `Some(None)` once the checkpoint is cleared.
    checkpoint: Option<Option<Checkpoint>>,
}

impl WriteSet {
    fn merge_into(self, partition: &mut Partition) {
        if self.cleared {
            partition.trades.clear();
            partition.proposals.clear();
            partition.rewards.clear();
            partition.grants.clear();
            partition.quarantined.clear();
        }
        partition.trades.extend(self.trades);
        partition.proposals.extend(self.proposals);
        partition.rewards.extend(self.rewards);
        partition.grants.extend(self.grants);
        partition.quarantined.extend(self.quarantined);
        partition.events.extend(self.events);
        if let Some(checkpoint) = self.checkpoint {
            partition.checkpoint = checkpoint;
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    partitions: Mutex<HashMap<ContractId, Partition>>,
    commit_failures: AtomicU32,
}

impl Shared {
    async fn read<T>(&self, contract_id: &ContractId, f: impl FnOnce(&Partition) -> T) -> T
    where
        T: Default,
    {
        let partitions = self.partitions.lock().await;
        partitions.get(contract_id).map(f).unwrap_or_default()
    }
}

/// In-memory [`Store`].
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` commits fail with a transient error.
    pub fn inject_commit_failures(&self, count: u32) {
        self.shared.commit_failures.store(count, Ordering::SeqCst);
    }

    /// Returns the contracts that have committed data.
    pub async fn contracts(&self) -> Vec<ContractId> {
        let partitions = self.shared.partitions.lock().await;
        let mut contracts: Vec<ContractId> = partitions.keys().cloned().collect();
        contracts.sort();
        contracts
    }

    async fn read<T>(&self, contract_id: &ContractId, f: impl FnOnce(&Partition) -> T) -> T
    where
        T: Default,
    {
        self.shared.read(contract_id, f).await
    }
}

#[async_trait]
impl Store for MemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self, contract_id: &ContractId) -> Result<MemoryTx, StorageError> {
        Ok(MemoryTx {
            contract_id: contract_id.clone(),
            writes: WriteSet::default(),
            shared: Arc::clone(&self.shared),
        })
    }

    async fn checkpoint(
        &self,
        contract_id: &ContractId,
    ) -> Result<Option<Checkpoint>, StorageError> {
        Ok(self.read(contract_id, |p| p.checkpoint.clone()).await)
    }

    async fn indexed_events(
        &self,
        contract_id: &ContractId,
    ) -> Result<Vec<IndexedEvent>, StorageError> {
        Ok(self
            .read(contract_id, |p| p.events.values().cloned().collect())
            .await)
    }

    async fn trade(
        &self,
        contract_id: &ContractId,
        trade_id: u64,
    ) -> Result<Option<TradeRecord>, StorageError> {
        Ok(self
            .read(contract_id, |p| p.trades.get(&trade_id).cloned())
            .await)
    }

    async fn proposal(
        &self,
        contract_id: &ContractId,
        proposal_id: u64,
    ) -> Result<Option<ProposalRecord>, StorageError> {
        Ok(self
            .read(contract_id, |p| p.proposals.get(&proposal_id).cloned())
            .await)
    }

    async fn reward(
        &self,
        contract_id: &ContractId,
        reward_id: u64,
    ) -> Result<Option<RewardRecord>, StorageError> {
        Ok(self
            .read(contract_id, |p| p.rewards.get(&reward_id).cloned())
            .await)
    }

    async fn grant(
        &self,
        contract_id: &ContractId,
        grant_id: u64,
    ) -> Result<Option<GrantRecord>, StorageError> {
        Ok(self
            .read(contract_id, |p| p.grants.get(&grant_id).cloned())
            .await)
    }

    async fn snapshot(
        &self,
        contract_id: &ContractId,
    ) -> Result<ProjectionSnapshot, StorageError> {
        Ok(self.read(contract_id, Partition::snapshot).await)
    }
}

/// Transaction over a [`MemoryStore`] partition.
#[derive(Debug)]
pub struct MemoryTx {
    contract_id: ContractId,
    writes: WriteSet,
    shared: Arc<Shared>,
}

impl MemoryTx {
    /// Reads a derived row from the committed partition unless it was
    /// cleared in this transaction.
    async fn committed_row<T>(&self, f: impl FnOnce(&Partition) -> Option<T>) -> Option<T> {
        if self.writes.cleared {
            return None;
        }
        self.shared.read(&self.contract_id, f).await
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    fn contract_id(&self) -> &ContractId {
        &self.contract_id
    }

    async fn checkpoint(&mut self) -> Result<Option<Checkpoint>, StorageError> {
        if let Some(checkpoint) = &self.writes.checkpoint {
            return Ok(checkpoint.clone());
        }
        Ok(self
            .shared
            .read(&self.contract_id, |p| p.checkpoint.clone())
            .await)
    }

    async fn save_checkpoint(&mut self, checkpoint: &Checkpoint) -> Result<(), StorageError> {
        self.writes.checkpoint = Some(Some(checkpoint.clone()));
        Ok(())
    }

    async fn clear_projection(&mut self) -> Result<(), StorageError> {
        self.writes.cleared = true;
        self.writes.trades.clear();
        self.writes.proposals.clear();
        self.writes.rewards.clear();
        self.writes.grants.clear();
        self.writes.quarantined.clear();
        self.writes.checkpoint = Some(None);
        Ok(())
    }

    async fn indexed_event(
        &mut self,
        position: &Position,
    ) -> Result<Option<IndexedEvent>, StorageError> {
        if let Some(event) = self.writes.events.get(position) {
            return Ok(Some(event.clone()));
        }
        Ok(self
            .shared
            .read(&self.contract_id, |p| p.events.get(position).cloned())
            .await)
    }

    async fn append_indexed_event(&mut self, event: &IndexedEvent) -> Result<(), StorageError> {
        if self.indexed_event(&event.position).await?.is_some() {
            return Err(StorageError::Permanent(format!(
                "indexed event already exists at {}",
                event.position
            )));
        }
        self.writes.events.insert(event.position, event.clone());
        Ok(())
    }

    async fn indexed_events(&mut self) -> Result<Vec<IndexedEvent>, StorageError> {
        let mut events: BTreeMap<Position, IndexedEvent> = self
            .shared
            .read(&self.contract_id, |p| p.events.clone())
            .await;
        events.extend(
            self.writes
                .events
                .iter()
                .map(|(position, event)| (*position, event.clone())),
        );
        Ok(events.into_values().collect())
    }

    async fn load_trade(&mut self, trade_id: u64) -> Result<Option<TradeRecord>, StorageError> {
        if let Some(row) = self.writes.trades.get(&trade_id) {
            return Ok(Some(row.clone()));
        }
        Ok(self
            .committed_row(|p| p.trades.get(&trade_id).cloned())
            .await)
    }

    async fn save_trade(&mut self, row: &TradeRecord) -> Result<(), StorageError> {
        self.writes.trades.insert(row.trade_id, row.clone());
        Ok(())
    }

    async fn load_proposal(
        &mut self,
        proposal_id: u64,
    ) -> Result<Option<ProposalRecord>, StorageError> {
        if let Some(row) = self.writes.proposals.get(&proposal_id) {
            return Ok(Some(row.clone()));
        }
        Ok(self
            .committed_row(|p| p.proposals.get(&proposal_id).cloned())
            .await)
    }

    async fn save_proposal(&mut self, row: &ProposalRecord) -> Result<(), StorageError> {
        self.writes.proposals.insert(row.proposal_id, row.clone());
        Ok(())
    }

    async fn load_reward(&mut self, reward_id: u64) -> Result<Option<RewardRecord>, StorageError> {
        if let Some(row) = self.writes.rewards.get(&reward_id) {
            return Ok(Some(row.clone()));
        }
        Ok(self
            .committed_row(|p| p.rewards.get(&reward_id).cloned())
            .await)
    }

    async fn save_reward(&mut self, row: &RewardRecord) -> Result<(), StorageError> {
        self.writes.rewards.insert(row.reward_id, row.clone());
        Ok(())
    }

    async fn load_grant(&mut self, grant_id: u64) -> Result<Option<GrantRecord>, StorageError> {
        if let Some(row) = self.writes.grants.get(&grant_id) {
            return Ok(Some(row.clone()));
        }
        Ok(self
            .committed_row(|p| p.grants.get(&grant_id).cloned())
            .await)
    }

    async fn save_grant(&mut self, row: &GrantRecord) -> Result<(), StorageError> {
        self.writes.grants.insert(row.grant_id, row.clone());
        Ok(())
    }

    async fn load_quarantine(
        &mut self,
        entity: &EntityRef,
    ) -> Result<Option<QuarantineRecord>, StorageError> {
        if let Some(record) = self.writes.quarantined.get(entity) {
            return Ok(Some(record.clone()));
        }
        Ok(self
            .committed_row(|p| p.quarantined.get(entity).cloned())
            .await)
    }

    async fn save_quarantine(&mut self, record: &QuarantineRecord) -> Result<(), StorageError> {
        if self.load_quarantine(&record.entity).await?.is_none() {
            self.writes.quarantined.insert(record.entity, record.clone());
        }
        Ok(())
    }

    async fn commit(self) -> Result<(), StorageError> {
        let injected = self
            .shared
            .commit_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            debug!(contract = %self.contract_id, "injected commit failure");
            return Err(StorageError::Transient("injected commit failure".to_string()));
        }

        let mut partitions = self.shared.partitions.lock().await;
        self.writes
            .merge_into(partitions.entry(self.contract_id).or_default());
        Ok(())
    }
}
