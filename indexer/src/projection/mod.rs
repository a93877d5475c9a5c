//! Projection engine.
//!
//! Applies decoded events to the derived tables (trades, proposals,
//! rewards, grants). Each entity's state machine is a pure function of the
//! current row, the event and its position; [`ProjectionEngine`] loads the
//! row inside the contract transaction, runs the transition and writes the
//! result back.
//!
//! A rejected event quarantines its entity: the rejection is stored in the
//! same transaction and every later event for that entity is refused, so a
//! row never moves on from a state the ledger and the index disagree about.
//!
//! # Components
//!
//! - [`records`]: Derived-state row types
//! - [`trade`], [`proposal`], [`reward`], [`grant`]: Per-entity transitions

pub mod grant;
pub mod proposal;
pub mod records;
pub mod reward;
pub mod trade;

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::events::{ContractId, DecodedEvent, EventTopic, Position};
use crate::storage::{StorageError, StoreTx};

pub use proposal::ProposalAction;
pub use records::{
    GrantRecord, GrantStatus, ProjectionSnapshot, ProposalRecord, ProposalStatus,
    QuarantineRecord, RewardRecord, TradeRecord,
};

/// Kind of derived entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// A trade.
    Trade,
    /// A governance proposal.
    Proposal,
    /// A social reward.
    Reward,
    /// A vesting grant.
    Grant,
}

impl EntityKind {
    /// Returns a human-readable name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Trade => "trade",
            Self::Proposal => "proposal",
            Self::Reward => "reward",
            Self::Grant => "grant",
        }
    }

    /// Parses a stored name.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "trade" => Some(Self::Trade),
            "proposal" => Some(Self::Proposal),
            "reward" => Some(Self::Reward),
            "grant" => Some(Self::Grant),
            _ => None,
        }
    }
}

/// Reference to one derived entity within a contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    /// Entity kind.
    pub kind: EntityKind,
    /// Entity ID.
    pub id: u64,
}

impl EntityRef {
    /// Creates a reference to a trade.
    #[must_use]
    pub const fn trade(id: u64) -> Self {
        Self {
            kind: EntityKind::Trade,
            id,
        }
    }

    /// Creates a reference to a proposal.
    #[must_use]
    pub const fn proposal(id: u64) -> Self {
        Self {
            kind: EntityKind::Proposal,
            id,
        }
    }

    /// Creates a reference to a reward.
    #[must_use]
    pub const fn reward(id: u64) -> Self {
        Self {
            kind: EntityKind::Reward,
            id,
        }
    }

    /// Creates a reference to a grant.
    #[must_use]
    pub const fn grant(id: u64) -> Self {
        Self {
            kind: EntityKind::Grant,
            id,
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind.as_str(), self.id)
    }
}

/// Non-retriable projection failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProjectionError {
    /// Conflicting data for an existing key.
    #[error("integrity violation on {entity}: {reason}")]
    Integrity {
        /// Affected entity.
        entity: EntityRef,
        /// What conflicted.
        reason: String,
    },

    /// The entity's state forbids the event.
    #[error("invalid transition on {entity}: {event} not allowed while {state}")]
    InvalidTransition {
        /// Affected entity.
        entity: EntityRef,
        /// Current state (`absent` if the entity does not exist).
        state: String,
        /// Offending event topic.
        event: EventTopic,
    },

    /// An earlier event for the entity was rejected.
    #[error("{entity} is quarantined since {since}")]
    Quarantined {
        /// Affected entity.
        entity: EntityRef,
        /// Position of the rejected event.
        since: Position,
    },
}

impl ProjectionError {
    /// Creates an integrity error.
    #[must_use]
    pub fn integrity(entity: EntityRef, reason: impl Into<String>) -> Self {
        Self::Integrity {
            entity,
            reason: reason.into(),
        }
    }

    /// Creates an invalid-transition error.
    #[must_use]
    pub fn invalid(entity: EntityRef, state: impl Into<String>, event: EventTopic) -> Self {
        Self::InvalidTransition {
            entity,
            state: state.into(),
            event,
        }
    }

    /// Returns the affected entity.
    #[must_use]
    pub const fn entity(&self) -> &EntityRef {
        match self {
            Self::Integrity { entity, .. }
            | Self::InvalidTransition { entity, .. }
            | Self::Quarantined { entity, .. } => entity,
        }
    }

    /// Returns true for integrity errors.
    #[must_use]
    pub const fn is_integrity(&self) -> bool {
        matches!(self, Self::Integrity { .. })
    }

    /// Returns true for invalid-transition errors.
    #[must_use]
    pub const fn is_invalid_transition(&self) -> bool {
        matches!(self, Self::InvalidTransition { .. })
    }

    /// Returns true if the event was refused because its entity is
    /// quarantined.
    #[must_use]
    pub const fn is_quarantined(&self) -> bool {
        matches!(self, Self::Quarantined { .. })
    }
}

/// Outcome of a pure entity transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition<T> {
    /// Nothing to write (idempotent replay).
    Unchanged,
    /// Write the new row.
    Write(T),
}

impl<T> Transition<T> {
    /// Returns the row to write, if any.
    #[must_use]
    pub fn into_write(self) -> Option<T> {
        match self {
            Self::Unchanged => None,
            Self::Write(row) => Some(row),
        }
    }
}

/// Result of applying one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// A row was written.
    Written,
    /// The event was already reflected in state.
    Unchanged,
    /// The topic has no projection.
    Ignored,
}

/// Errors from [`ProjectionEngine::apply`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum ApplyError {
    /// The event was rejected; the entity row was not written.
    #[error(transparent)]
    Projection(#[from] ProjectionError),

    /// Reading or writing the row failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Applies decoded events to derived state.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProjectionEngine;

impl ProjectionEngine {
    /// Applies one decoded event within the contract transaction.
    ///
    /// A rejected transition leaves the row untouched and quarantines the
    /// entity. Events for a quarantined entity are refused.
    ///
    /// # Errors
    ///
    /// Returns [`ApplyError::Projection`] for integrity and transition
    /// violations and for quarantined entities, [`ApplyError::Storage`] if
    /// the store fails.
    pub async fn apply<T: StoreTx>(
        tx: &mut T,
        contract_id: &ContractId,
        position: Position,
        event: &DecodedEvent,
    ) -> Result<ApplyOutcome, ApplyError> {
        let Some(entity) = Self::target(event) else {
            return Self::transition(tx, contract_id, position, event).await;
        };

        if let Some(record) = tx.load_quarantine(&entity).await? {
            return Err(ProjectionError::Quarantined {
                entity,
                since: record.position,
            }
            .into());
        }

        match Self::transition(tx, contract_id, position, event).await {
            Err(ApplyError::Projection(err)) => {
                warn!(
                    contract = %contract_id,
                    %position,
                    %entity,
                    error = %err,
                    "quarantining entity"
                );
                tx.save_quarantine(&QuarantineRecord {
                    contract_id: contract_id.clone(),
                    entity,
                    position,
                    reason: err.to_string(),
                })
                .await?;
                Err(err.into())
            }
            other => other,
        }
    }

    /// Returns the entity an event targets, or `None` for topics without a
    /// projection.
    #[must_use]
    pub fn target(event: &DecodedEvent) -> Option<EntityRef> {
        let entity = match event {
            DecodedEvent::TradeExecuted(e) => EntityRef::trade(e.trade_id),
            DecodedEvent::ProposalCreated(e) => EntityRef::proposal(e.proposal_id),
            DecodedEvent::ProposalApproved(e) => EntityRef::proposal(e.proposal_id),
            DecodedEvent::ProposalRejected(e) => EntityRef::proposal(e.proposal_id),
            DecodedEvent::ProposalCancelled(e) => EntityRef::proposal(e.proposal_id),
            DecodedEvent::ProposalExecuted(e) => EntityRef::proposal(e.proposal_id),
            DecodedEvent::RewardAdded(e) => EntityRef::reward(e.reward_id),
            DecodedEvent::RewardClaimed(e) => EntityRef::reward(e.reward_id),
            DecodedEvent::Grant(e) => EntityRef::grant(e.grant_id),
            DecodedEvent::Claim(e) => EntityRef::grant(e.grant_id),
            DecodedEvent::Revoke(e) => EntityRef::grant(e.grant_id),
            DecodedEvent::Unrecognized { .. } => return None,
        };
        Some(entity)
    }

    async fn transition<T: StoreTx>(
        tx: &mut T,
        contract_id: &ContractId,
        position: Position,
        event: &DecodedEvent,
    ) -> Result<ApplyOutcome, ApplyError> {
        let outcome = match event {
            DecodedEvent::TradeExecuted(e) => {
                let current = tx.load_trade(e.trade_id).await?;
                match trade::apply(current.as_ref(), contract_id, e, position)?.into_write() {
                    Some(row) => {
                        tx.save_trade(&row).await?;
                        ApplyOutcome::Written
                    }
                    None => ApplyOutcome::Unchanged,
                }
            }
            DecodedEvent::ProposalCreated(e) => {
                let current = tx.load_proposal(e.proposal_id).await?;
                let transition = proposal::apply_created(current.as_ref(), contract_id, e, position)?;
                Self::save_proposal(tx, transition).await?
            }
            DecodedEvent::ProposalApproved(e) => {
                Self::proposal_action(tx, e.proposal_id, ProposalAction::Approve, position).await?
            }
            DecodedEvent::ProposalRejected(e) => {
                let action = ProposalAction::Reject { at: e.rejected_at };
                Self::proposal_action(tx, e.proposal_id, action, position).await?
            }
            DecodedEvent::ProposalCancelled(e) => {
                let action = ProposalAction::Cancel { at: e.cancelled_at };
                Self::proposal_action(tx, e.proposal_id, action, position).await?
            }
            DecodedEvent::ProposalExecuted(e) => {
                let action = ProposalAction::Execute { at: e.executed_at };
                Self::proposal_action(tx, e.proposal_id, action, position).await?
            }
            DecodedEvent::RewardAdded(e) => {
                let current = tx.load_reward(e.reward_id).await?;
                let transition = reward::apply_added(current.as_ref(), contract_id, e, position)?;
                Self::save_reward(tx, transition).await?
            }
            DecodedEvent::RewardClaimed(e) => {
                let current = tx.load_reward(e.reward_id).await?;
                let transition = reward::apply_claimed(current.as_ref(), e, position)?;
                Self::save_reward(tx, transition).await?
            }
            DecodedEvent::Grant(e) => {
                let current = tx.load_grant(e.grant_id).await?;
                let transition = grant::apply_grant(current.as_ref(), contract_id, e, position)?;
                Self::save_grant(tx, transition).await?
            }
            DecodedEvent::Claim(e) => {
                let current = tx.load_grant(e.grant_id).await?;
                let transition = grant::apply_claim(current.as_ref(), e, position)?;
                Self::save_grant(tx, transition).await?
            }
            DecodedEvent::Revoke(e) => {
                let current = tx.load_grant(e.grant_id).await?;
                let transition = grant::apply_revoke(current.as_ref(), e, position)?;
                Self::save_grant(tx, transition).await?
            }
            DecodedEvent::Unrecognized { topic, .. } => {
                debug!(contract = %contract_id, %position, topic = %topic, "no projection for topic");
                ApplyOutcome::Ignored
            }
        };

        Ok(outcome)
    }

    async fn proposal_action<T: StoreTx>(
        tx: &mut T,
        proposal_id: u64,
        action: ProposalAction,
        position: Position,
    ) -> Result<ApplyOutcome, ApplyError> {
        let current = tx.load_proposal(proposal_id).await?;
        let transition = proposal::apply_action(current.as_ref(), proposal_id, action, position)?;
        Ok(Self::save_proposal(tx, transition).await?)
    }

    async fn save_proposal<T: StoreTx>(
        tx: &mut T,
        transition: Transition<ProposalRecord>,
    ) -> Result<ApplyOutcome, StorageError> {
        match transition.into_write() {
            Some(row) => {
                tx.save_proposal(&row).await?;
                Ok(ApplyOutcome::Written)
            }
            None => Ok(ApplyOutcome::Unchanged),
        }
    }

    async fn save_reward<T: StoreTx>(
        tx: &mut T,
        transition: Transition<RewardRecord>,
    ) -> Result<ApplyOutcome, StorageError> {
        match transition.into_write() {
            Some(row) => {
                tx.save_reward(&row).await?;
                Ok(ApplyOutcome::Written)
            }
            None => Ok(ApplyOutcome::Unchanged),
        }
    }

    async fn save_grant<T: StoreTx>(
        tx: &mut T,
        transition: Transition<GrantRecord>,
    ) -> Result<ApplyOutcome, StorageError> {
        match transition.into_write() {
            Some(row) => {
                tx.save_grant(&row).await?;
                Ok(ApplyOutcome::Written)
            }
            None => Ok(ApplyOutcome::Unchanged),
        }
    }
}


#[cfg(test)]
mod tests {
    use tokio_test::block_on;

    use super::testing::{contract, pos};
    use super::*;
    use crate::events::types::{ProposalApproved, ProposalCreated, RewardAdded, RewardClaimed};
    use crate::storage::{MemoryStore, Store};

    #[test]
    fn test_entity_ref_display() {
        assert_eq!(EntityRef::proposal(7).to_string(), "proposal#7");
        assert_eq!(EntityRef::grant(1).to_string(), "grant#1");
    }

    #[test]
    fn test_projection_error_display() {
        let err = ProjectionError::invalid(
            EntityRef::proposal(7),
            "executed",
            EventTopic::ProposalApproved,
        );
        assert_eq!(
            err.to_string(),
            "invalid transition on proposal#7: PROPOSAL_APPROVED not allowed while executed"
        );
        assert!(err.is_invalid_transition());
        assert_eq!(err.entity(), &EntityRef::proposal(7));
    }

    #[test]
    fn test_engine_writes_and_rejects() {
        block_on(async {
            let store = MemoryStore::new();
            let mut tx = store.begin(&contract()).await.expect("begin");

            let created = DecodedEvent::ProposalCreated(ProposalCreated {
                proposal_id: 7,
                proposer: "GP".to_string(),
                title: "t".to_string(),
                approval_threshold: 2,
                created_at: 1,
            });
            let outcome = ProjectionEngine::apply(&mut tx, &contract(), pos(1), &created)
                .await
                .expect("apply");
            assert_eq!(outcome, ApplyOutcome::Written);

            let approve = DecodedEvent::ProposalApproved(ProposalApproved {
                proposal_id: 8,
                approver: "GA".to_string(),
                approved_at: 2,
            });
            let err = ProjectionEngine::apply(&mut tx, &contract(), pos(2), &approve)
                .await
                .expect_err("unknown proposal");
            assert!(matches!(
                err,
                ApplyError::Projection(ProjectionError::InvalidTransition { .. })
            ));

            let stored = tx.load_proposal(7).await.expect("load").expect("row");
            assert_eq!(stored.current_approvals, 0);
            assert!(tx.load_proposal(8).await.expect("load").is_none());
        });
    }

    fn reward_added(reward_id: u64, amount: i128) -> DecodedEvent {
        DecodedEvent::RewardAdded(RewardAdded {
            reward_id,
            recipient: "GR".to_string(),
            amount,
            reason: "post".to_string(),
            added_at: 3,
        })
    }

    fn reward_claimed(reward_id: u64, amount: i128) -> DecodedEvent {
        DecodedEvent::RewardClaimed(RewardClaimed {
            reward_id,
            recipient: "GR".to_string(),
            amount,
            claimed_at: 9,
        })
    }

    #[test]
    fn test_entity_kind_names() {
        for kind in [
            EntityKind::Trade,
            EntityKind::Proposal,
            EntityKind::Reward,
            EntityKind::Grant,
        ] {
            assert_eq!(EntityKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(EntityKind::parse("order"), None);
    }

    #[test]
    fn test_engine_targets() {
        assert_eq!(
            ProjectionEngine::target(&reward_claimed(42, 1)),
            Some(EntityRef::reward(42))
        );
        let unknown = DecodedEvent::Unrecognized {
            topic: "MINTED".to_string(),
            raw: Vec::new(),
        };
        assert_eq!(ProjectionEngine::target(&unknown), None);
    }

    #[test]
    fn test_rejection_quarantines_entity() {
        block_on(async {
            let store = MemoryStore::new();
            let mut tx = store.begin(&contract()).await.expect("begin");

            ProjectionEngine::apply(&mut tx, &contract(), pos(1), &reward_added(42, 100))
                .await
                .expect("add");
            let err = ProjectionEngine::apply(&mut tx, &contract(), pos(2), &reward_claimed(42, 999))
                .await
                .expect_err("amount mismatch");
            assert!(matches!(err, ApplyError::Projection(ref e) if e.is_integrity()));

            let record = tx
                .load_quarantine(&EntityRef::reward(42))
                .await
                .expect("load")
                .expect("quarantined");
            assert_eq!(record.position, pos(2));
            assert!(record.reason.contains("reward#42"));

            let err = ProjectionEngine::apply(&mut tx, &contract(), pos(3), &reward_claimed(42, 100))
                .await
                .expect_err("quarantined");
            assert!(matches!(
                err,
                ApplyError::Projection(ProjectionError::Quarantined { entity, since })
                    if entity == EntityRef::reward(42) && since == pos(2)
            ));

            let reward = tx.load_reward(42).await.expect("load").expect("row");
            assert!(!reward.claimed);
            assert_eq!(reward.claimed_amount, None);

            let outcome = ProjectionEngine::apply(&mut tx, &contract(), pos(4), &reward_added(43, 7))
                .await
                .expect("other entity");
            assert_eq!(outcome, ApplyOutcome::Written);
        });
    }

    #[test]
    fn test_engine_replay_is_unchanged() {
        block_on(async {
            let store = MemoryStore::new();
            let mut tx = store.begin(&contract()).await.expect("begin");
            let event = DecodedEvent::RewardAdded(RewardAdded {
                reward_id: 1,
                recipient: "GR".to_string(),
                amount: 5,
                reason: "post".to_string(),
                added_at: 3,
            });

            let first = ProjectionEngine::apply(&mut tx, &contract(), pos(4), &event)
                .await
                .expect("apply");
            let second = ProjectionEngine::apply(&mut tx, &contract(), pos(4), &event)
                .await
                .expect("apply");

            assert_eq!(first, ApplyOutcome::Written);
            assert_eq!(second, ApplyOutcome::Unchanged);
        });
    }

    #[test]
    fn test_engine_ignores_unrecognized() {
        block_on(async {
            let store = MemoryStore::new();
            let mut tx = store.begin(&contract()).await.expect("begin");
            let event = DecodedEvent::Unrecognized {
                topic: "MINTED".to_string(),
                raw: b"{}".to_vec(),
            };
            let outcome = ProjectionEngine::apply(&mut tx, &contract(), pos(1), &event)
                .await
                .expect("apply");
            assert_eq!(outcome, ApplyOutcome::Ignored);
        });
    }
}
