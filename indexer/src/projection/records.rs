//! Derived-state rows owned by the projection engine.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::EntityRef;
use crate::events::int;
use crate::events::{ContractId, Position};

/// An executed trade. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeRecord {
    /// Emitting contract.
    pub contract_id: ContractId,
    /// Trade ID.
    pub trade_id: u64,
    /// Maker address.
    pub maker: String,
    /// Taker address.
    pub taker: String,
    /// Base asset contract.
    pub base_asset: String,
    /// Quote asset contract.
    pub quote_asset: String,
    /// Base amount exchanged.
    #[serde(with = "int::amount")]
    pub base_amount: i128,
    /// Quote amount exchanged.
    #[serde(with = "int::amount")]
    pub quote_amount: i128,
    /// On-chain execution timestamp (seconds).
    pub executed_at: u64,
    /// Position of the `TRADE_EXECUTED` event.
    pub position: Position,
}

/// Lifecycle status of a proposal.
///
/// Approvals accumulate while the proposal is `Pending`; the remaining
/// variants are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    /// Open for approvals.
    Pending,
    /// Executed on-chain.
    Executed,
    /// Rejected.
    Rejected,
    /// Cancelled by the proposer.
    Cancelled,
}

impl ProposalStatus {
    /// Returns the stored name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Executed => "executed",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parses a stored name.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "executed" => Some(Self::Executed),
            "rejected" => Some(Self::Rejected),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Returns true for final states.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A governance proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalRecord {
    /// Emitting contract.
    pub contract_id: ContractId,
    /// Proposal ID.
    pub proposal_id: u64,
    /// Proposer address.
    pub proposer: String,
    /// Proposal title.
    pub title: String,
    /// Approvals required before execution.
    pub approval_threshold: u32,
    /// Approvals received so far.
    pub current_approvals: u32,
    /// Lifecycle status.
    pub status: ProposalStatus,
    /// On-chain creation timestamp (seconds).
    pub created_at: u64,
    /// On-chain timestamp of the terminal transition.
    pub closed_at: Option<u64>,
    /// Position of the `PROPOSAL_CREATED` event.
    pub created_position: Position,
    /// Position of the last event applied to this proposal.
    pub last_position: Position,
}

impl ProposalRecord {
    /// Returns true once approvals reached the threshold.
    #[must_use]
    pub const fn quorum_reached(&self) -> bool {
        self.current_approvals >= self.approval_threshold
    }
}

/// A social reward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardRecord {
    /// Emitting contract.
    pub contract_id: ContractId,
    /// Reward ID.
    pub reward_id: u64,
    /// Recipient address.
    pub recipient: String,
    /// Reward amount.
    #[serde(with = "int::amount")]
    pub amount: i128,
    /// Reason the reward was granted.
    pub reason: String,
    /// On-chain timestamp (seconds).
    pub added_at: u64,
    /// Whether the reward has been claimed.
    pub claimed: bool,
    /// Amount of the claim.
    #[serde(with = "int::amount_opt")]
    pub claimed_amount: Option<i128>,
    /// On-chain claim timestamp (seconds).
    pub claimed_at: Option<u64>,
    /// Position of the `REWARD_ADDED` event.
    pub created_position: Position,
    /// Position of the `REWARD_CLAIMED` event.
    pub claim_position: Option<Position>,
}

/// Status of a vesting grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantStatus {
    /// Vesting; claims allowed.
    Active,
    /// Revoked. Terminal.
    Revoked,
}

impl GrantStatus {
    /// Returns the stored name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Revoked => "revoked",
        }
    }

    /// Parses a stored name.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(Self::Active),
            "revoked" => Some(Self::Revoked),
            _ => None,
        }
    }
}

impl fmt::Display for GrantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A vesting grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantRecord {
    /// Emitting contract.
    pub contract_id: ContractId,
    /// Grant ID.
    pub grant_id: u64,
    /// Beneficiary address.
    pub beneficiary: String,
    /// Total granted amount.
    #[serde(with = "int::amount")]
    pub amount: i128,
    /// Vesting start (seconds).
    pub start_time: u64,
    /// Cliff length in seconds.
    pub cliff_seconds: u64,
    /// Total vesting duration in seconds.
    pub duration_seconds: u64,
    /// On-chain grant timestamp (seconds).
    pub granted_at: u64,
    /// Sum of all claims.
    #[serde(with = "int::amount")]
    pub total_claimed: i128,
    /// Number of claims applied.
    pub claim_count: u32,
    /// Grant status.
    pub status: GrantStatus,
    /// On-chain revocation timestamp (seconds).
    pub revoked_at: Option<u64>,
    /// Amount returned on revocation.
    #[serde(with = "int::amount_opt")]
    pub unvested_amount: Option<i128>,
    /// Position of the `GRANT` event.
    pub created_position: Position,
    /// Position of the last event applied to this grant.
    pub last_position: Position,
}

impl GrantRecord {
    /// Returns the amount still claimable under the grant.
    #[must_use]
    pub fn remaining(&self) -> i128 {
        self.amount.saturating_sub(self.total_claimed)
    }
}

/// An entity frozen by a rejected event. Later events for it are refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuarantineRecord {
    /// Emitting contract.
    pub contract_id: ContractId,
    /// Quarantined entity.
    pub entity: EntityRef,
    /// Position of the rejected event.
    pub position: Position,
    /// Rejection message.
    pub reason: String,
}

/// All derived rows of one contract, sorted by key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectionSnapshot {
    /// Trades by `trade_id`.
    pub trades: Vec<TradeRecord>,
    /// Proposals by `proposal_id`.
    pub proposals: Vec<ProposalRecord>,
    /// Rewards by `reward_id`.
    pub rewards: Vec<RewardRecord>,
    /// Grants by `grant_id`.
    pub grants: Vec<GrantRecord>,
    /// Quarantined entities by kind, then ID.
    pub quarantined: Vec<QuarantineRecord>,
}

impl ProjectionSnapshot {
    /// Returns the canonical JSON encoding, used to compare snapshots byte-for-byte.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_canonical_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Returns true if the snapshot holds no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.trades.is_empty()
            && self.proposals.is_empty()
            && self.rewards.is_empty()
            && self.grants.is_empty()
            && self.quarantined.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proposal_status_names() {
        for status in [
            ProposalStatus::Pending,
            ProposalStatus::Executed,
            ProposalStatus::Rejected,
            ProposalStatus::Cancelled,
        ] {
            assert_eq!(ProposalStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ProposalStatus::parse("approved"), None);
    }

    #[test]
    fn test_proposal_status_terminal() {
        assert!(!ProposalStatus::Pending.is_terminal());
        assert!(ProposalStatus::Executed.is_terminal());
        assert!(ProposalStatus::Rejected.is_terminal());
        assert!(ProposalStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_grant_status_names() {
        assert_eq!(GrantStatus::parse("active"), Some(GrantStatus::Active));
        assert_eq!(GrantStatus::parse("revoked"), Some(GrantStatus::Revoked));
        assert_eq!(GrantStatus::Revoked.to_string(), "revoked");
    }

    #[test]
    fn test_quarantine_record_json() {
        let record = QuarantineRecord {
            contract_id: ContractId::new("CA"),
            entity: EntityRef::reward(42),
            position: crate::projection::testing::pos(2),
            reason: "amount mismatch".to_string(),
        };
        let value = serde_json::to_value(&record).expect("encode");
        assert_eq!(value["entity"], serde_json::json!({"kind": "reward", "id": 42}));

        let snapshot = ProjectionSnapshot {
            quarantined: vec![record],
            ..ProjectionSnapshot::default()
        };
        assert!(!snapshot.is_empty());
    }

    #[test]
    fn test_snapshot_empty() {
        let snapshot = ProjectionSnapshot::default();
        assert!(snapshot.is_empty());
        assert_eq!(
            snapshot.to_canonical_json().expect("json"),
            br#"{"trades":[],"proposals":[],"rewards":[],"grants":[],"quarantined":[]}"#.to_vec()
        );
    }
}
