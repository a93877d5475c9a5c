//! Types for contract events.
//!
//! Defines the inbound raw event, the typed payload of every known topic,
//! and the immutable indexed-event record kept in the log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::int;
use super::position::{ContractId, Position, TxHash};
use super::topic::EventTopic;

/// A raw event as delivered by the ledger source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    /// Emitting contract.
    pub contract_id: ContractId,
    /// Raw topic string.
    pub topic: String,
    /// Untyped event payload.
    pub payload: Value,
    /// Ledger sequence the event was emitted in.
    pub ledger: u32,
    /// Close time of the ledger.
    pub ledger_closed_at: DateTime<Utc>,
    /// Emitting transaction hash.
    pub tx_hash: TxHash,
    /// Index of the event within the transaction.
    pub event_index: u32,
}

impl RawEvent {
    /// Returns the position of the event.
    #[must_use]
    pub const fn position(&self) -> Position {
        Position::new(self.ledger, self.tx_hash, self.event_index)
    }
}

/// A trade was executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TradeExecuted {
    /// Trade ID.
    #[serde(deserialize_with = "int::deserialize")]
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
    #[serde(deserialize_with = "int::deserialize")]
    pub executed_at: u64,
}

/// A governance proposal was created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProposalCreated {
    /// Proposal ID.
    #[serde(deserialize_with = "int::deserialize")]
    pub proposal_id: u64,
    /// Proposer address.
    pub proposer: String,
    /// Proposal title.
    pub title: String,
    /// Approvals required before execution.
    #[serde(deserialize_with = "int::deserialize")]
    pub approval_threshold: u32,
    /// On-chain creation timestamp (seconds).
    #[serde(deserialize_with = "int::deserialize")]
    pub created_at: u64,
}

/// A proposal received an approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProposalApproved {
    /// Proposal ID.
    #[serde(deserialize_with = "int::deserialize")]
    pub proposal_id: u64,
    /// Approver address.
    pub approver: String,
    /// On-chain approval timestamp (seconds).
    #[serde(deserialize_with = "int::deserialize")]
    pub approved_at: u64,
}

/// A proposal was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProposalRejected {
    /// Proposal ID.
    #[serde(deserialize_with = "int::deserialize")]
    pub proposal_id: u64,
    /// Address that rejected the proposal.
    pub rejected_by: String,
    /// On-chain rejection timestamp (seconds).
    #[serde(deserialize_with = "int::deserialize")]
    pub rejected_at: u64,
}

/// A proposal was cancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProposalCancelled {
    /// Proposal ID.
    #[serde(deserialize_with = "int::deserialize")]
    pub proposal_id: u64,
    /// Address that cancelled the proposal.
    pub cancelled_by: String,
    /// On-chain cancellation timestamp (seconds).
    #[serde(deserialize_with = "int::deserialize")]
    pub cancelled_at: u64,
}

/// A proposal was executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProposalExecuted {
    /// Proposal ID.
    #[serde(deserialize_with = "int::deserialize")]
    pub proposal_id: u64,
    /// Executor address.
    pub executor: String,
    /// On-chain execution timestamp (seconds).
    #[serde(deserialize_with = "int::deserialize")]
    pub executed_at: u64,
}

/// A social reward was added.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RewardAdded {
    /// Reward ID.
    #[serde(deserialize_with = "int::deserialize")]
    pub reward_id: u64,
    /// Recipient address.
    pub recipient: String,
    /// Reward amount.
    #[serde(with = "int::amount")]
    pub amount: i128,
    /// Reason the reward was granted.
    pub reason: String,
    /// On-chain timestamp (seconds).
    #[serde(deserialize_with = "int::deserialize")]
    pub added_at: u64,
}

/// A social reward was claimed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RewardClaimed {
    /// Reward ID.
    #[serde(deserialize_with = "int::deserialize")]
    pub reward_id: u64,
    /// Recipient address.
    pub recipient: String,
    /// Claimed amount.
    #[serde(with = "int::amount")]
    pub amount: i128,
    /// On-chain claim timestamp (seconds).
    #[serde(deserialize_with = "int::deserialize")]
    pub claimed_at: u64,
}

/// A vesting grant was created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GrantEvent {
    /// Grant (vesting schedule) ID.
    #[serde(deserialize_with = "int::deserialize")]
    pub grant_id: u64,
    /// Beneficiary address.
    pub beneficiary: String,
    /// Total granted amount.
    #[serde(with = "int::amount")]
    pub amount: i128,
    /// Vesting start (seconds).
    #[serde(deserialize_with = "int::deserialize")]
    pub start_time: u64,
    /// Cliff length in seconds.
    #[serde(deserialize_with = "int::deserialize")]
    pub cliff_seconds: u64,
    /// Total vesting duration in seconds.
    #[serde(deserialize_with = "int::deserialize")]
    pub duration_seconds: u64,
    /// On-chain grant timestamp (seconds).
    #[serde(deserialize_with = "int::deserialize")]
    pub granted_at: u64,
}

/// Tokens were claimed from a vesting grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClaimEvent {
    /// Grant ID.
    #[serde(deserialize_with = "int::deserialize")]
    pub grant_id: u64,
    /// Beneficiary address.
    pub beneficiary: String,
    /// Claimed amount.
    #[serde(with = "int::amount")]
    pub amount: i128,
    /// On-chain claim timestamp (seconds).
    #[serde(deserialize_with = "int::deserialize")]
    pub claimed_at: u64,
}

/// A vesting grant was revoked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RevokeEvent {
    /// Grant ID.
    #[serde(deserialize_with = "int::deserialize")]
    pub grant_id: u64,
    /// On-chain revocation timestamp (seconds).
    #[serde(deserialize_with = "int::deserialize")]
    pub revoked_at: u64,
    /// Amount returned to the grantor.
    #[serde(with = "int::amount")]
    pub unvested_amount: i128,
}

/// A decoded event.
///
/// Closed over the known topics; topics the classifier does not recognize
/// are carried as [`DecodedEvent::Unrecognized`] with their raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedEvent {
    /// `TRADE_EXECUTED`.
    TradeExecuted(TradeExecuted),
    /// `PROPOSAL_CREATED`.
    ProposalCreated(ProposalCreated),
    /// `PROPOSAL_APPROVED`.
    ProposalApproved(ProposalApproved),
    /// `PROPOSAL_REJECTED`.
    ProposalRejected(ProposalRejected),
    /// `PROPOSAL_CANCELLED`.
    ProposalCancelled(ProposalCancelled),
    /// `PROPOSAL_EXECUTED`.
    ProposalExecuted(ProposalExecuted),
    /// `REWARD_ADDED`.
    RewardAdded(RewardAdded),
    /// `REWARD_CLAIMED`.
    RewardClaimed(RewardClaimed),
    /// `GRANT`.
    Grant(GrantEvent),
    /// `CLAIM`.
    Claim(ClaimEvent),
    /// `REVOKE`.
    Revoke(RevokeEvent),
    /// An event with an unrecognized topic.
    Unrecognized {
        /// Raw topic string.
        topic: String,
        /// Raw payload bytes (JSON).
        raw: Vec<u8>,
    },
}

impl DecodedEvent {
    /// Returns the topic of the event.
    #[must_use]
    pub fn topic(&self) -> EventTopic {
        match self {
            Self::TradeExecuted(_) => EventTopic::TradeExecuted,
            Self::ProposalCreated(_) => EventTopic::ProposalCreated,
            Self::ProposalApproved(_) => EventTopic::ProposalApproved,
            Self::ProposalRejected(_) => EventTopic::ProposalRejected,
            Self::ProposalCancelled(_) => EventTopic::ProposalCancelled,
            Self::ProposalExecuted(_) => EventTopic::ProposalExecuted,
            Self::RewardAdded(_) => EventTopic::RewardAdded,
            Self::RewardClaimed(_) => EventTopic::RewardClaimed,
            Self::Grant(_) => EventTopic::Grant,
            Self::Claim(_) => EventTopic::Claim,
            Self::Revoke(_) => EventTopic::Revoke,
            Self::Unrecognized { topic, .. } => EventTopic::Unknown(topic.clone()),
        }
    }

    /// Returns true for events with an unrecognized topic.
    #[must_use]
    pub const fn is_unrecognized(&self) -> bool {
        matches!(self, Self::Unrecognized { .. })
    }

    /// Returns the typed payload as JSON, or `None` for unrecognized events.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized.
    pub fn payload_json(&self) -> Result<Option<Value>, serde_json::Error> {
        let value = match self {
            Self::TradeExecuted(e) => serde_json::to_value(e)?,
            Self::ProposalCreated(e) => serde_json::to_value(e)?,
            Self::ProposalApproved(e) => serde_json::to_value(e)?,
            Self::ProposalRejected(e) => serde_json::to_value(e)?,
            Self::ProposalCancelled(e) => serde_json::to_value(e)?,
            Self::ProposalExecuted(e) => serde_json::to_value(e)?,
            Self::RewardAdded(e) => serde_json::to_value(e)?,
            Self::RewardClaimed(e) => serde_json::to_value(e)?,
            Self::Grant(e) => serde_json::to_value(e)?,
            Self::Claim(e) => serde_json::to_value(e)?,
            Self::Revoke(e) => serde_json::to_value(e)?,
            Self::Unrecognized { .. } => return Ok(None),
        };
        Ok(Some(value))
    }
}

/// An entry of the indexed-event log.
///
/// Created once per observed event and never mutated. `decoded_payload` is
/// `None` when decoding failed (see `decode_error`) or the topic is unknown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedEvent {
    /// Emitting contract.
    pub contract_id: ContractId,
    /// Raw topic string.
    pub topic: String,
    /// Position of the event.
    pub position: Position,
    /// Close time of the ledger.
    pub ledger_closed_at: DateTime<Utc>,
    /// Payload as received.
    pub raw_payload: Value,
    /// Typed payload, if decoding succeeded.
    pub decoded_payload: Option<Value>,
    /// Decode failure reason, if decoding failed.
    pub decode_error: Option<String>,
    /// When the entry was written.
    pub created_at: DateTime<Utc>,
}

impl IndexedEvent {
    /// Creates a log entry for an observed event.
    #[must_use]
    pub fn observed(
        event: &RawEvent,
        decoded_payload: Option<Value>,
        decode_error: Option<String>,
    ) -> Self {
        Self {
            contract_id: event.contract_id.clone(),
            topic: event.topic.clone(),
            position: event.position(),
            ledger_closed_at: event.ledger_closed_at,
            raw_payload: event.payload.clone(),
            decoded_payload,
            decode_error,
            created_at: Utc::now(),
        }
    }

    /// Returns true if this entry records exactly the given raw event.
    #[must_use]
    pub fn records(&self, event: &RawEvent) -> bool {
        self.contract_id == event.contract_id
            && self.position == event.position()
            && self.topic == event.topic
            && self.ledger_closed_at == event.ledger_closed_at
            && self.raw_payload == event.payload
    }

    /// Returns true if both entries record the same observed event.
    ///
    /// Ignores `created_at` and the derived decode columns.
    #[must_use]
    pub fn same_event(&self, other: &Self) -> bool {
        self.contract_id == other.contract_id
            && self.position == other.position
            && self.topic == other.topic
            && self.ledger_closed_at == other.ledger_closed_at
            && self.raw_payload == other.raw_payload
    }

    /// Reconstructs the raw event, for replay.
    #[must_use]
    pub fn to_raw(&self) -> RawEvent {
        RawEvent {
            contract_id: self.contract_id.clone(),
            topic: self.topic.clone(),
            payload: self.raw_payload.clone(),
            ledger: self.position.ledger,
            ledger_closed_at: self.ledger_closed_at,
            tx_hash: self.position.tx_hash,
            event_index: self.position.event_index,
        }
    }
}
