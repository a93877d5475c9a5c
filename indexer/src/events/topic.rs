//! Event topic classification.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Topic of a contract event.
///
/// Every topic the contracts emit has its own variant. Anything else is kept
/// verbatim in [`EventTopic::Unknown`] so it can still be logged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventTopic {
    /// A trade was executed.
    TradeExecuted,
    /// A governance proposal was created.
    ProposalCreated,
    /// A governance proposal received an approval.
    ProposalApproved,
    /// A governance proposal was rejected.
    ProposalRejected,
    /// A governance proposal was cancelled.
    ProposalCancelled,
    /// A governance proposal was executed.
    ProposalExecuted,
    /// A social reward was added.
    RewardAdded,
    /// A social reward was claimed.
    RewardClaimed,
    /// A vesting grant was created.
    Grant,
    /// Tokens were claimed from a vesting grant.
    Claim,
    /// A vesting grant was revoked.
    Revoke,
    /// Any topic not listed above.
    Unknown(String),
}

impl EventTopic {
    /// All known topics, in declaration order.
    pub const KNOWN: [Self; 11] = [
        Self::TradeExecuted,
        Self::ProposalCreated,
        Self::ProposalApproved,
        Self::ProposalRejected,
        Self::ProposalCancelled,
        Self::ProposalExecuted,
        Self::RewardAdded,
        Self::RewardClaimed,
        Self::Grant,
        Self::Claim,
        Self::Revoke,
    ];

    /// Classifies a raw topic string.
    ///
    /// Total over all inputs: unrecognized topics yield [`EventTopic::Unknown`].
    /// Matching is exact and case-sensitive.
    #[must_use]
    pub fn classify(topic: &str) -> Self {
        match topic {
            "TRADE_EXECUTED" => Self::TradeExecuted,
            "PROPOSAL_CREATED" => Self::ProposalCreated,
            "PROPOSAL_APPROVED" => Self::ProposalApproved,
            "PROPOSAL_REJECTED" => Self::ProposalRejected,
            "PROPOSAL_CANCELLED" => Self::ProposalCancelled,
            "PROPOSAL_EXECUTED" => Self::ProposalExecuted,
            "REWARD_ADDED" => Self::RewardAdded,
            "REWARD_CLAIMED" => Self::RewardClaimed,
            "GRANT" => Self::Grant,
            "CLAIM" => Self::Claim,
            "REVOKE" => Self::Revoke,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// Returns the wire name of the topic.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::TradeExecuted => "TRADE_EXECUTED",
            Self::ProposalCreated => "PROPOSAL_CREATED",
            Self::ProposalApproved => "PROPOSAL_APPROVED",
            Self::ProposalRejected => "PROPOSAL_REJECTED",
            Self::ProposalCancelled => "PROPOSAL_CANCELLED",
            Self::ProposalExecuted => "PROPOSAL_EXECUTED",
            Self::RewardAdded => "REWARD_ADDED",
            Self::RewardClaimed => "REWARD_CLAIMED",
            Self::Grant => "GRANT",
            Self::Claim => "CLAIM",
            Self::Revoke => "REVOKE",
            Self::Unknown(topic) => topic,
        }
    }

    /// Returns true if the topic is one of the enumerated variants.
    #[must_use]
    pub const fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown(_))
    }
}

impl fmt::Display for EventTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for EventTopic {
    fn from(topic: &str) -> Self {
        Self::classify(topic)
    }
}
