//! Event decoder.
//!
//! Turns a classified topic and its untyped JSON payload into a
//! [`DecodedEvent`]. Decoding is pure: the same input always produces the
//! same output.

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::position::Position;
use super::topic::EventTopic;
use super::types::{
    ClaimEvent, DecodedEvent, GrantEvent, ProposalApproved, ProposalCancelled, ProposalCreated,
    ProposalExecuted, ProposalRejected, RevokeEvent, RewardAdded, RewardClaimed, TradeExecuted,
};

/// A payload that does not match the expected shape for its topic.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("failed to decode {topic} at {position}: {reason}")]
pub struct DecodeError {
    /// Topic the payload was decoded as.
    pub topic: EventTopic,
    /// Position of the event.
    pub position: Position,
    /// Why decoding failed.
    pub reason: String,
    /// The payload as received.
    pub raw_payload: Value,
}

/// Semantic checks applied after the payload shape has been parsed.
trait Payload: DeserializeOwned {
    fn check(&self) -> Result<(), String> {
        Ok(())
    }
}

fn non_negative(field: &str, amount: i128) -> Result<(), String> {
    if amount < 0 {
        return Err(format!("{field} must be non-negative, got {amount}"));
    }
    Ok(())
}

fn positive(field: &str, amount: i128) -> Result<(), String> {
    if amount <= 0 {
        return Err(format!("{field} must be positive, got {amount}"));
    }
    Ok(())
}

impl Payload for TradeExecuted {
    fn check(&self) -> Result<(), String> {
        non_negative("base_amount", self.base_amount)?;
        non_negative("quote_amount", self.quote_amount)
    }
}

impl Payload for ProposalCreated {
    fn check(&self) -> Result<(), String> {
        if self.approval_threshold == 0 {
            return Err("approval_threshold must be at least 1".to_string());
        }
        Ok(())
    }
}

impl Payload for ProposalApproved {}
impl Payload for ProposalRejected {}
impl Payload for ProposalCancelled {}
impl Payload for ProposalExecuted {}

impl Payload for RewardAdded {
    fn check(&self) -> Result<(), String> {
        non_negative("amount", self.amount)
    }
}

impl Payload for RewardClaimed {
    fn check(&self) -> Result<(), String> {
        non_negative("amount", self.amount)
    }
}

impl Payload for GrantEvent {
    fn check(&self) -> Result<(), String> {
        positive("amount", self.amount)?;
        if self.cliff_seconds > self.duration_seconds {
            return Err(format!(
                "cliff_seconds ({}) exceeds duration_seconds ({})",
                self.cliff_seconds, self.duration_seconds
            ));
        }
        Ok(())
    }
}

impl Payload for ClaimEvent {
    fn check(&self) -> Result<(), String> {
        positive("amount", self.amount)
    }
}

impl Payload for RevokeEvent {
    fn check(&self) -> Result<(), String> {
        non_negative("unvested_amount", self.unvested_amount)
    }
}

fn parse<T: Payload>(payload: &Value) -> Result<T, String> {
    let parsed: T = serde::Deserialize::deserialize(payload).map_err(|e| e.to_string())?;
    parsed.check()?;
    Ok(parsed)
}

/// Decodes a payload for the given topic.
///
/// Unknown topics decode to [`DecodedEvent::Unrecognized`] carrying the raw
/// JSON bytes.
///
/// # Errors
///
/// Returns a [`DecodeError`] if the payload does not match the topic's shape
/// or fails its semantic checks.
pub fn decode(
    topic: &EventTopic,
    payload: &Value,
    position: &Position,
) -> Result<DecodedEvent, DecodeError> {
    let decoded = match topic {
        EventTopic::TradeExecuted => parse(payload).map(DecodedEvent::TradeExecuted),
        EventTopic::ProposalCreated => parse(payload).map(DecodedEvent::ProposalCreated),
        EventTopic::ProposalApproved => parse(payload).map(DecodedEvent::ProposalApproved),
        EventTopic::ProposalRejected => parse(payload).map(DecodedEvent::ProposalRejected),
        EventTopic::ProposalCancelled => parse(payload).map(DecodedEvent::ProposalCancelled),
        EventTopic::ProposalExecuted => parse(payload).map(DecodedEvent::ProposalExecuted),
        EventTopic::RewardAdded => parse(payload).map(DecodedEvent::RewardAdded),
        EventTopic::RewardClaimed => parse(payload).map(DecodedEvent::RewardClaimed),
        EventTopic::Grant => parse(payload).map(DecodedEvent::Grant),
        EventTopic::Claim => parse(payload).map(DecodedEvent::Claim),
        EventTopic::Revoke => parse(payload).map(DecodedEvent::Revoke),
        EventTopic::Unknown(name) => serde_json::to_vec(payload)
            .map(|raw| DecodedEvent::Unrecognized {
                topic: name.clone(),
                raw,
            })
            .map_err(|e| e.to_string()),
    };

    decoded.map_err(|reason| DecodeError {
        topic: topic.clone(),
        position: *position,
        reason,
        raw_payload: payload.clone(),
    })
}
