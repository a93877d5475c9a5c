//! Reward projection. A reward moves from unclaimed to claimed at most once.

use super::records::RewardRecord;
use super::{EntityRef, ProjectionError, Transition};
use crate::events::types::{RewardAdded, RewardClaimed};
use crate::events::{ContractId, EventTopic, Position};

/// Applies `REWARD_ADDED`.
///
/// # Errors
///
/// Returns an integrity error if the reward already exists at a different
/// position or with different content.
pub fn apply_added(
    current: Option<&RewardRecord>,
    contract_id: &ContractId,
    event: &RewardAdded,
    position: Position,
) -> Result<Transition<RewardRecord>, ProjectionError> {
    let entity = EntityRef::reward(event.reward_id);

    let Some(existing) = current else {
        return Ok(Transition::Write(RewardRecord {
            contract_id: contract_id.clone(),
            reward_id: event.reward_id,
            recipient: event.recipient.clone(),
            amount: event.amount,
            reason: event.reason.clone(),
            added_at: event.added_at,
            claimed: false,
            claimed_amount: None,
            claimed_at: None,
            created_position: position,
            claim_position: None,
        }));
    };

    if existing.created_position != position {
        return Err(ProjectionError::integrity(
            entity,
            format!("already added at {}", existing.created_position),
        ));
    }

    let same_content = existing.recipient == event.recipient
        && existing.amount == event.amount
        && existing.reason == event.reason
        && existing.added_at == event.added_at;

    if same_content {
        Ok(Transition::Unchanged)
    } else {
        Err(ProjectionError::integrity(
            entity,
            "conflicting content at the same position",
        ))
    }
}

/// Applies `REWARD_CLAIMED`.
///
/// A repeated claim with the same amount and timestamp is a no-op.
///
/// # Errors
///
/// Returns an invalid-transition error if the reward does not exist, and an
/// integrity error if the claim conflicts with the reward or with an earlier
/// claim.
pub fn apply_claimed(
    current: Option<&RewardRecord>,
    event: &RewardClaimed,
    position: Position,
) -> Result<Transition<RewardRecord>, ProjectionError> {
    let entity = EntityRef::reward(event.reward_id);

    let Some(existing) = current else {
        return Err(ProjectionError::invalid(
            entity,
            "absent",
            EventTopic::RewardClaimed,
        ));
    };

    if existing.claimed {
        let duplicate = existing.claimed_amount == Some(event.amount)
            && existing.claimed_at == Some(event.claimed_at)
            && existing.recipient == event.recipient;

        return if duplicate {
            Ok(Transition::Unchanged)
        } else {
            Err(ProjectionError::integrity(
                entity,
                format!(
                    "already claimed at {} with different data",
                    existing
                        .claim_position
                        .map_or_else(|| "unknown position".to_string(), |p| p.to_string())
                ),
            ))
        };
    }

    if position <= existing.created_position {
        return Err(ProjectionError::integrity(
            entity,
            format!(
                "claim at {position} does not follow creation at {}",
                existing.created_position
            ),
        ));
    }

    if existing.recipient != event.recipient {
        return Err(ProjectionError::integrity(
            entity,
            format!(
                "claimed by {} but owed to {}",
                event.recipient, existing.recipient
            ),
        ));
    }

    if existing.amount != event.amount {
        return Err(ProjectionError::integrity(
            entity,
            format!(
                "claimed amount {} differs from reward amount {}",
                event.amount, existing.amount
            ),
        ));
    }

    let mut next = existing.clone();
    next.claimed = true;
    next.claimed_amount = Some(event.amount);
    next.claimed_at = Some(event.claimed_at);
    next.claim_position = Some(position);

    Ok(Transition::Write(next))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::testing::{contract, pos};

    fn added(id: u64, amount: i128) -> RewardAdded {
        RewardAdded {
            reward_id: id,
            recipient: "GRECIPIENT".to_string(),
            amount,
            reason: "helpful answer".to_string(),
            added_at: 100,
        }
    }

    fn claimed(id: u64, amount: i128) -> RewardClaimed {
        RewardClaimed {
            reward_id: id,
            recipient: "GRECIPIENT".to_string(),
            amount,
            claimed_at: 200,
        }
    }

    fn add(id: u64, amount: i128) -> RewardRecord {
        apply_added(None, &contract(), &added(id, amount), pos(1))
            .expect("add")
            .into_write()
            .expect("row")
    }

    #[test]
    fn test_added_unclaimed() {
        let row = add(42, 100);
        assert!(!row.claimed);
        assert_eq!(row.claimed_amount, None);
        assert_eq!(row.created_position, pos(1));
    }

    #[test]
    fn test_added_duplicate_rules() {
        let row = add(42, 100);
        assert_eq!(
            apply_added(Some(&row), &contract(), &added(42, 100), pos(1)).expect("replay"),
            Transition::Unchanged
        );
        assert!(apply_added(Some(&row), &contract(), &added(42, 100), pos(2))
            .expect_err("moved")
            .is_integrity());
        assert!(apply_added(Some(&row), &contract(), &added(42, 7), pos(1))
            .expect_err("changed")
            .is_integrity());
    }

    #[test]
    fn test_claim_scenario() {
        let row = add(42, 100);
        let row = apply_claimed(Some(&row), &claimed(42, 100), pos(2))
            .expect("claim")
            .into_write()
            .expect("row");
        assert!(row.claimed);
        assert_eq!(row.claimed_amount, Some(100));
        assert_eq!(row.claimed_at, Some(200));
        assert_eq!(row.claim_position, Some(pos(2)));

        let replay = apply_claimed(Some(&row), &claimed(42, 100), pos(3)).expect("replay");
        assert_eq!(replay, Transition::Unchanged);

        let err = apply_claimed(Some(&row), &claimed(42, 999), pos(4)).expect_err("conflict");
        assert!(err.is_integrity());
    }

    #[test]
    fn test_claim_different_timestamp_is_conflict() {
        let row = add(42, 100);
        let row = apply_claimed(Some(&row), &claimed(42, 100), pos(2))
            .expect("claim")
            .into_write()
            .expect("row");

        let mut later = claimed(42, 100);
        later.claimed_at = 201;
        assert!(apply_claimed(Some(&row), &later, pos(3))
            .expect_err("conflict")
            .is_integrity());
    }

    #[test]
    fn test_claim_absent_reward() {
        let err = apply_claimed(None, &claimed(1, 5), pos(1)).expect_err("absent");
        assert!(err.is_invalid_transition());
    }

    #[test]
    fn test_claim_amount_or_recipient_mismatch() {
        let row = add(42, 100);
        assert!(apply_claimed(Some(&row), &claimed(42, 50), pos(2))
            .expect_err("amount")
            .is_integrity());

        let mut other = claimed(42, 100);
        other.recipient = "GSOMEONE".to_string();
        assert!(apply_claimed(Some(&row), &other, pos(2))
            .expect_err("recipient")
            .is_integrity());
    }

    #[test]
    fn test_claim_before_creation() {
        let row = apply_added(None, &contract(), &added(1, 10), pos(5))
            .expect("add")
            .into_write()
            .expect("row");
        assert!(apply_claimed(Some(&row), &claimed(1, 10), pos(4))
            .expect_err("stale")
            .is_integrity());
    }
}
