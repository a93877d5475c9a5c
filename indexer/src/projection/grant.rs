//! Vesting grants.
//!
//! A grant stays `active` across any number of partial claims and becomes
//! terminal on revocation.

use super::records::{GrantRecord, GrantStatus};
use super::{EntityRef, ProjectionError, Transition};
use crate::events::types::{ClaimEvent, GrantEvent, RevokeEvent};
use crate::events::{ContractId, EventTopic, Position};

/// Applies `GRANT`.
///
/// # Errors
///
/// Returns an integrity error if the grant already exists at a different
/// position or with different content.
pub fn apply_grant(
    current: Option<&GrantRecord>,
    contract_id: &ContractId,
    event: &GrantEvent,
    position: Position,
) -> Result<Transition<GrantRecord>, ProjectionError> {
    let entity = EntityRef::grant(event.grant_id);

    let Some(existing) = current else {
        return Ok(Transition::Write(GrantRecord {
            contract_id: contract_id.clone(),
            grant_id: event.grant_id,
            beneficiary: event.beneficiary.clone(),
            amount: event.amount,
            start_time: event.start_time,
            cliff_seconds: event.cliff_seconds,
            duration_seconds: event.duration_seconds,
            granted_at: event.granted_at,
            total_claimed: 0,
            claim_count: 0,
            status: GrantStatus::Active,
            revoked_at: None,
            unvested_amount: None,
            created_position: position,
            last_position: position,
        }));
    };

    if existing.created_position != position {
        return Err(ProjectionError::integrity(
            entity,
            format!("already granted at {}", existing.created_position),
        ));
    }

    let same_content = existing.beneficiary == event.beneficiary
        && existing.amount == event.amount
        && existing.start_time == event.start_time
        && existing.cliff_seconds == event.cliff_seconds
        && existing.duration_seconds == event.duration_seconds
        && existing.granted_at == event.granted_at;

    if same_content {
        Ok(Transition::Unchanged)
    } else {
        Err(ProjectionError::integrity(
            entity,
            "conflicting content at the same position",
        ))
    }
}

/// Checks the common preconditions of `CLAIM` and `REVOKE`.
///
/// Returns `Ok(None)` when the event at `position` was already applied,
/// which `applied` confirms against the stored row. The row keeps totals
/// only, so a replayed claim is matched on beneficiary and totals; the
/// indexed-event log rejects a different payload at the same position.
fn active_grant<'a>(
    current: Option<&'a GrantRecord>,
    entity: EntityRef,
    topic: EventTopic,
    position: Position,
    applied: impl FnOnce(&GrantRecord) -> bool,
) -> Result<Option<&'a GrantRecord>, ProjectionError> {
    let Some(existing) = current else {
        return Err(ProjectionError::invalid(entity, "absent", topic));
    };

    if existing.last_position == position {
        if applied(existing) {
            return Ok(None);
        }
        return Err(ProjectionError::integrity(
            entity,
            format!("{topic} conflicts with the event applied at {position}"),
        ));
    }

    if position < existing.last_position {
        return Err(ProjectionError::integrity(
            entity,
            format!(
                "event at {position} precedes last applied {}",
                existing.last_position
            ),
        ));
    }

    if existing.status == GrantStatus::Revoked {
        return Err(ProjectionError::invalid(
            entity,
            existing.status.as_str(),
            topic,
        ));
    }

    Ok(Some(existing))
}

/// Applies `CLAIM`.
///
/// # Errors
///
/// Returns an invalid-transition error if the grant is absent or revoked,
/// and an integrity error on a beneficiary mismatch or an over-claim.
pub fn apply_claim(
    current: Option<&GrantRecord>,
    event: &ClaimEvent,
    position: Position,
) -> Result<Transition<GrantRecord>, ProjectionError> {
    let entity = EntityRef::grant(event.grant_id);
    let applied = |row: &GrantRecord| {
        row.status == GrantStatus::Active
            && row.beneficiary == event.beneficiary
            && row.claim_count > 0
            && row.total_claimed >= event.amount
    };
    let Some(existing) = active_grant(current, entity, EventTopic::Claim, position, applied)?
    else {
        return Ok(Transition::Unchanged);
    };

    if existing.beneficiary != event.beneficiary {
        return Err(ProjectionError::integrity(
            entity,
            format!(
                "claimed by {} but granted to {}",
                event.beneficiary, existing.beneficiary
            ),
        ));
    }

    let total_claimed = existing
        .total_claimed
        .checked_add(event.amount)
        .filter(|total| *total <= existing.amount)
        .ok_or_else(|| {
            ProjectionError::integrity(
                entity,
                format!(
                    "claim of {} exceeds remaining {}",
                    event.amount,
                    existing.remaining()
                ),
            )
        })?;

    let claim_count = existing
        .claim_count
        .checked_add(1)
        .ok_or_else(|| ProjectionError::integrity(entity, "claim count overflow"))?;

    let mut next = existing.clone();
    next.total_claimed = total_claimed;
    next.claim_count = claim_count;
    next.last_position = position;

    Ok(Transition::Write(next))
}

/// Applies `REVOKE`.
///
/// # Errors
///
/// Returns an invalid-transition error if the grant is absent or already
/// revoked.
pub fn apply_revoke(
    current: Option<&GrantRecord>,
    event: &RevokeEvent,
    position: Position,
) -> Result<Transition<GrantRecord>, ProjectionError> {
    let entity = EntityRef::grant(event.grant_id);
    let applied = |row: &GrantRecord| {
        row.status == GrantStatus::Revoked
            && row.revoked_at == Some(event.revoked_at)
            && row.unvested_amount == Some(event.unvested_amount)
    };
    let Some(existing) = active_grant(current, entity, EventTopic::Revoke, position, applied)?
    else {
        return Ok(Transition::Unchanged);
    };

    let mut next = existing.clone();
    next.status = GrantStatus::Revoked;
    next.revoked_at = Some(event.revoked_at);
    next.unvested_amount = Some(event.unvested_amount);
    next.last_position = position;

    Ok(Transition::Write(next))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::testing::{contract, pos};

    fn grant_event(id: u64, amount: i128) -> GrantEvent {
        GrantEvent {
            grant_id: id,
            beneficiary: "GSTUDENT".to_string(),
            amount,
            start_time: 1_000,
            cliff_seconds: 100,
            duration_seconds: 1_000,
            granted_at: 900,
        }
    }

    fn claim_event(id: u64, amount: i128) -> ClaimEvent {
        ClaimEvent {
            grant_id: id,
            beneficiary: "GSTUDENT".to_string(),
            amount,
            claimed_at: 1_500,
        }
    }

    fn revoke_event(id: u64) -> RevokeEvent {
        RevokeEvent {
            grant_id: id,
            revoked_at: 1_600,
            unvested_amount: 40,
        }
    }

    fn granted(amount: i128) -> GrantRecord {
        apply_grant(None, &contract(), &grant_event(1, amount), pos(1))
            .expect("grant")
            .into_write()
            .expect("row")
    }

    #[test]
    fn test_grant_created_active() {
        let row = granted(100);
        assert_eq!(row.status, GrantStatus::Active);
        assert_eq!(row.total_claimed, 0);
        assert_eq!(row.remaining(), 100);
    }

    #[test]
    fn test_grant_duplicate_rules() {
        let row = granted(100);
        assert_eq!(
            apply_grant(Some(&row), &contract(), &grant_event(1, 100), pos(1)).expect("replay"),
            Transition::Unchanged
        );
        assert!(apply_grant(Some(&row), &contract(), &grant_event(1, 100), pos(2))
            .expect_err("moved")
            .is_integrity());
    }

    #[test]
    fn test_partial_claims_accumulate() {
        let row = granted(100);
        let row = apply_claim(Some(&row), &claim_event(1, 30), pos(2))
            .expect("claim")
            .into_write()
            .expect("row");
        let row = apply_claim(Some(&row), &claim_event(1, 30), pos(3))
            .expect("claim")
            .into_write()
            .expect("row");

        assert_eq!(row.total_claimed, 60);
        assert_eq!(row.claim_count, 2);
        assert_eq!(row.status, GrantStatus::Active);

        let replay = apply_claim(Some(&row), &claim_event(1, 30), pos(3)).expect("replay");
        assert_eq!(replay, Transition::Unchanged);
    }

    #[test]
    fn test_over_claim_rejected() {
        let row = granted(100);
        let row = apply_claim(Some(&row), &claim_event(1, 80), pos(2))
            .expect("claim")
            .into_write()
            .expect("row");

        let err = apply_claim(Some(&row), &claim_event(1, 21), pos(3)).expect_err("over");
        assert!(err.is_integrity());
    }

    #[test]
    fn test_claim_beneficiary_mismatch() {
        let row = granted(100);
        let mut event = claim_event(1, 10);
        event.beneficiary = "GOTHER".to_string();
        assert!(apply_claim(Some(&row), &event, pos(2))
            .expect_err("mismatch")
            .is_integrity());
    }

    #[test]
    fn test_revoke_is_terminal() {
        let row = granted(100);
        let row = apply_revoke(Some(&row), &revoke_event(1), pos(2))
            .expect("revoke")
            .into_write()
            .expect("row");

        assert_eq!(row.status, GrantStatus::Revoked);
        assert_eq!(row.revoked_at, Some(1_600));
        assert_eq!(row.unvested_amount, Some(40));

        let err = apply_claim(Some(&row), &claim_event(1, 1), pos(3)).expect_err("claim");
        assert_eq!(
            err,
            ProjectionError::invalid(EntityRef::grant(1), "revoked", EventTopic::Claim)
        );
        let err = apply_revoke(Some(&row), &revoke_event(1), pos(4)).expect_err("revoke");
        assert!(err.is_invalid_transition());

        let replay = apply_revoke(Some(&row), &revoke_event(1), pos(2)).expect("replay");
        assert_eq!(replay, Transition::Unchanged);
    }

    #[test]
    fn test_same_position_replay_must_match_row() {
        let row = granted(100);
        let claimed = apply_claim(Some(&row), &claim_event(1, 30), pos(2))
            .expect("claim")
            .into_write()
            .expect("row");

        let mut other = revoke_event(1);
        other.unvested_amount = 70;
        assert!(apply_revoke(Some(&claimed), &other, pos(2))
            .expect_err("revoke at claim position")
            .is_integrity());

        let mut stranger = claim_event(1, 30);
        stranger.beneficiary = "GOTHER".to_string();
        assert!(apply_claim(Some(&claimed), &stranger, pos(2))
            .expect_err("different beneficiary")
            .is_integrity());

        let revoked = apply_revoke(Some(&claimed), &revoke_event(1), pos(3))
            .expect("revoke")
            .into_write()
            .expect("row");
        let mut later = revoke_event(1);
        later.revoked_at = 1_700;
        assert!(apply_revoke(Some(&revoked), &later, pos(3))
            .expect_err("different timestamp")
            .is_integrity());
        assert!(apply_claim(Some(&revoked), &claim_event(1, 1), pos(3))
            .expect_err("claim at revoke position")
            .is_integrity());
    }

    #[test]
    fn test_events_on_absent_grant() {
        assert!(apply_claim(None, &claim_event(9, 1), pos(1))
            .expect_err("absent")
            .is_invalid_transition());
        assert!(apply_revoke(None, &revoke_event(9), pos(1))
            .expect_err("absent")
            .is_invalid_transition());
    }
}
