//! Proposal lifecycle.
//!
//! `pending` accumulates approvals until one of the terminal events
//! (`executed`, `rejected`, `cancelled`) is applied. Reaching the approval
//! threshold does not change the status; execution is a separate on-chain
//! action. Terminal proposals reject every further event.

use tracing::warn;

use super::records::{ProposalRecord, ProposalStatus};
use super::{EntityRef, ProjectionError, Transition};
use crate::events::types::ProposalCreated;
use crate::events::{ContractId, EventTopic, Position};

/// A state-changing action on an existing proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProposalAction {
    /// `PROPOSAL_APPROVED`.
    Approve,
    /// `PROPOSAL_REJECTED` at the given timestamp.
    Reject {
        /// On-chain timestamp.
        at: u64,
    },
    /// `PROPOSAL_CANCELLED` at the given timestamp.
    Cancel {
        /// On-chain timestamp.
        at: u64,
    },
    /// `PROPOSAL_EXECUTED` at the given timestamp.
    Execute {
        /// On-chain timestamp.
        at: u64,
    },
}

impl ProposalAction {
    /// Returns the topic of the event carrying this action.
    #[must_use]
    pub fn topic(&self) -> EventTopic {
        match self {
            Self::Approve => EventTopic::ProposalApproved,
            Self::Reject { .. } => EventTopic::ProposalRejected,
            Self::Cancel { .. } => EventTopic::ProposalCancelled,
            Self::Execute { .. } => EventTopic::ProposalExecuted,
        }
    }

    /// Returns true if `row` is the state this action leaves behind.
    ///
    /// Approvers are not stored, so an approval only checks the status; the
    /// indexed-event log rejects a different payload at the same position.
    #[must_use]
    pub fn is_reflected_in(&self, row: &ProposalRecord) -> bool {
        match *self {
            Self::Approve => row.status == ProposalStatus::Pending && row.current_approvals > 0,
            Self::Reject { at } => {
                row.status == ProposalStatus::Rejected && row.closed_at == Some(at)
            }
            Self::Cancel { at } => {
                row.status == ProposalStatus::Cancelled && row.closed_at == Some(at)
            }
            Self::Execute { at } => {
                row.status == ProposalStatus::Executed && row.closed_at == Some(at)
            }
        }
    }
}

/// Applies `PROPOSAL_CREATED`.
///
/// # Errors
///
/// Returns an integrity error if the proposal already exists at a different
/// position or with different content.
pub fn apply_created(
    current: Option<&ProposalRecord>,
    contract_id: &ContractId,
    event: &ProposalCreated,
    position: Position,
) -> Result<Transition<ProposalRecord>, ProjectionError> {
    let entity = EntityRef::proposal(event.proposal_id);

    let Some(existing) = current else {
        return Ok(Transition::Write(ProposalRecord {
            contract_id: contract_id.clone(),
            proposal_id: event.proposal_id,
            proposer: event.proposer.clone(),
            title: event.title.clone(),
            approval_threshold: event.approval_threshold,
            current_approvals: 0,
            status: ProposalStatus::Pending,
            created_at: event.created_at,
            closed_at: None,
            created_position: position,
            last_position: position,
        }));
    };

    if existing.created_position != position {
        return Err(ProjectionError::integrity(
            entity,
            format!("already created at {}", existing.created_position),
        ));
    }

    let same_content = existing.proposer == event.proposer
        && existing.title == event.title
        && existing.approval_threshold == event.approval_threshold
        && existing.created_at == event.created_at;

    if same_content {
        Ok(Transition::Unchanged)
    } else {
        Err(ProjectionError::integrity(
            entity,
            "conflicting content at the same position",
        ))
    }
}

/// Applies an approval or a terminal transition.
///
/// # Errors
///
/// Returns an invalid-transition error if the proposal does not exist or is
/// already terminal, and an integrity error if the event precedes the last
/// applied one, differs from the one applied at the same position, or the
/// approval count overflows.
pub fn apply_action(
    current: Option<&ProposalRecord>,
    proposal_id: u64,
    action: ProposalAction,
    position: Position,
) -> Result<Transition<ProposalRecord>, ProjectionError> {
    let entity = EntityRef::proposal(proposal_id);

    let Some(existing) = current else {
        return Err(ProjectionError::invalid(entity, "absent", action.topic()));
    };

    if existing.last_position == position {
        if action.is_reflected_in(existing) {
            return Ok(Transition::Unchanged);
        }
        return Err(ProjectionError::integrity(
            entity,
            format!("{} conflicts with the event applied at {position}", action.topic()),
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

    if existing.status.is_terminal() {
        return Err(ProjectionError::invalid(
            entity,
            existing.status.as_str(),
            action.topic(),
        ));
    }

    let mut next = existing.clone();
    next.last_position = position;

    match action {
        ProposalAction::Approve => {
            next.current_approvals = existing
                .current_approvals
                .checked_add(1)
                .ok_or_else(|| ProjectionError::integrity(entity, "approval count overflow"))?;
        }
        ProposalAction::Reject { at } => {
            next.status = ProposalStatus::Rejected;
            next.closed_at = Some(at);
        }
        ProposalAction::Cancel { at } => {
            next.status = ProposalStatus::Cancelled;
            next.closed_at = Some(at);
        }
        ProposalAction::Execute { at } => {
            if !existing.quorum_reached() {
                warn!(
                    contract = %existing.contract_id,
                    proposal_id,
                    approvals = existing.current_approvals,
                    threshold = existing.approval_threshold,
                    "proposal executed below approval threshold"
                );
            }
            next.status = ProposalStatus::Executed;
            next.closed_at = Some(at);
        }
    }

    Ok(Transition::Write(next))
}
