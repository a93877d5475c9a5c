//! Trade projection. Trades are immutable once recorded.

use super::records::TradeRecord;
use super::{EntityRef, ProjectionError, Transition};
use crate::events::types::TradeExecuted;
use crate::events::{ContractId, Position};

/// Applies `TRADE_EXECUTED`.
///
/// # Errors
///
/// Returns an integrity error if the trade ID is already recorded at a
/// different position, or with different content at the same position.
pub fn apply(
    current: Option<&TradeRecord>,
    contract_id: &ContractId,
    event: &TradeExecuted,
    position: Position,
) -> Result<Transition<TradeRecord>, ProjectionError> {
    let entity = EntityRef::trade(event.trade_id);
    let candidate = TradeRecord {
        contract_id: contract_id.clone(),
        trade_id: event.trade_id,
        maker: event.maker.clone(),
        taker: event.taker.clone(),
        base_asset: event.base_asset.clone(),
        quote_asset: event.quote_asset.clone(),
        base_amount: event.base_amount,
        quote_amount: event.quote_amount,
        executed_at: event.executed_at,
        position,
    };

    match current {
        None => Ok(Transition::Write(candidate)),
        Some(existing) if existing.position != position => Err(ProjectionError::integrity(
            entity,
            format!("already recorded at {}", existing.position),
        )),
        Some(existing) if *existing == candidate => Ok(Transition::Unchanged),
        Some(_) => Err(ProjectionError::integrity(
            entity,
            "conflicting content at the same position",
        )),
    }
}
