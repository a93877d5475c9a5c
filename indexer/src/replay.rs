//! Replay of the indexed-event log.
//!
//! Derived state is a pure function of the log: replaying a contract's
//! entries in position order from empty state reproduces its tables.

use tracing::{debug, warn};

use crate::error::IndexerError;
use crate::events::{ContractId, EventProcessor, IndexedEvent, RawEvent};
use crate::log::EventLog;
use crate::projection::ProjectionSnapshot;
use crate::storage::{MemoryStore, Store, StoreTx};

/// Replays log entries into a fresh in-memory store and returns the derived
/// rows.
///
/// Entries are sorted by position before replay.
///
/// # Errors
///
/// Returns [`IndexerError::ForeignEvent`] if an entry belongs to another
/// contract, or an error if processing fails.
pub async fn rebuild_snapshot(
    contract_id: &ContractId,
    entries: &[IndexedEvent],
) -> Result<ProjectionSnapshot, IndexerError> {
    let mut raw: Vec<RawEvent> = entries.iter().map(IndexedEvent::to_raw).collect();
    raw.sort_by_key(RawEvent::position);

    let store = MemoryStore::new();
    let mut tx = store.begin(contract_id).await?;
    let report = EventProcessor::new().process_batch(&mut tx, &raw).await?;
    tx.commit().await?;

    debug!(
        contract = %contract_id,
        entries = entries.len(),
        written = report.written,
        rejected = report.rejected.len(),
        "replayed log"
    );
    Ok(store.snapshot(contract_id).await?)
}

/// Returns true if a contract's derived rows in `store` are byte-identical
/// to a replay of its log.
///
/// # Errors
///
/// Returns an error if the store fails or the snapshots cannot be encoded.
pub async fn matches_log<S: Store>(
    store: &S,
    contract_id: &ContractId,
) -> Result<bool, IndexerError> {
    let entries = EventLog::entries(store, contract_id).await?;
    let rebuilt = rebuild_snapshot(contract_id, &entries).await?;
    let current = store.snapshot(contract_id).await?;

    let matches = rebuilt.to_canonical_json()? == current.to_canonical_json()?;
    if !matches {
        warn!(contract = %contract_id, "derived rows diverge from the indexed-event log");
    }
    Ok(matches)
}
