//! Event sources.
//!
//! The ledger/RPC client lives outside this crate. Workers pull raw events
//! through [`EventSource`]; [`MemorySource`] serves tests and JSON-lines
//! event files.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::info;

use crate::events::{ContractId, Position, RawEvent};

/// Event source errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    /// The source is temporarily unreachable.
    #[error("event source unavailable: {0}")]
    Unavailable(String),

    /// A line of an events file is not a valid raw event.
    #[error("invalid event on line {line}: {reason}")]
    InvalidLine {
        /// 1-based line number.
        line: usize,
        /// Parse error.
        reason: String,
    },

    /// Reading an events file failed.
    #[error("failed to read events: {0}")]
    Io(String),
}

impl SourceError {
    /// Returns true if fetching again may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Pull-based source of raw events, at-least-once.
#[async_trait]
pub trait EventSource: Send + Sync + 'static {
    /// Returns up to `limit` events of `contract_id` positioned after
    /// `after`, in position order.
    async fn fetch(
        &self,
        contract_id: &ContractId,
        after: Option<&Position>,
        limit: usize,
    ) -> Result<Vec<RawEvent>, SourceError>;
}

/// In-memory [`EventSource`].
///
/// Duplicate deliveries are kept, so redelivery can be simulated by pushing
/// the same event twice.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    events: Arc<RwLock<HashMap<ContractId, Vec<RawEvent>>>>,
}

impl MemorySource {
    /// Creates an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a source holding `events`.
    #[must_use]
    pub fn with_events(events: impl IntoIterator<Item = RawEvent>) -> Self {
        let mut by_contract: HashMap<ContractId, Vec<RawEvent>> = HashMap::new();
        for event in events {
            by_contract
                .entry(event.contract_id.clone())
                .or_default()
                .push(event);
        }
        Self {
            events: Arc::new(RwLock::new(by_contract)),
        }
    }

    /// Parses one JSON-encoded [`RawEvent`] per line. Blank lines are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::InvalidLine`] for the first line that fails to
    /// parse.
    pub fn from_json_lines(input: &str) -> Result<Self, SourceError> {
        let events = input
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(index, line)| {
                serde_json::from_str::<RawEvent>(line).map_err(|e| SourceError::InvalidLine {
                    line: index + 1,
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self::with_events(events))
    }

    /// Loads a JSON-lines events file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let path = path.as_ref();
        let input = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| SourceError::Io(format!("{}: {e}", path.display())))?;
        let source = Self::from_json_lines(&input)?;
        info!(path = %path.display(), events = source.len().await, "loaded events file");
        Ok(source)
    }

    /// Appends an event.
    pub async fn push(&self, event: RawEvent) {
        self.events
            .write()
            .await
            .entry(event.contract_id.clone())
            .or_default()
            .push(event);
    }

    /// Appends several events.
    pub async fn extend(&self, events: impl IntoIterator<Item = RawEvent>) {
        let mut guard = self.events.write().await;
        for event in events {
            guard.entry(event.contract_id.clone()).or_default().push(event);
        }
    }

    /// Returns the contracts with at least one event, sorted.
    pub async fn contracts(&self) -> Vec<ContractId> {
        let mut contracts: Vec<ContractId> = self.events.read().await.keys().cloned().collect();
        contracts.sort();
        contracts
    }

    /// Returns the number of stored events.
    pub async fn len(&self) -> usize {
        self.events.read().await.values().map(Vec::len).sum()
    }

    /// Returns true if no events are stored.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl EventSource for MemorySource {
    async fn fetch(
        &self,
        contract_id: &ContractId,
        after: Option<&Position>,
        limit: usize,
    ) -> Result<Vec<RawEvent>, SourceError> {
        let guard = self.events.read().await;
        let Some(events) = guard.get(contract_id) else {
            return Ok(Vec::new());
        };

        let mut selected: Vec<RawEvent> = events
            .iter()
            .filter(|event| after.map_or(true, |after| event.position() > *after))
            .cloned()
            .collect();
        selected.sort_by_key(RawEvent::position);
        selected.truncate(limit);
        Ok(selected)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    use super::*;
    use crate::events::TxHash;

    fn event(contract: &str, ledger: u32) -> RawEvent {
        RawEvent {
            contract_id: ContractId::new(contract),
            topic: "TRADE_EXECUTED".to_string(),
            payload: json!({"trade_id": ledger}),
            ledger,
            ledger_closed_at: Utc.timestamp_opt(1_700_000_000, 0).single().expect("ts"),
            tx_hash: TxHash::new([1u8; 32]),
            event_index: 0,
        }
    }

    #[tokio::test]
    async fn test_fetch_after_in_order() {
        let source = MemorySource::with_events([event("CA", 3), event("CA", 1), event("CA", 2)]);
        let contract = ContractId::new("CA");

        let all = source.fetch(&contract, None, 10).await.expect("fetch");
        let ledgers: Vec<u32> = all.iter().map(|e| e.ledger).collect();
        assert_eq!(ledgers, vec![1, 2, 3]);

        let after = all[0].position();
        let rest = source.fetch(&contract, Some(&after), 1).await.expect("fetch");
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].ledger, 2);
    }

    #[tokio::test]
    async fn test_fetch_unknown_contract() {
        let source = MemorySource::new();
        assert!(source.is_empty().await);
        let events = source
            .fetch(&ContractId::new("CX"), None, 10)
            .await
            .expect("fetch");
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_push_keeps_duplicates() {
        let source = MemorySource::new();
        source.push(event("CA", 1)).await;
        source.push(event("CA", 1)).await;
        source.extend([event("CB", 1)]).await;

        assert_eq!(source.len().await, 3);
        assert_eq!(
            source.contracts().await,
            vec![ContractId::new("CA"), ContractId::new("CB")]
        );
        let events = source
            .fetch(&ContractId::new("CA"), None, 10)
            .await
            .expect("fetch");
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn test_from_json_lines() {
        let lines = [event("CA", 1), event("CB", 2)]
            .iter()
            .map(|e| serde_json::to_string(e).expect("json"))
            .collect::<Vec<_>>()
            .join("\n\n");

        let source = MemorySource::from_json_lines(&lines).expect("parse");
        assert_eq!(source.len().await, 2);

        let err = MemorySource::from_json_lines("{\"contract_id\": 1}").expect_err("invalid");
        assert!(matches!(err, SourceError::InvalidLine { line: 1, .. }));
        assert!(!err.is_transient());
    }
}
