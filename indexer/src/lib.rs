//! Academy Indexer - Off-chain indexing of Academy contract events.
//!
//! This crate consumes raw contract events, keeps an append-only log of
//! every observed event and projects them into queryable tables for trades,
//! governance proposals, social rewards and vesting grants. Each contract is
//! indexed exactly once and in ledger order, with its checkpoint committed
//! atomically alongside the derived rows.
//!
//! # Components
//!
//! - [`events`]: Classification, decoding and batch processing
//! - [`projection`]: Entity state machines
//! - [`checkpoint`]: Per-contract progress tracking
//! - [`log`]: Indexed-event log
//! - [`replay`]: Rebuilding derived rows from the log
//! - [`storage`]: Transactional stores (in-memory and Postgres)
//! - [`source`]: Event sources
//! - [`service`]: Main indexer service
//! - [`config`]: Indexer configuration
//! - [`retry`]: Backoff policy for transient errors
//! - [`error`]: Top-level errors

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod events;
pub mod log;
pub mod projection;
pub mod replay;
pub mod retry;
pub mod service;
pub mod source;
pub mod storage;

pub use checkpoint::{Checkpoint, CheckpointTracker};
pub use config::{ConfigError, IndexerConfig};
pub use error::{EventContext, IndexerError};
pub use events::{
    BatchReport, ContractId, DecodedEvent, EventProcessor, EventTopic, IndexedEvent,
    IndexerMetrics, Position, RawEvent, TxHash,
};
pub use log::EventLog;
pub use projection::{ProjectionEngine, ProjectionError, ProjectionSnapshot};
pub use retry::RetryPolicy;
pub use service::{Indexer, WorkerExit, WorkerReport};
pub use source::{EventSource, MemorySource, SourceError};
pub use storage::{MemoryStore, PgStore, StorageError, Store, StoreTx};
