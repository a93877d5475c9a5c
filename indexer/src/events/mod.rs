//! Event handling.
//!
//! Classification, decoding and batch processing of raw contract events.
//!
//! # Components
//!
//! - [`topic`]: Topic classifier
//! - [`position`]: Contract IDs and event positions
//! - [`int`]: Integer field deserialization
//! - [`types`]: Raw, decoded and indexed event types
//! - [`decoder`]: Payload decoder
//! - [`processor`]: Batch processor
//! - [`metrics`]: Indexer metrics

pub mod decoder;
pub mod int;
pub mod metrics;
pub mod position;
pub mod processor;
pub mod topic;
pub mod types;

pub use decoder::{decode, DecodeError};
pub use metrics::{IndexerMetrics, MetricsSnapshot};
pub use position::{ContractId, Position, PositionKeyError, TxHash};
pub use processor::{BatchReport, EventProcessor};
pub use topic::EventTopic;
pub use types::{DecodedEvent, IndexedEvent, RawEvent};
