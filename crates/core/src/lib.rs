//! Core data model for Trellis
//!
//! Triples, tagged object values, entity id validation, transaction ids,
//! size limits, runtime configuration, and the unified error type used
//! across the workspace.

pub mod config;
pub mod entity;
pub mod error;
pub mod limits;
pub mod triple;
pub mod txid;
pub mod wire;

pub use config::{CdcConfig, ChunkConfig, RetryConfig};
pub use entity::{validate_entity_id, validate_predicate};
pub use error::{ApiError, Error, Result};
pub use triple::{ObjectType, ObjectValue, Triple};
pub use txid::{TxId, TxIdGenerator};
pub use wire::{wire_i64, wire_u64};

/// Wall-clock milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}
