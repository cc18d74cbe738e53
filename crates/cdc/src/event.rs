//! CDC event model
//!
//! Events are immutable values describing one triple mutation. Every
//! event carries the producing shard's monotonically increasing sequence
//! number; a batch's sequence is the sequence of its last event.

use serde::{Deserialize, Serialize};
use trellis_core::{ObjectValue, Triple};

/// A change event for one triple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum CdcEvent {
    /// A new triple was written
    Insert {
        /// The written triple
        triple: Triple,
    },
    /// An existing (subject, predicate) binding changed value
    Update {
        /// The new row
        triple: Triple,
        /// The value being replaced
        previous: ObjectValue,
        /// Event-level timestamp (ns since epoch)
        #[serde(with = "trellis_core::wire_u64")]
        timestamp: u64,
    },
    /// A triple was tombstoned
    Delete {
        /// The tombstone row
        triple: Triple,
    },
}

impl CdcEvent {
    /// The triple the event is about.
    pub fn triple(&self) -> &Triple {
        match self {
            CdcEvent::Insert { triple }
            | CdcEvent::Update { triple, .. }
            | CdcEvent::Delete { triple } => triple,
        }
    }

    /// Short operation name for logging.
    pub fn op(&self) -> &'static str {
        match self {
            CdcEvent::Insert { .. } => "insert",
            CdcEvent::Update { .. } => "update",
            CdcEvent::Delete { .. } => "delete",
        }
    }
}

/// An event stamped with its shard-local sequence number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequencedEvent {
    /// Shard-local sequence; strictly increasing per shard
    #[serde(with = "trellis_core::wire_u64")]
    pub sequence: u64,
    /// The event payload
    #[serde(flatten)]
    pub event: CdcEvent,
}
