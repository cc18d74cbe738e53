//! Change-data-capture pipeline
//!
//! Sequence-ordered event batches stream from shards to a coordinator
//! over persistent bidirectional channels; the coordinator coalesces them
//! per namespace and the durable writer publishes event logs and combined
//! index generations to blob storage, acknowledging each shard with its
//! new high watermark. Delivery is at-least-once with dedup by sequence;
//! no failure path discards unacknowledged events.

pub mod batch_log;
pub mod buffer;
pub mod channel;
pub mod coordinator;
pub mod event;
pub mod index_build;
pub mod producer;
pub mod shard;
pub mod wire;
pub mod writer;

pub use buffer::CdcBuffer;
pub use channel::{duplex, ChannelEnd};
pub use coordinator::{Coordinator, CoordinatorStats, ShardRegistration};
pub use event::{CdcEvent, SequencedEvent};
pub use index_build::IndexBuilder;
pub use producer::ShardProducer;
pub use shard::{Shard, WriteRequest};
pub use wire::WireMessage;
pub use writer::{DurableWriter, ErrorEvent, FlushOutcome};
