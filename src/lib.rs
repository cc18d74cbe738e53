//! # Trellis
//!
//! A sharded, edge-deployed graph database core. Shards batch triples
//! into immutable content-addressed chunk blobs and stream change events
//! to a per-namespace coordinator, which publishes self-describing
//! combined index files (POS, OSP, FTS, GEO, VEC) to blob storage. Thin
//! edge readers load exactly the sections they need via coalesced
//! byte-range requests.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use trellis::{
//!     CdcConfig, ChunkConfig, Coordinator, IndexReader, IndexType, MemoryBlobStore,
//!     ObjectValue, RetryConfig, Shard, WriteRequest,
//! };
//!
//! fn main() -> trellis::Result<()> {
//!     let store = Arc::new(MemoryBlobStore::new());
//!     let coordinator = Coordinator::new(store.clone(), CdcConfig::default(), RetryConfig::default());
//!
//!     let mut shard = Shard::new(
//!         "shard-A",
//!         "prod",
//!         store.clone(),
//!         &CdcConfig::default(),
//!         ChunkConfig::default(),
//!         0,
//!     );
//!     shard.connect(coordinator.connect())?;
//!
//!     shard.write(vec![WriteRequest {
//!         subject: "http://example.com/alice".into(),
//!         predicate: "name".into(),
//!         object: ObjectValue::String("Alice".into()),
//!         timestamp: 1,
//!         tx_id: None,
//!     }])?;
//!     shard.flush_cdc()?;
//!     coordinator.flush_namespace("prod")?;
//!
//!     let reader = IndexReader::new(store);
//!     let key = reader.latest_key("idx/prod/")?.expect("published index");
//!     let index = reader.load(&key, &[IndexType::Pos])?;
//!     assert!(index.pos.unwrap().subjects("name").is_some());
//!     Ok(())
//! }
//! ```

pub use trellis_cdc::{
    duplex, CdcBuffer, CdcEvent, ChannelEnd, Coordinator, CoordinatorStats, DurableWriter,
    ErrorEvent, FlushOutcome, IndexBuilder, SequencedEvent, Shard, ShardProducer,
    ShardRegistration, WireMessage, WriteRequest,
};
pub use trellis_chunk::{ChunkMeta, ChunkReader, ChunkStore};
pub use trellis_codec::{
    coalesce, cosine_similarity, decode_header, plan_range_requests, CombinedIndex, Compression,
    EncodeOptions, EntityEntry, EntityIndex, FtsIndex, GeoIndex, IndexHeader, IndexType, OspIndex,
    PosIndex, Posting, Quantization, QuantizedVectors, SectionRange, VectorEntry, VectorSection,
};
pub use trellis_core::{
    ApiError, CdcConfig, ChunkConfig, Error, ObjectType, ObjectValue, Result, RetryConfig, Triple,
    TxId, TxIdGenerator,
};
pub use trellis_store::{BlobStore, FsBlobStore, IndexReader, MemoryBlobStore};
