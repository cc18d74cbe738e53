//! Chunked BLOB triple storage
//!
//! The shard-side persistence layer: triples batch into ≤2 MiB
//! content-addressed chunk blobs (GraphCol stream + entity offset index)
//! instead of per-row storage.

pub mod chunk;
pub mod store;

pub use chunk::{chunk_id, encode_chunk, ChunkMeta, ChunkReader};
pub use store::ChunkStore;
