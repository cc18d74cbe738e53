//! Size limits enforced at the shard write boundary
//!
//! Violations result in `BadInput` errors before anything reaches the
//! CDC pipeline or the chunk store.

/// Maximum entity id (subject / REF target) length in bytes.
pub const MAX_ENTITY_ID_LEN: usize = 2048;

/// Maximum predicate length in bytes.
pub const MAX_PREDICATE_LEN: usize = 256;

/// Maximum encoded chunk payload size.
pub const MAX_CHUNK_BYTES: usize = 2 * 1024 * 1024;

/// Soft cap on triples per chunk.
pub const MAX_TRIPLES_PER_CHUNK: usize = 50_000;

/// Default CDC shard buffer capacity (oldest entries drop on overflow).
pub const DEFAULT_CDC_BUFFER_CAPACITY: usize = 1000;

/// Default per-namespace event count that triggers a coordinator flush.
pub const DEFAULT_FLUSH_THRESHOLD: usize = 1000;

/// Default gap (bytes) under which adjacent section ranges coalesce into
/// one byte-range request.
pub const DEFAULT_COALESCE_GAP: u64 = 4096;

/// Maximum namespace length assumed when estimating the header fetch range
/// of a combined index file.
pub const DEFAULT_MAX_NAMESPACE_LEN: usize = 256;

/// Maximum index count assumed when estimating the header fetch range.
pub const DEFAULT_MAX_INDEX_COUNT: usize = 10;
