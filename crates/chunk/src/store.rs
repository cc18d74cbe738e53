//! Shard-side chunk store
//!
//! Individual triple rows are never the storage unit. Writes land in an
//! in-memory buffer; at a size or count threshold the buffer is swapped
//! out atomically and serialized to one content-addressed chunk blob. A
//! failed persist restores the swapped rows, so the next flush re-attempts
//! the same content.
//!
//! A queryable POS/OSP map is maintained in parallel with the buffer for
//! shard-local query paths; committed chunks are immutable.

use crate::chunk::{chunk_id, encode_chunk, ChunkMeta, ChunkReader};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};
use trellis_core::{ChunkConfig, Error, ObjectValue, Result, Triple};
use trellis_store::BlobStore;

/// Blob key for a chunk.
fn chunk_key(namespace: &str, id: &str) -> String {
    format!("chunk/{}/{}.gcol", namespace, id)
}

/// Rough encoded footprint of one triple, for the size trigger.
fn encoded_weight(t: &Triple) -> usize {
    let value_len = match &t.object {
        ObjectValue::Null => 0,
        ObjectValue::String(s) | ObjectValue::Ref(s) => s.len() + 2,
        ObjectValue::Int32(_) => 4,
        ObjectValue::Int64(_) | ObjectValue::Float64(_) => 8,
        ObjectValue::Bool(_) => 1,
        ObjectValue::Timestamp(_) => 9,
        ObjectValue::GeoPoint { .. } => 16,
        ObjectValue::Binary(b) => b.len() + 2,
    };
    t.subject.len() + t.predicate.len() + value_len + 16 + 12
}

/// Shard-local query maps kept alongside the chunk table.
#[derive(Debug, Default)]
struct QueryIndex {
    /// predicate → subjects
    pos: BTreeMap<String, BTreeSet<String>>,
    /// object ref → referring subjects
    osp: BTreeMap<String, BTreeSet<String>>,
}

impl QueryIndex {
    fn insert(&mut self, t: &Triple) {
        self.pos
            .entry(t.predicate.clone())
            .or_default()
            .insert(t.subject.clone());
        if let ObjectValue::Ref(target) = &t.object {
            self.osp
                .entry(target.clone())
                .or_default()
                .insert(t.subject.clone());
        }
    }
}

struct Buffer {
    rows: Vec<Triple>,
    bytes: usize,
}

/// The shard's chunk store: write buffer plus the committed chunk table.
pub struct ChunkStore {
    namespace: String,
    config: ChunkConfig,
    store: Arc<dyn BlobStore>,
    buffer: Mutex<Buffer>,
    /// One-slot flag: a flush serializes outside the buffer lock, and a
    /// second flush during that window waits for the first to finish.
    flushing: Mutex<()>,
    metas: Mutex<Vec<ChunkMeta>>,
    query: Mutex<QueryIndex>,
}

impl ChunkStore {
    /// A store for one namespace over the given backend.
    pub fn new(namespace: impl Into<String>, store: Arc<dyn BlobStore>, config: ChunkConfig) -> Self {
        ChunkStore {
            namespace: namespace.into(),
            config,
            store,
            buffer: Mutex::new(Buffer {
                rows: Vec::new(),
                bytes: 0,
            }),
            flushing: Mutex::new(()),
            metas: Mutex::new(Vec::new()),
            query: Mutex::new(QueryIndex::default()),
        }
    }

    /// Buffer triples; flushes when a threshold trips.
    ///
    /// Returns metadata when this write triggered a chunk flush.
    pub fn write(&self, triples: Vec<Triple>) -> Result<Option<ChunkMeta>> {
        if triples.is_empty() {
            return Ok(None);
        }
        {
            let mut query = self.query.lock();
            for t in &triples {
                query.insert(t);
            }
        }
        let should_flush = {
            let mut buffer = self.buffer.lock();
            for t in &triples {
                buffer.bytes += encoded_weight(t);
            }
            buffer.rows.extend(triples);
            buffer.bytes >= self.config.max_bytes || buffer.rows.len() >= self.config.max_triples
        };
        if should_flush {
            self.flush()
        } else {
            Ok(None)
        }
    }

    /// Serialize the buffered rows into one chunk blob.
    ///
    /// The buffer is swapped atomically; serialization and the blob put
    /// run without blocking new writes. On failure the swapped rows are
    /// restored ahead of anything buffered meanwhile.
    pub fn flush(&self) -> Result<Option<ChunkMeta>> {
        let _guard = self.flushing.lock();

        let taken = {
            let mut buffer = self.buffer.lock();
            if buffer.rows.is_empty() {
                return Ok(None);
            }
            buffer.bytes = 0;
            std::mem::take(&mut buffer.rows)
        };

        match self.persist(&taken) {
            Ok(meta) => {
                info!(
                    target: "trellis::chunk",
                    namespace = %self.namespace,
                    chunk_id = %meta.chunk_id,
                    triples = meta.triple_count,
                    bytes = meta.size_bytes,
                    "chunk flushed"
                );
                self.metas.lock().push(meta.clone());
                Ok(Some(meta))
            }
            Err(e) => {
                // Restore in front of rows written during the flush, so
                // the next flush re-attempts the same content first.
                let mut buffer = self.buffer.lock();
                let mut restored = taken;
                let weight: usize = restored.iter().map(encoded_weight).sum();
                restored.append(&mut buffer.rows);
                buffer.rows = restored;
                buffer.bytes += weight;
                warn!(
                    target: "trellis::chunk",
                    namespace = %self.namespace,
                    error = %e,
                    pending = buffer.rows.len(),
                    "chunk flush failed, buffer preserved"
                );
                Err(e)
            }
        }
    }

    fn persist(&self, rows: &[Triple]) -> Result<ChunkMeta> {
        let blob = encode_chunk(rows)?;
        if blob.len() > self.config.max_bytes * 2 {
            // A single write burst can overshoot the threshold, but a blob
            // at twice the limit means the caller bypassed write().
            return Err(Error::bad_input(format!(
                "chunk payload {} exceeds limit",
                blob.len()
            )));
        }
        let id = chunk_id(&blob);
        let key = chunk_key(&self.namespace, &id);

        // Content-addressed: an existing blob with this id is this blob.
        if self.store.head(&key).is_err() {
            self.store.put(&key, &blob)?;
        } else {
            debug!(target: "trellis::chunk", chunk_id = %id, "duplicate chunk collapsed");
        }

        let min_timestamp = rows.iter().map(|t| t.timestamp).min().unwrap_or(0);
        let max_timestamp = rows.iter().map(|t| t.timestamp).max().unwrap_or(0);
        Ok(ChunkMeta {
            chunk_id: id,
            namespace: self.namespace.clone(),
            triple_count: rows.len(),
            min_timestamp,
            max_timestamp,
            size_bytes: blob.len(),
            created_at: trellis_core::now_ms(),
        })
    }

    /// Read a committed chunk back.
    ///
    /// A blob that fails validation (truncated write, checksum mismatch)
    /// is treated as absent.
    pub fn read_chunk(&self, chunk_id: &str) -> Result<Vec<Triple>> {
        let key = chunk_key(&self.namespace, chunk_id);
        let blob = self.store.get(&key)?;
        match ChunkReader::open(&blob) {
            Ok(reader) => reader.triples(),
            Err(e) => {
                warn!(
                    target: "trellis::chunk",
                    chunk_id,
                    error = %e,
                    "chunk failed validation, treating as absent"
                );
                Err(Error::NotFound(format!("chunk {}", chunk_id)))
            }
        }
    }

    /// One entity's rows from a committed chunk, via the entity index.
    pub fn read_entity(&self, chunk_id: &str, entity_id: &str) -> Result<Vec<Triple>> {
        let key = chunk_key(&self.namespace, chunk_id);
        let blob = self.store.get(&key)?;
        let reader = ChunkReader::open(&blob)
            .map_err(|_| Error::NotFound(format!("chunk {}", chunk_id)))?;
        reader.entity(entity_id)
    }

    /// Metadata of every chunk committed by this store.
    pub fn metas(&self) -> Vec<ChunkMeta> {
        self.metas.lock().clone()
    }

    /// Buffered rows not yet flushed.
    pub fn pending_count(&self) -> usize {
        self.buffer.lock().rows.len()
    }

    /// Estimated encoded bytes of the buffered rows.
    pub fn pending_bytes(&self) -> usize {
        self.buffer.lock().bytes
    }

    /// Subjects carrying `predicate`, from the parallel query maps.
    pub fn subjects_by_predicate(&self, predicate: &str) -> Vec<String> {
        self.query
            .lock()
            .pos
            .get(predicate)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Subjects referring to `object`, from the parallel query maps.
    pub fn referrers_of(&self, object: &str) -> Vec<String> {
        self.query
            .lock()
            .osp
            .get(object)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::TxIdGenerator;
    use trellis_store::{FailureMode, FlakyStore, MemoryBlobStore};

    fn triples(n: usize, offset: usize) -> Vec<Triple> {
        let mut gen = TxIdGenerator::new();
        (0..n)
            .map(|i| {
                Triple::new(
                    format!("http://x/{}", offset + i),
                    "value",
                    ObjectValue::Int32((offset + i) as i32),
                    1000 + (offset + i) as u64,
                    gen.next().unwrap(),
                )
                .unwrap()
            })
            .collect()
    }

    fn small_config() -> ChunkConfig {
        ChunkConfig {
            max_bytes: 1024 * 1024,
            max_triples: 100,
        }
    }

    #[test]
    fn test_write_buffers_until_flush() {
        let store = ChunkStore::new("ns", Arc::new(MemoryBlobStore::new()), small_config());
        store.write(triples(10, 0)).unwrap();
        assert_eq!(store.pending_count(), 10);
        assert!(store.metas().is_empty());

        let meta = store.flush().unwrap().unwrap();
        assert_eq!(meta.triple_count, 10);
        assert_eq!(store.pending_count(), 0);
        assert_eq!(store.metas().len(), 1);
    }

    #[test]
    fn test_count_threshold_triggers_flush() {
        let store = ChunkStore::new("ns", Arc::new(MemoryBlobStore::new()), small_config());
        let meta = store.write(triples(100, 0)).unwrap();
        assert!(meta.is_some());
        assert_eq!(store.pending_count(), 0);
    }

    #[test]
    fn test_empty_flush_is_noop_without_io() {
        let blob_store = Arc::new(MemoryBlobStore::new());
        let store = ChunkStore::new("ns", blob_store.clone(), small_config());
        assert!(store.flush().unwrap().is_none());
        assert_eq!(blob_store.put_count(), 0);
    }

    #[test]
    fn test_flush_round_trips_through_blob() {
        let store = ChunkStore::new("ns", Arc::new(MemoryBlobStore::new()), small_config());
        let rows = triples(20, 0);
        store.write(rows.clone()).unwrap();
        let meta = store.flush().unwrap().unwrap();

        let mut read = store.read_chunk(&meta.chunk_id).unwrap();
        read.sort_by(|a, b| a.subject.cmp(&b.subject));
        let mut want = rows;
        want.sort_by(|a, b| a.subject.cmp(&b.subject));
        assert_eq!(read, want);
    }

    #[test]
    fn test_failed_flush_preserves_buffer() {
        let inner = Arc::new(MemoryBlobStore::new());
        let flaky = Arc::new(FlakyStore::new(inner));
        let store = ChunkStore::new("ns", flaky.clone(), small_config());

        store.write(triples(5, 0)).unwrap();
        flaky.set_mode(FailureMode::AlwaysTransient);
        assert!(store.flush().is_err());
        assert_eq!(store.pending_count(), 5);

        // Same content persists once the backend recovers.
        flaky.set_mode(FailureMode::None);
        let meta = store.flush().unwrap().unwrap();
        assert_eq!(meta.triple_count, 5);
        assert_eq!(store.pending_count(), 0);
    }

    #[test]
    fn test_duplicate_chunks_collapse() {
        let blob_store = Arc::new(MemoryBlobStore::new());
        let store = ChunkStore::new("ns", blob_store.clone(), small_config());
        let rows = triples(5, 0);

        store.write(rows.clone()).unwrap();
        store.flush().unwrap().unwrap();
        store.write(rows).unwrap();
        let meta = store.flush().unwrap().unwrap();

        assert_eq!(store.metas().len(), 2);
        assert_eq!(blob_store.len(), 1);
        assert_eq!(store.metas()[0].chunk_id, meta.chunk_id);
    }

    #[test]
    fn test_corrupt_chunk_is_treated_absent() {
        let blob_store = Arc::new(MemoryBlobStore::new());
        let store = ChunkStore::new("ns", blob_store.clone(), small_config());
        store.write(triples(5, 0)).unwrap();
        let meta = store.flush().unwrap().unwrap();

        let key = format!("chunk/ns/{}.gcol", meta.chunk_id);
        let mut blob = blob_store.get(&key).unwrap();
        blob.truncate(blob.len() / 2);
        blob_store.put(&key, &blob).unwrap();

        assert!(matches!(
            store.read_chunk(&meta.chunk_id),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_entity_point_read_from_chunk() {
        let store = ChunkStore::new("ns", Arc::new(MemoryBlobStore::new()), small_config());
        store.write(triples(10, 0)).unwrap();
        let meta = store.flush().unwrap().unwrap();
        let rows = store.read_entity(&meta.chunk_id, "http://x/3").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].subject, "http://x/3");
    }

    #[test]
    fn test_parallel_query_maps() {
        let store = ChunkStore::new("ns", Arc::new(MemoryBlobStore::new()), small_config());
        let mut gen = TxIdGenerator::new();
        store
            .write(vec![
                Triple::new(
                    "http://x/a",
                    "knows",
                    ObjectValue::Ref("http://x/b".into()),
                    1,
                    gen.next().unwrap(),
                )
                .unwrap(),
                Triple::new(
                    "http://x/c",
                    "knows",
                    ObjectValue::Ref("http://x/b".into()),
                    2,
                    gen.next().unwrap(),
                )
                .unwrap(),
            ])
            .unwrap();

        assert_eq!(
            store.subjects_by_predicate("knows"),
            vec!["http://x/a".to_string(), "http://x/c".to_string()]
        );
        assert_eq!(
            store.referrers_of("http://x/b"),
            vec!["http://x/a".to_string(), "http://x/c".to_string()]
        );
        assert!(store.subjects_by_predicate("missing").is_empty());
    }
}
