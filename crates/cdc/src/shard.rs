//! Shard write surface
//!
//! Composes the chunk store and the CDC producer: every accepted triple
//! mutation lands in the write buffer for chunking and appends an event to
//! the CDC buffer in the same step, so CDC order equals write order equals
//! sequence order within the shard.

use crate::channel::ChannelEnd;
use crate::event::CdcEvent;
use crate::producer::ShardProducer;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use trellis_chunk::ChunkStore;
use trellis_core::{
    ApiError, CdcConfig, ChunkConfig, ObjectValue, Result, Triple, TxId, TxIdGenerator,
};
use trellis_store::BlobStore;

/// One write accepted from the thin HTTP layer.
#[derive(Debug, Clone, Deserialize)]
pub struct WriteRequest {
    /// Subject URL
    pub subject: String,
    /// Predicate identifier
    pub predicate: String,
    /// Object value
    pub object: ObjectValue,
    /// Row timestamp (ns since epoch)
    #[serde(with = "trellis_core::wire_u64")]
    pub timestamp: u64,
    /// Transaction id; drawn from the shard's generator when absent
    #[serde(default)]
    pub tx_id: Option<String>,
}

/// A single shard: one writer, one namespace partition.
pub struct Shard {
    id: String,
    chunks: ChunkStore,
    producer: ShardProducer,
    txids: TxIdGenerator,
    /// (subject, predicate) → current value, for insert/update/delete
    /// classification on the CDC stream
    bindings: HashMap<(String, String), ObjectValue>,
}

impl Shard {
    /// Open a shard over the given blob store.
    ///
    /// `last_acked` is the persisted CDC watermark to resume from.
    pub fn new(
        id: impl Into<String>,
        namespace: impl Into<String>,
        store: Arc<dyn BlobStore>,
        cdc_config: &CdcConfig,
        chunk_config: ChunkConfig,
        last_acked: u64,
    ) -> Self {
        let id = id.into();
        let namespace = namespace.into();
        Shard {
            chunks: ChunkStore::new(namespace.clone(), store, chunk_config),
            producer: ShardProducer::new(id.clone(), namespace, cdc_config, last_acked),
            txids: TxIdGenerator::new(),
            bindings: HashMap::new(),
            id,
        }
    }

    /// Shard id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Apply a batch of writes.
    ///
    /// Every request is validated before any is applied; the first invalid
    /// entry rejects the whole batch so a retry is exact.
    pub fn write(&mut self, requests: Vec<WriteRequest>) -> Result<usize> {
        let mut triples = Vec::with_capacity(requests.len());
        for request in requests {
            let tx_id = match &request.tx_id {
                Some(raw) => TxId::parse(raw)?,
                None => self.txids.next()?,
            };
            triples.push(Triple::new(
                request.subject,
                request.predicate,
                request.object,
                request.timestamp,
                tx_id,
            )?);
        }

        for triple in &triples {
            let key = (triple.subject.clone(), triple.predicate.clone());
            let event = if triple.object.is_tombstone() {
                self.bindings.remove(&key);
                CdcEvent::Delete {
                    triple: triple.clone(),
                }
            } else {
                match self.bindings.insert(key, triple.object.clone()) {
                    Some(previous) => CdcEvent::Update {
                        triple: triple.clone(),
                        previous,
                        timestamp: triple.timestamp,
                    },
                    None => CdcEvent::Insert {
                        triple: triple.clone(),
                    },
                }
            };
            self.producer.record(event);
        }

        let count = triples.len();
        self.chunks.write(triples)?;
        Ok(count)
    }

    /// Validate-and-apply, mapping failures to the structured API error.
    pub fn write_checked(
        &mut self,
        requests: Vec<WriteRequest>,
    ) -> std::result::Result<usize, ApiError> {
        self.write(requests)
            .map_err(|e| ApiError::from_error(&e, None))
    }

    /// Tombstone a (subject, predicate) binding.
    pub fn delete(
        &mut self,
        subject: impl Into<String>,
        predicate: impl Into<String>,
        timestamp: u64,
    ) -> Result<()> {
        self.write(vec![WriteRequest {
            subject: subject.into(),
            predicate: predicate.into(),
            object: ObjectValue::Null,
            timestamp,
            tx_id: None,
        }])?;
        Ok(())
    }

    /// Attach the CDC channel toward a coordinator.
    pub fn connect(&mut self, channel: ChannelEnd) -> Result<()> {
        self.producer.connect(channel)
    }

    /// Stream buffered events to the coordinator.
    pub fn flush_cdc(&mut self) -> Result<usize> {
        self.producer.flush()
    }

    /// Access the CDC producer (acks, watermarks, reconnect).
    pub fn producer(&mut self) -> &mut ShardProducer {
        &mut self.producer
    }

    /// Access the chunk store (flush, point reads).
    pub fn chunks(&self) -> &ChunkStore {
        &self.chunks
    }
}
