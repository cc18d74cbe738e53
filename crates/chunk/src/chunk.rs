//! Chunk blob encoding
//!
//! A chunk is an immutable blob holding up to ~50,000 triples: a GraphCol
//! column stream followed by the entity offset index over its subjects,
//! with a 4-byte index-length trailer so readers can locate the index
//! from the end.
//!
//! ```text
//! [GraphCol stream]           — CRC-guarded (see trellis_codec::graphcol)
//! [entity offset index]       — CRC-guarded (see trellis_codec::entity_index)
//! [index_len u32 LE]
//! ```
//!
//! Chunks are content-addressed: the chunk id is the SHA-256 of the full
//! blob, so identical payloads collapse to one stored object.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use trellis_codec::entity_index::EntityIndex;
use trellis_codec::graphcol::{self, GraphColReader};
use trellis_core::{Error, Result, Triple};

/// Metadata recorded for each persisted chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMeta {
    /// Content address (SHA-256 hex of the blob)
    pub chunk_id: String,
    /// Namespace the triples belong to
    pub namespace: String,
    /// Rows in the chunk
    pub triple_count: usize,
    /// Smallest row timestamp
    #[serde(with = "trellis_core::wire_u64")]
    pub min_timestamp: u64,
    /// Largest row timestamp
    #[serde(with = "trellis_core::wire_u64")]
    pub max_timestamp: u64,
    /// Blob size in bytes
    pub size_bytes: usize,
    /// Wall-clock creation time (ms since epoch)
    #[serde(with = "trellis_core::wire_u64")]
    pub created_at: u64,
}

/// Encode triples into a chunk blob.
pub fn encode_chunk(triples: &[Triple]) -> Result<Vec<u8>> {
    let (stream, index) = graphcol::encode(triples)?;
    let index_bytes = index.encode();
    let mut blob = stream;
    blob.extend_from_slice(&index_bytes);
    blob.extend_from_slice(&(index_bytes.len() as u32).to_le_bytes());
    Ok(blob)
}

/// Content address of a chunk blob.
pub fn chunk_id(blob: &[u8]) -> String {
    let digest = Sha256::digest(blob);
    let mut hex = String::with_capacity(64);
    for byte in digest {
        let _ = write!(hex, "{:02x}", byte);
    }
    hex
}

/// A decoded, validated chunk.
pub struct ChunkReader<'a> {
    stream: GraphColReader<'a>,
    index: EntityIndex,
}

impl<'a> ChunkReader<'a> {
    /// Open a chunk blob, validating both embedded checksums.
    pub fn open(blob: &'a [u8]) -> Result<Self> {
        if blob.len() < 4 {
            return Err(Error::corrupt("chunk shorter than trailer"));
        }
        let index_len =
            u32::from_le_bytes(blob[blob.len() - 4..].try_into().unwrap()) as usize;
        let stream_len = blob
            .len()
            .checked_sub(4 + index_len)
            .ok_or_else(|| Error::corrupt("chunk index length exceeds blob"))?;
        let index = EntityIndex::decode(&blob[stream_len..blob.len() - 4])?;
        let stream = GraphColReader::new(&blob[..stream_len])?;
        Ok(ChunkReader { stream, index })
    }

    /// The entity offset index over the chunk's subjects.
    pub fn entity_index(&self) -> &EntityIndex {
        &self.index
    }

    /// Every triple in the chunk, grouped by subject.
    pub fn triples(&self) -> Result<Vec<Triple>> {
        self.stream.decode_all()
    }

    /// One subject's rows via the entity index, without a full decode.
    pub fn entity(&self, entity_id: &str) -> Result<Vec<Triple>> {
        match self.index.lookup(entity_id) {
            Some(entry) => self.stream.decode_span(entry.offset, entry.length),
            None => Ok(Vec::new()),
        }
    }
}
