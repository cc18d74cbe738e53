//! Entity offset index
//!
//! A sorted directory mapping entity ids to byte spans inside a chunk blob,
//! enabling O(log n) point and prefix lookup without decoding the chunk.
//!
//! ## Layout (Version 1)
//!
//! ```text
//! [version u16 LE]
//! [entry_count u16 LE]
//! entries: [varint id_len][id UTF-8][varint offset_delta][varint length]
//! [crc32 u32 LE]          — over everything before it
//! ```
//!
//! Entries are ordered lexicographically by id bytes; offsets are
//! delta-encoded against the previous entry's offset.

use crate::checksum::crc32;
use crate::varint::{varint_len, write_varint, ByteReader};
use trellis_core::{Error, Result};

const VERSION: u16 = 1;

/// One (entity id → byte span) entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityEntry {
    /// Entity id (UTF-8)
    pub entity_id: String,
    /// Byte offset of the entity's span inside the chunk payload
    pub offset: u64,
    /// Span length in bytes
    pub length: u64,
}

/// A sorted entity offset index over one chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityIndex {
    entries: Vec<EntityEntry>,
}

impl EntityIndex {
    /// Build an index from entries, sorting by id and validating shape.
    ///
    /// Offsets must be non-decreasing in id order (the chunk encoder lays
    /// spans out in the same order it writes the index). Duplicate ids are
    /// rejected.
    pub fn new(mut entries: Vec<EntityEntry>) -> Result<Self> {
        entries.sort_by(|a, b| a.entity_id.as_bytes().cmp(b.entity_id.as_bytes()));
        for pair in entries.windows(2) {
            if pair[0].entity_id == pair[1].entity_id {
                return Err(Error::bad_input(format!(
                    "duplicate entity id {:?}",
                    pair[0].entity_id
                )));
            }
            if pair[1].offset < pair[0].offset {
                return Err(Error::bad_input(
                    "entity offsets must be non-decreasing in id order",
                ));
            }
        }
        if entries.len() > u16::MAX as usize {
            return Err(Error::bad_input(format!(
                "entity index holds at most {} entries, got {}",
                u16::MAX,
                entries.len()
            )));
        }
        Ok(EntityIndex { entries })
    }

    /// All entries in id order.
    pub fn entries(&self) -> &[EntityEntry] {
        &self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the index is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Point lookup by exact entity id.
    pub fn lookup(&self, entity_id: &str) -> Option<&EntityEntry> {
        self.entries
            .binary_search_by(|e| e.entity_id.as_bytes().cmp(entity_id.as_bytes()))
            .ok()
            .map(|i| &self.entries[i])
    }

    /// All entries whose id starts with `prefix`, as a new vector.
    ///
    /// Bounds are found by binary search: the lower bound at the prefix
    /// itself, the upper bound at the prefix with its last byte
    /// incremented. A prefix ending in 0xFF bytes extends to the end of
    /// the range; an empty prefix returns a copy of every entry.
    pub fn prefix_lookup(&self, prefix: &str) -> Vec<EntityEntry> {
        let lo = self
            .entries
            .partition_point(|e| e.entity_id.as_bytes() < prefix.as_bytes());
        let hi = match prefix_upper_bound(prefix.as_bytes()) {
            Some(upper) => self
                .entries
                .partition_point(|e| e.entity_id.as_bytes() < upper.as_slice()),
            None => self.entries.len(),
        };
        self.entries[lo..hi].to_vec()
    }

    /// Exact byte length [`encode`](Self::encode) would produce.
    ///
    /// Used to pre-size combined-index directory entries before payload
    /// assembly.
    pub fn estimated_size(&self) -> usize {
        let mut size = 2 + 2 + 4; // version + count + crc
        let mut prev_offset = 0u64;
        for e in &self.entries {
            size += varint_len(e.entity_id.len() as u64);
            size += e.entity_id.len();
            size += varint_len(e.offset - prev_offset);
            size += varint_len(e.length);
            prev_offset = e.offset;
        }
        size
    }

    /// Encode to the CRC-guarded wire layout.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.estimated_size());
        buf.extend_from_slice(&VERSION.to_le_bytes());
        buf.extend_from_slice(&(self.entries.len() as u16).to_le_bytes());
        let mut prev_offset = 0u64;
        for e in &self.entries {
            write_varint(&mut buf, e.entity_id.len() as u64);
            buf.extend_from_slice(e.entity_id.as_bytes());
            write_varint(&mut buf, e.offset - prev_offset);
            write_varint(&mut buf, e.length);
            prev_offset = e.offset;
        }
        let crc = crc32(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Decode and validate an encoded index.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 8 {
            return Err(Error::corrupt("entity index shorter than envelope"));
        }
        let body = &bytes[..bytes.len() - 4];
        let stored_crc = u32::from_le_bytes(bytes[bytes.len() - 4..].try_into().unwrap());
        if crc32(body) != stored_crc {
            return Err(Error::corrupt("entity index checksum mismatch"));
        }

        let mut r = ByteReader::new(body);
        let version = r.read_u16()?;
        if version != VERSION {
            return Err(Error::bad_format(format!(
                "unsupported entity index version {}",
                version
            )));
        }
        let count = r.read_u16()? as usize;
        let mut entries = Vec::with_capacity(count);
        let mut prev_offset = 0u64;
        for _ in 0..count {
            let entity_id = r.read_string()?;
            let delta = r.read_varint()?;
            let length = r.read_varint()?;
            let offset = prev_offset
                .checked_add(delta)
                .ok_or_else(|| Error::corrupt("entity index offset delta overflows"))?;
            entries.push(EntityEntry {
                entity_id,
                offset,
                length,
            });
            prev_offset = offset;
        }
        if r.remaining() != 0 {
            return Err(Error::corrupt("trailing bytes after entity index entries"));
        }
        EntityIndex::new(entries)
    }
}

/// Smallest byte string greater than every string with the given prefix.
///
/// Increments the last non-0xFF byte and truncates; all-0xFF prefixes have
/// no upper bound.
fn prefix_upper_bound(prefix: &[u8]) -> Option<Vec<u8>> {
    if prefix.is_empty() {
        return None;
    }
    let mut upper = prefix.to_vec();
    while let Some(&last) = upper.last() {
        if last == 0xff {
            upper.pop();
        } else {
            *upper.last_mut().unwrap() = last + 1;
            return Some(upper);
        }
    }
    None
}
