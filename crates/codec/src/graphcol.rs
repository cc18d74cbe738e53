//! GraphCol — column-oriented triple stream
//!
//! The serialization used inside chunk blobs. Triples are grouped by
//! subject; within a group each column (type tags, predicate ids,
//! timestamps, tx ids, values) is stored contiguously. Predicates are
//! dictionary-encoded at the stream level. Groups are self-contained so an
//! entity offset index can address one subject's rows without decoding the
//! rest of the stream.
//!
//! ## Layout (Version 1)
//!
//! ```text
//! [version u16 LE]
//! [dict: varint count, then per predicate varint len + UTF-8 bytes]
//! groups, one per subject in lexicographic order:
//!   [varint subject_len][subject UTF-8]
//!   [varint triple_count]
//!   [types:      triple_count × u8]
//!   [pred ids:   triple_count × varint]   — index into the dict
//!   [timestamps: triple_count × varint]   — absolute ns
//!   [tx ids:     triple_count × u128 LE]
//!   [values: per triple, payload by type]
//! [crc32 u32 LE]   — over everything before it
//! ```

use crate::checksum::crc32;
use crate::entity_index::{EntityEntry, EntityIndex};
use crate::varint::{write_string, write_varint, ByteReader};
use std::collections::BTreeMap;
use trellis_core::{Error, ObjectType, ObjectValue, Result, Triple, TxId};

const VERSION: u16 = 1;

/// Encode triples into a GraphCol stream plus the entity index over it.
///
/// Triples are grouped by subject (lexicographic); the returned index maps
/// each subject to its group's byte span within the stream.
pub fn encode(triples: &[Triple]) -> Result<(Vec<u8>, EntityIndex)> {
    let mut by_subject: BTreeMap<&str, Vec<&Triple>> = BTreeMap::new();
    for t in triples {
        by_subject.entry(t.subject.as_str()).or_default().push(t);
    }

    // Stream-level predicate dictionary, first-seen order over sorted subjects.
    let mut dict: Vec<&str> = Vec::new();
    let mut dict_ids: BTreeMap<&str, u64> = BTreeMap::new();
    for rows in by_subject.values() {
        for t in rows {
            if !dict_ids.contains_key(t.predicate.as_str()) {
                dict_ids.insert(t.predicate.as_str(), dict.len() as u64);
                dict.push(t.predicate.as_str());
            }
        }
    }

    let mut buf = Vec::new();
    buf.extend_from_slice(&VERSION.to_le_bytes());
    write_varint(&mut buf, dict.len() as u64);
    for p in &dict {
        write_string(&mut buf, p);
    }

    let mut entries = Vec::with_capacity(by_subject.len());
    for (subject, rows) in &by_subject {
        let start = buf.len() as u64;
        write_string(&mut buf, subject);
        write_varint(&mut buf, rows.len() as u64);
        for t in rows {
            buf.push(t.object.object_type().code());
        }
        for t in rows {
            write_varint(&mut buf, dict_ids[t.predicate.as_str()]);
        }
        for t in rows {
            write_varint(&mut buf, t.timestamp);
        }
        for t in rows {
            buf.extend_from_slice(&t.tx_id.to_u128().to_le_bytes());
        }
        for t in rows {
            write_value(&mut buf, &t.object);
        }
        entries.push(EntityEntry {
            entity_id: subject.to_string(),
            offset: start,
            length: buf.len() as u64 - start,
        });
    }

    let crc = crc32(&buf);
    buf.extend_from_slice(&crc.to_le_bytes());
    Ok((buf, EntityIndex::new(entries)?))
}

fn write_value(buf: &mut Vec<u8>, value: &ObjectValue) {
    match value {
        ObjectValue::Null => {}
        ObjectValue::String(s) | ObjectValue::Ref(s) => write_string(buf, s),
        ObjectValue::Int32(v) => buf.extend_from_slice(&v.to_le_bytes()),
        ObjectValue::Int64(v) => buf.extend_from_slice(&v.to_le_bytes()),
        ObjectValue::Float64(v) => buf.extend_from_slice(&v.to_le_bytes()),
        ObjectValue::Bool(v) => buf.push(*v as u8),
        ObjectValue::Timestamp(v) => write_varint(buf, *v),
        ObjectValue::GeoPoint { lat, lng } => {
            buf.extend_from_slice(&lat.to_le_bytes());
            buf.extend_from_slice(&lng.to_le_bytes());
        }
        ObjectValue::Binary(bytes) => {
            write_varint(buf, bytes.len() as u64);
            buf.extend_from_slice(bytes);
        }
    }
}

fn read_value(r: &mut ByteReader<'_>, object_type: ObjectType) -> Result<ObjectValue> {
    Ok(match object_type {
        ObjectType::Null => ObjectValue::Null,
        ObjectType::String => ObjectValue::String(r.read_string()?),
        ObjectType::Ref => ObjectValue::Ref(r.read_string()?),
        ObjectType::Int32 => {
            let b = r.read_bytes(4)?;
            ObjectValue::Int32(i32::from_le_bytes(b.try_into().unwrap()))
        }
        ObjectType::Int64 => {
            let b = r.read_bytes(8)?;
            ObjectValue::Int64(i64::from_le_bytes(b.try_into().unwrap()))
        }
        ObjectType::Float64 => ObjectValue::Float64(r.read_f64()?),
        ObjectType::Bool => ObjectValue::Bool(r.read_bytes(1)?[0] != 0),
        ObjectType::Timestamp => ObjectValue::Timestamp(r.read_varint()?),
        ObjectType::GeoPoint => ObjectValue::GeoPoint {
            lat: r.read_f64()?,
            lng: r.read_f64()?,
        },
        ObjectType::Binary => {
            let len = r.read_varint()? as usize;
            ObjectValue::Binary(r.read_bytes(len)?.to_vec())
        }
    })
}

/// A validated GraphCol stream, ready for whole-stream or per-entity reads.
pub struct GraphColReader<'a> {
    body: &'a [u8],
    dict: Vec<String>,
    groups_start: usize,
}

impl<'a> GraphColReader<'a> {
    /// Validate the checksum and parse the stream header and dictionary.
    pub fn new(bytes: &'a [u8]) -> Result<Self> {
        if bytes.len() < 2 + 1 + 4 {
            return Err(Error::corrupt("GraphCol stream shorter than envelope"));
        }
        let body = &bytes[..bytes.len() - 4];
        let stored_crc = u32::from_le_bytes(bytes[bytes.len() - 4..].try_into().unwrap());
        if crc32(body) != stored_crc {
            return Err(Error::corrupt("GraphCol checksum mismatch"));
        }

        let mut r = ByteReader::new(body);
        let version = r.read_u16()?;
        if version != VERSION {
            return Err(Error::bad_format(format!(
                "unsupported GraphCol version {}",
                version
            )));
        }
        let dict_len = r.read_varint()? as usize;
        let mut dict = Vec::with_capacity(dict_len);
        for _ in 0..dict_len {
            dict.push(r.read_string()?);
        }
        Ok(GraphColReader {
            body,
            dict,
            groups_start: r.position(),
        })
    }

    /// Decode every triple in the stream, in subject order.
    pub fn decode_all(&self) -> Result<Vec<Triple>> {
        let mut out = Vec::new();
        let mut r = ByteReader::new(&self.body[self.groups_start..]);
        while r.remaining() > 0 {
            self.decode_group(&mut r, &mut out)?;
        }
        Ok(out)
    }

    /// Decode one subject's rows given its span from the entity index.
    pub fn decode_span(&self, offset: u64, length: u64) -> Result<Vec<Triple>> {
        let start = offset as usize;
        let end = start
            .checked_add(length as usize)
            .ok_or_else(|| Error::corrupt("entity span overflows"))?;
        if start < self.groups_start || end > self.body.len() {
            return Err(Error::corrupt(format!(
                "entity span {}..{} outside group region {}..{}",
                start,
                end,
                self.groups_start,
                self.body.len()
            )));
        }
        let mut r = ByteReader::new(&self.body[start..end]);
        let mut out = Vec::new();
        self.decode_group(&mut r, &mut out)?;
        if r.remaining() != 0 {
            return Err(Error::corrupt("trailing bytes after entity group"));
        }
        Ok(out)
    }

    fn decode_group(&self, r: &mut ByteReader<'_>, out: &mut Vec<Triple>) -> Result<()> {
        let subject = r.read_string()?;
        let count = r.read_varint()? as usize;

        let mut types = Vec::with_capacity(count);
        for _ in 0..count {
            types.push(ObjectType::from_code(r.read_bytes(1)?[0])?);
        }
        let mut predicates = Vec::with_capacity(count);
        for _ in 0..count {
            let id = r.read_varint()? as usize;
            let predicate = self
                .dict
                .get(id)
                .ok_or_else(|| Error::corrupt(format!("predicate dict id {} out of range", id)))?;
            predicates.push(predicate.clone());
        }
        let mut timestamps = Vec::with_capacity(count);
        for _ in 0..count {
            timestamps.push(r.read_varint()?);
        }
        let mut tx_ids = Vec::with_capacity(count);
        for _ in 0..count {
            let b = r.read_bytes(16)?;
            tx_ids.push(TxId::from_u128(u128::from_le_bytes(b.try_into().unwrap())));
        }
        for i in 0..count {
            let object = read_value(r, types[i])?;
            out.push(Triple {
                subject: subject.clone(),
                predicate: predicates[i].clone(),
                object,
                timestamp: timestamps[i],
                tx_id: tx_ids[i],
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::TxIdGenerator;

    fn sample_triples() -> Vec<Triple> {
        let mut gen = TxIdGenerator::new();
        let mut tx = || gen.next().unwrap();
        vec![
            Triple::new(
                "http://x/b",
                "name",
                ObjectValue::String("bob".into()),
                100,
                tx(),
            )
            .unwrap(),
            Triple::new("http://x/a", "age", ObjectValue::Int32(30), 101, tx()).unwrap(),
            Triple::new(
                "http://x/a",
                "knows",
                ObjectValue::Ref("http://x/b".into()),
                102,
                tx(),
            )
            .unwrap(),
            Triple::new(
                "http://x/a",
                "height",
                ObjectValue::Float64(1.8),
                103,
                tx(),
            )
            .unwrap(),
            Triple::new("http://x/b", "active", ObjectValue::Bool(true), 104, tx()).unwrap(),
            Triple::new(
                "http://x/b",
                "seen",
                ObjectValue::Timestamp(1_700_000_000_000_000_000),
                105,
                tx(),
            )
            .unwrap(),
            Triple::new(
                "http://x/c",
                "home",
                ObjectValue::GeoPoint {
                    lat: 52.52,
                    lng: 13.405,
                },
                106,
                tx(),
            )
            .unwrap(),
            Triple::new(
                "http://x/c",
                "blob",
                ObjectValue::Binary(vec![0, 1, 2, 255]),
                107,
                tx(),
            )
            .unwrap(),
            Triple::new("http://x/c", "name", ObjectValue::Null, 108, tx()).unwrap(),
            Triple::new(
                "http://x/c",
                "count",
                ObjectValue::Int64(-9_000_000_000),
                109,
                tx(),
            )
            .unwrap(),
        ]
    }

    #[test]
    fn test_round_trip_all_value_types() {
        let triples = sample_triples();
        let (bytes, _) = encode(&triples).unwrap();
        let reader = GraphColReader::new(&bytes).unwrap();
        let decoded = reader.decode_all().unwrap();

        // Decode returns subject order; compare as sorted sets
        let mut want = triples;
        want.sort_by(|a, b| a.subject.cmp(&b.subject).then(a.timestamp.cmp(&b.timestamp)));
        let mut got = decoded;
        got.sort_by(|a, b| a.subject.cmp(&b.subject).then(a.timestamp.cmp(&b.timestamp)));
        assert_eq!(got, want);
    }

    #[test]
    fn test_entity_index_spans_resolve_each_subject() {
        let triples = sample_triples();
        let (bytes, index) = encode(&triples).unwrap();
        let reader = GraphColReader::new(&bytes).unwrap();

        assert_eq!(index.len(), 3);
        for subject in ["http://x/a", "http://x/b", "http://x/c"] {
            let entry = index.lookup(subject).unwrap();
            let rows = reader.decode_span(entry.offset, entry.length).unwrap();
            assert!(!rows.is_empty());
            assert!(rows.iter().all(|t| t.subject == subject));
            let want = triples.iter().filter(|t| t.subject == subject).count();
            assert_eq!(rows.len(), want);
        }
    }

    #[test]
    fn test_checksum_guard() {
        let (mut bytes, _) = encode(&sample_triples()).unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0x01;
        assert!(matches!(
            GraphColReader::new(&bytes),
            Err(Error::Corrupt(_))
        ));
    }

    #[test]
    fn test_bad_span_is_corrupt() {
        let (bytes, _) = encode(&sample_triples()).unwrap();
        let reader = GraphColReader::new(&bytes).unwrap();
        assert!(reader.decode_span(0, 4).is_err());
        assert!(reader.decode_span(u64::MAX, 4).is_err());
    }

    #[test]
    fn test_empty_stream() {
        let (bytes, index) = encode(&[]).unwrap();
        assert!(index.is_empty());
        let reader = GraphColReader::new(&bytes).unwrap();
        assert!(reader.decode_all().unwrap().is_empty());
    }

    #[test]
    fn test_dictionary_dedupes_predicates() {
        let mut gen = TxIdGenerator::new();
        let mut triples = Vec::new();
        for i in 0..100 {
            triples.push(
                Triple::new(
                    format!("http://x/{}", i),
                    "same_predicate_every_time",
                    ObjectValue::Int32(i),
                    i as u64,
                    gen.next().unwrap(),
                )
                .unwrap(),
            );
        }
        let (bytes, _) = encode(&triples).unwrap();
        // The predicate string appears once (dict), not per row.
        let needle = b"same_predicate_every_time";
        let count = bytes
            .windows(needle.len())
            .filter(|w| w == needle)
            .count();
        assert_eq!(count, 1);
    }
}
