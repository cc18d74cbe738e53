//! POS, OSP, FTS, and GEO section codecs
//!
//! Each section is a self-contained serialized index over one namespace,
//! carried as a payload inside the combined index container. Sections use
//! varint framing; integrity is guarded by the container footer CRC.

use crate::varint::{write_string, write_varint, ByteReader};
use std::collections::BTreeMap;
use trellis_core::{Error, Result};

const SECTION_VERSION: u16 = 1;

fn write_header(buf: &mut Vec<u8>) {
    buf.extend_from_slice(&SECTION_VERSION.to_le_bytes());
}

fn read_header(r: &mut ByteReader<'_>, what: &str) -> Result<()> {
    let version = r.read_u16()?;
    if version != SECTION_VERSION {
        return Err(Error::bad_format(format!(
            "unsupported {} section version {}",
            what, version
        )));
    }
    Ok(())
}

fn encode_multimap(map: &BTreeMap<String, Vec<String>>) -> Vec<u8> {
    let mut buf = Vec::new();
    write_header(&mut buf);
    write_varint(&mut buf, map.len() as u64);
    for (key, values) in map {
        write_string(&mut buf, key);
        write_varint(&mut buf, values.len() as u64);
        for v in values {
            write_string(&mut buf, v);
        }
    }
    buf
}

fn decode_multimap(bytes: &[u8], what: &str) -> Result<BTreeMap<String, Vec<String>>> {
    let mut r = ByteReader::new(bytes);
    read_header(&mut r, what)?;
    let count = r.read_varint()? as usize;
    let mut map = BTreeMap::new();
    for _ in 0..count {
        let key = r.read_string()?;
        let n = r.read_varint()? as usize;
        let mut values = Vec::with_capacity(n);
        for _ in 0..n {
            values.push(r.read_string()?);
        }
        map.insert(key, values);
    }
    if r.remaining() != 0 {
        return Err(Error::corrupt(format!(
            "trailing bytes after {} section",
            what
        )));
    }
    Ok(map)
}

/// POS index: predicate (optionally `predicate:valueHash`) → subjects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PosIndex {
    /// Sorted predicate key → sorted subject list
    pub entries: BTreeMap<String, Vec<String>>,
}

impl PosIndex {
    /// Serialize to the section payload.
    pub fn encode(&self) -> Vec<u8> {
        encode_multimap(&self.entries)
    }

    /// Parse a section payload.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(PosIndex {
            entries: decode_multimap(bytes, "POS")?,
        })
    }

    /// Subjects carrying `predicate`, if any.
    pub fn subjects(&self, predicate: &str) -> Option<&[String]> {
        self.entries.get(predicate).map(|v| v.as_slice())
    }
}

/// OSP index: object ref → referring subjects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OspIndex {
    /// Sorted object URL → sorted referrer list
    pub entries: BTreeMap<String, Vec<String>>,
}

impl OspIndex {
    /// Serialize to the section payload.
    pub fn encode(&self) -> Vec<u8> {
        encode_multimap(&self.entries)
    }

    /// Parse a section payload.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(OspIndex {
            entries: decode_multimap(bytes, "OSP")?,
        })
    }

    /// Subjects referring to `object`, if any.
    pub fn referrers(&self, object: &str) -> Option<&[String]> {
        self.entries.get(object).map(|v| v.as_slice())
    }
}

/// One posting in the FTS inverted index.
#[derive(Debug, Clone, PartialEq)]
pub struct Posting {
    /// Entity carrying the term
    pub entity_id: String,
    /// Predicate whose value produced the term
    pub predicate: String,
    /// Relevance score assigned by the external ranker
    pub score: f32,
}

/// FTS index: term → postings.
///
/// The serialized form of external full-text state; tokenization and
/// ranking happen outside the core.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FtsIndex {
    /// Sorted term → postings
    pub entries: BTreeMap<String, Vec<Posting>>,
}

impl FtsIndex {
    /// Serialize to the section payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        write_header(&mut buf);
        write_varint(&mut buf, self.entries.len() as u64);
        for (term, postings) in &self.entries {
            write_string(&mut buf, term);
            write_varint(&mut buf, postings.len() as u64);
            for p in postings {
                write_string(&mut buf, &p.entity_id);
                write_string(&mut buf, &p.predicate);
                buf.extend_from_slice(&p.score.to_le_bytes());
            }
        }
        buf
    }

    /// Parse a section payload.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(bytes);
        read_header(&mut r, "FTS")?;
        let count = r.read_varint()? as usize;
        let mut entries = BTreeMap::new();
        for _ in 0..count {
            let term = r.read_string()?;
            let n = r.read_varint()? as usize;
            let mut postings = Vec::with_capacity(n);
            for _ in 0..n {
                postings.push(Posting {
                    entity_id: r.read_string()?,
                    predicate: r.read_string()?,
                    score: r.read_f32()?,
                });
            }
            entries.insert(term, postings);
        }
        if r.remaining() != 0 {
            return Err(Error::corrupt("trailing bytes after FTS section"));
        }
        Ok(FtsIndex { entries })
    }
}

/// Geohash precision used when building GEO entries.
pub const GEOHASH_PRECISION: usize = 6;

/// GEO index: geohash prefix (fixed precision) → entity list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeoIndex {
    /// Sorted geohash → entity ids
    pub entries: BTreeMap<String, Vec<String>>,
}

impl GeoIndex {
    /// Serialize to the section payload.
    pub fn encode(&self) -> Vec<u8> {
        encode_multimap(&self.entries)
    }

    /// Parse a section payload.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(GeoIndex {
            entries: decode_multimap(bytes, "GEO")?,
        })
    }

    /// Register an entity at a coordinate.
    pub fn insert(&mut self, entity_id: &str, lat: f64, lng: f64) {
        let hash = geohash(lat, lng, GEOHASH_PRECISION);
        let list = self.entries.entry(hash).or_default();
        if !list.iter().any(|e| e == entity_id) {
            list.push(entity_id.to_string());
        }
    }

    /// Entities whose geohash starts with `prefix`.
    pub fn lookup_prefix(&self, prefix: &str) -> Vec<&str> {
        self.entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .flat_map(|(_, v)| v.iter().map(|s| s.as_str()))
            .collect()
    }
}

const GEOHASH_ALPHABET: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";

/// Standard geohash of a coordinate at the given character precision.
pub fn geohash(lat: f64, lng: f64, precision: usize) -> String {
    let mut lat_range = (-90.0f64, 90.0f64);
    let mut lng_range = (-180.0f64, 180.0f64);
    let mut hash = String::with_capacity(precision);
    let mut bit = 0;
    let mut ch = 0usize;
    let mut even = true;

    while hash.len() < precision {
        if even {
            let mid = (lng_range.0 + lng_range.1) / 2.0;
            if lng >= mid {
                ch |= 1 << (4 - bit);
                lng_range.0 = mid;
            } else {
                lng_range.1 = mid;
            }
        } else {
            let mid = (lat_range.0 + lat_range.1) / 2.0;
            if lat >= mid {
                ch |= 1 << (4 - bit);
                lat_range.0 = mid;
            } else {
                lat_range.1 = mid;
            }
        }
        even = !even;
        if bit < 4 {
            bit += 1;
        } else {
            hash.push(GEOHASH_ALPHABET[ch] as char);
            bit = 0;
            ch = 0;
        }
    }
    hash
}
