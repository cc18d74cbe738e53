//! Combined index container
//!
//! The on-blob file holding up to five index sections (POS, OSP, FTS, GEO,
//! VEC) for one namespace. The layout is self-describing and designed for
//! thin edge readers: a bounded prefix fetch yields the directory, after
//! which individual sections are loaded with coalesced byte-range requests.
//!
//! ## Layout (Version 1)
//!
//! ```text
//! [0]   magic u32 LE            — "TRIX"
//! [4]   version u16 LE          — starts at 1
//! [6]   flags u16 LE
//! [8]   index_count u32 LE
//! [12]  total_size u64 LE
//! [20]  created_at u64 LE       — ms since epoch
//! [28]  namespace_len u16 LE
//! [30]  reserved, zero, to byte 64
//! [64]  namespace UTF-8, zero-padded to a multiple of 8
//! [..]  directory: index_count × 32-byte entries
//! [..]  section payloads, tightly packed in directory order
//! [total_size-16] footer: magic u32 "TRIF", version u16, flags u16,
//!                 crc32 u32 (over all bytes before the CRC field),
//!                 reserved u32
//! ```
//!
//! Directory entry (32 bytes): index_type u8, compression u8, flags u16,
//! offset u64, compressed_size u64, uncompressed_size u64, reserved u32.
//! Entries appear in ascending offset order and never overlap;
//! `entry[i].offset + entry[i].compressed_size == entry[i+1].offset`.

use crate::checksum::crc32;
use crate::hnsw::VectorSection;
use crate::sections::{FtsIndex, GeoIndex, OspIndex, PosIndex};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::io::{Read, Write};
use trellis_core::limits::{DEFAULT_MAX_INDEX_COUNT, DEFAULT_MAX_NAMESPACE_LEN};
use trellis_core::{Error, Result};

/// Fixed header size in bytes.
pub const HEADER_SIZE: usize = 64;
/// Fixed directory entry size in bytes.
pub const DIRECTORY_ENTRY_SIZE: usize = 32;
/// Fixed footer size in bytes.
pub const FOOTER_SIZE: usize = 16;

/// Header magic, "TRIX" little-endian.
pub const MAGIC: u32 = u32::from_le_bytes(*b"TRIX");
/// Footer magic, "TRIF" little-endian, distinct for reverse scanning.
pub const FOOTER_MAGIC: u32 = u32::from_le_bytes(*b"TRIF");
/// Current container version.
pub const CONTAINER_VERSION: u16 = 1;

/// Logical index sections, by stable code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum IndexType {
    /// predicate → subjects
    Pos = 1,
    /// object ref → referring subjects
    Osp = 2,
    /// term → postings
    Fts = 3,
    /// geohash prefix → entities
    Geo = 4,
    /// HNSW vector graph
    Vec = 5,
}

impl IndexType {
    fn from_code(code: u8) -> Result<Self> {
        Ok(match code {
            1 => IndexType::Pos,
            2 => IndexType::Osp,
            3 => IndexType::Fts,
            4 => IndexType::Geo,
            5 => IndexType::Vec,
            other => return Err(Error::corrupt(format!("unknown index type code {}", other))),
        })
    }
}

/// Per-section compression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Compression {
    /// Payload stored verbatim
    None = 0,
    /// Payload deflated with gzip
    Gzip = 1,
}

impl Compression {
    fn from_code(code: u8) -> Result<Self> {
        Ok(match code {
            0 => Compression::None,
            1 => Compression::Gzip,
            other => {
                return Err(Error::corrupt(format!(
                    "unknown compression code {}",
                    other
                )))
            }
        })
    }
}

/// A decoded directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectoryEntry {
    /// Which section this entry describes
    pub index_type: IndexType,
    /// How the payload is stored
    pub compression: Compression,
    /// Per-section flags (reserved)
    pub flags: u16,
    /// Absolute byte offset of the payload
    pub offset: u64,
    /// Exact on-disk payload length
    pub compressed_size: u64,
    /// Plaintext payload length after inflation
    pub uncompressed_size: u64,
}

/// The decoded header + directory of a combined index file.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexHeader {
    /// Container version
    pub version: u16,
    /// Container flags
    pub flags: u16,
    /// Namespace the file indexes
    pub namespace: String,
    /// Wall-clock creation time (ms since epoch)
    pub created_at: u64,
    /// Total file size in bytes
    pub total_size: u64,
    /// Bytes occupied by header + padded namespace + directory
    pub header_size: u64,
    /// Directory entries in ascending offset order
    pub directory: Vec<DirectoryEntry>,
}

impl IndexHeader {
    /// Directory entry for one section, if present.
    pub fn entry(&self, index_type: IndexType) -> Option<&DirectoryEntry> {
        self.directory.iter().find(|e| e.index_type == index_type)
    }
}

/// The logical content of a combined index file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CombinedIndex {
    /// Namespace the sections index
    pub namespace: String,
    /// POS section
    pub pos: Option<PosIndex>,
    /// OSP section
    pub osp: Option<OspIndex>,
    /// FTS section
    pub fts: Option<FtsIndex>,
    /// GEO section
    pub geo: Option<GeoIndex>,
    /// VEC section (only encoded when explicitly requested)
    pub vectors: Option<VectorSection>,
}

/// Options controlling [`CombinedIndex::encode`].
#[derive(Debug, Clone)]
pub struct EncodeOptions {
    /// Per-section compression
    pub compression: Compression,
    /// Encode the VEC section; off by default even when vectors are present
    pub include_vectors: bool,
    /// Header creation timestamp (ms since epoch)
    pub created_at: u64,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        EncodeOptions {
            compression: Compression::None,
            include_vectors: false,
            created_at: trellis_core::now_ms(),
        }
    }
}

/// Zero-pad a length up to the next multiple of 8.
fn pad8(len: usize) -> usize {
    (len + 7) & !7
}

impl CombinedIndex {
    /// An empty index for a namespace.
    pub fn new(namespace: impl Into<String>) -> Self {
        CombinedIndex {
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    /// Serialize present sections in directory order.
    fn section_payloads(&self, include_vectors: bool) -> Vec<(IndexType, Vec<u8>)> {
        let mut payloads = Vec::new();
        if let Some(pos) = &self.pos {
            payloads.push((IndexType::Pos, pos.encode()));
        }
        if let Some(osp) = &self.osp {
            payloads.push((IndexType::Osp, osp.encode()));
        }
        if let Some(fts) = &self.fts {
            payloads.push((IndexType::Fts, fts.encode()));
        }
        if let Some(geo) = &self.geo {
            payloads.push((IndexType::Geo, geo.encode()));
        }
        if include_vectors {
            if let Some(vectors) = &self.vectors {
                payloads.push((IndexType::Vec, vectors.encode()));
            }
        }
        payloads
    }

    /// Encode the container.
    ///
    /// Sections are serialized, optionally gzipped, laid out by prefix sum
    /// after the directory, and sealed with the footer CRC.
    pub fn encode(&self, options: &EncodeOptions) -> Result<Vec<u8>> {
        if self.namespace.len() > u16::MAX as usize {
            return Err(Error::bad_input("namespace exceeds u16 length"));
        }

        let plain = self.section_payloads(options.include_vectors);
        let mut stored: Vec<(IndexType, Compression, u64, Vec<u8>)> =
            Vec::with_capacity(plain.len());
        for (index_type, payload) in plain {
            let uncompressed = payload.len() as u64;
            match options.compression {
                Compression::None => {
                    stored.push((index_type, Compression::None, uncompressed, payload));
                }
                Compression::Gzip => {
                    let deflated = gzip(&payload)?;
                    stored.push((index_type, Compression::Gzip, uncompressed, deflated));
                }
            }
        }

        let ns_bytes = self.namespace.as_bytes();
        let header_size =
            HEADER_SIZE + pad8(ns_bytes.len()) + stored.len() * DIRECTORY_ENTRY_SIZE;
        let payload_total: u64 = stored.iter().map(|(_, _, _, b)| b.len() as u64).sum();
        let total_size = header_size as u64 + payload_total + FOOTER_SIZE as u64;

        let mut buf = Vec::with_capacity(total_size as usize);
        buf.extend_from_slice(&MAGIC.to_le_bytes());
        buf.extend_from_slice(&CONTAINER_VERSION.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes()); // flags
        buf.extend_from_slice(&(stored.len() as u32).to_le_bytes());
        buf.extend_from_slice(&total_size.to_le_bytes());
        buf.extend_from_slice(&options.created_at.to_le_bytes());
        buf.extend_from_slice(&(ns_bytes.len() as u16).to_le_bytes());
        buf.resize(HEADER_SIZE, 0); // reserved

        buf.extend_from_slice(ns_bytes);
        buf.resize(HEADER_SIZE + pad8(ns_bytes.len()), 0);

        let mut offset = header_size as u64;
        for (index_type, compression, uncompressed, payload) in &stored {
            buf.push(*index_type as u8);
            buf.push(*compression as u8);
            buf.extend_from_slice(&0u16.to_le_bytes()); // flags
            buf.extend_from_slice(&offset.to_le_bytes());
            buf.extend_from_slice(&(payload.len() as u64).to_le_bytes());
            buf.extend_from_slice(&uncompressed.to_le_bytes());
            buf.extend_from_slice(&0u32.to_le_bytes()); // reserved
            offset += payload.len() as u64;
        }

        for (_, _, _, payload) in &stored {
            buf.extend_from_slice(payload);
        }

        // Footer; CRC is finalized over the assembled buffer.
        buf.extend_from_slice(&FOOTER_MAGIC.to_le_bytes());
        buf.extend_from_slice(&CONTAINER_VERSION.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        let crc = crc32(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());

        debug_assert_eq!(buf.len() as u64, total_size);
        Ok(buf)
    }

    /// Decode a complete container, verifying the footer CRC.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let header = decode_header(bytes)?;
        if bytes.len() as u64 != header.total_size {
            return Err(Error::corrupt(format!(
                "container is {} bytes, header claims {}",
                bytes.len(),
                header.total_size
            )));
        }

        let footer = &bytes[bytes.len() - FOOTER_SIZE..];
        let footer_magic = u32::from_le_bytes(footer[0..4].try_into().unwrap());
        if footer_magic != FOOTER_MAGIC {
            return Err(Error::bad_format("footer magic mismatch"));
        }
        let stored_crc = u32::from_le_bytes(footer[8..12].try_into().unwrap());
        let covered = &bytes[..bytes.len() - FOOTER_SIZE + 8];
        if crc32(covered) != stored_crc {
            return Err(Error::corrupt("container checksum mismatch"));
        }

        let mut index = CombinedIndex::new(header.namespace.clone());
        for entry in &header.directory {
            let payload = section_plaintext(bytes, entry)?;
            match entry.index_type {
                IndexType::Pos => index.pos = Some(PosIndex::decode(&payload)?),
                IndexType::Osp => index.osp = Some(OspIndex::decode(&payload)?),
                IndexType::Fts => index.fts = Some(FtsIndex::decode(&payload)?),
                IndexType::Geo => index.geo = Some(GeoIndex::decode(&payload)?),
                IndexType::Vec => index.vectors = Some(VectorSection::decode(&payload)?),
            }
        }
        Ok(index)
    }
}

/// Extract and inflate one section payload from the full file bytes.
fn section_plaintext(bytes: &[u8], entry: &DirectoryEntry) -> Result<Vec<u8>> {
    let start = entry.offset as usize;
    let end = start + entry.compressed_size as usize;
    if end > bytes.len() {
        return Err(Error::corrupt("section payload exceeds file"));
    }
    inflate_section(entry, &bytes[start..end])
}

/// Inflate a section payload fetched by offset, validating sizes.
pub fn inflate_section(entry: &DirectoryEntry, raw: &[u8]) -> Result<Vec<u8>> {
    if raw.len() as u64 != entry.compressed_size {
        return Err(Error::corrupt(format!(
            "section payload is {} bytes, directory claims {}",
            raw.len(),
            entry.compressed_size
        )));
    }
    match entry.compression {
        Compression::None => {
            if entry.compressed_size != entry.uncompressed_size {
                return Err(Error::corrupt(
                    "uncompressed section with mismatched directory sizes",
                ));
            }
            Ok(raw.to_vec())
        }
        Compression::Gzip => {
            let plain = gunzip(raw)?;
            if plain.len() as u64 != entry.uncompressed_size {
                return Err(Error::corrupt(format!(
                    "inflated section is {} bytes, directory claims {}",
                    plain.len(),
                    entry.uncompressed_size
                )));
            }
            Ok(plain)
        }
    }
}

/// Bytes an edge reader should fetch to be certain of covering the header,
/// namespace, and directory.
pub fn header_fetch_range(max_namespace_len: usize, max_index_count: usize) -> u64 {
    (HEADER_SIZE + pad8(max_namespace_len) + max_index_count * DIRECTORY_ENTRY_SIZE) as u64
}

/// Default header fetch range (namespace ≤ 256, up to 10 sections).
pub fn default_header_fetch_range() -> u64 {
    header_fetch_range(DEFAULT_MAX_NAMESPACE_LEN, DEFAULT_MAX_INDEX_COUNT)
}

/// Decode the header + directory from a file prefix.
///
/// `bytes` may be the whole file or any prefix that covers the directory
/// (see [`header_fetch_range`]).
pub fn decode_header(bytes: &[u8]) -> Result<IndexHeader> {
    if bytes.len() < HEADER_SIZE {
        return Err(Error::corrupt("container shorter than fixed header"));
    }
    let magic = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
    if magic != MAGIC {
        return Err(Error::bad_format("container magic mismatch"));
    }
    let version = u16::from_le_bytes(bytes[4..6].try_into().unwrap());
    if version != CONTAINER_VERSION {
        return Err(Error::bad_format(format!(
            "unsupported container version {}",
            version
        )));
    }
    let flags = u16::from_le_bytes(bytes[6..8].try_into().unwrap());
    let index_count = u32::from_le_bytes(bytes[8..12].try_into().unwrap()) as usize;
    let total_size = u64::from_le_bytes(bytes[12..20].try_into().unwrap());
    let created_at = u64::from_le_bytes(bytes[20..28].try_into().unwrap());
    let namespace_len = u16::from_le_bytes(bytes[28..30].try_into().unwrap()) as usize;

    let header_size = HEADER_SIZE + pad8(namespace_len) + index_count * DIRECTORY_ENTRY_SIZE;
    if bytes.len() < header_size {
        return Err(Error::corrupt(format!(
            "header fetch of {} bytes does not cover directory ({} bytes)",
            bytes.len(),
            header_size
        )));
    }

    let namespace = std::str::from_utf8(&bytes[HEADER_SIZE..HEADER_SIZE + namespace_len])
        .map_err(|_| Error::corrupt("namespace is not UTF-8"))?
        .to_string();

    let mut directory = Vec::with_capacity(index_count);
    let mut dir_pos = HEADER_SIZE + pad8(namespace_len);
    for _ in 0..index_count {
        let e = &bytes[dir_pos..dir_pos + DIRECTORY_ENTRY_SIZE];
        directory.push(DirectoryEntry {
            index_type: IndexType::from_code(e[0])?,
            compression: Compression::from_code(e[1])?,
            flags: u16::from_le_bytes(e[2..4].try_into().unwrap()),
            offset: u64::from_le_bytes(e[4..12].try_into().unwrap()),
            compressed_size: u64::from_le_bytes(e[12..20].try_into().unwrap()),
            uncompressed_size: u64::from_le_bytes(e[20..28].try_into().unwrap()),
        });
        dir_pos += DIRECTORY_ENTRY_SIZE;
    }

    // Directory invariants: ascending, non-overlapping, inside the payload
    // region.
    let mut prev_end = header_size as u64;
    for entry in &directory {
        if entry.offset < prev_end {
            return Err(Error::corrupt(format!(
                "directory entry for {:?} overlaps at offset {}",
                entry.index_type, entry.offset
            )));
        }
        if entry.compression == Compression::None
            && entry.compressed_size != entry.uncompressed_size
        {
            return Err(Error::corrupt(
                "uncompressed section with mismatched directory sizes",
            ));
        }
        prev_end = entry
            .offset
            .checked_add(entry.compressed_size)
            .ok_or_else(|| Error::corrupt("directory entry size overflows"))?;
    }
    if prev_end + FOOTER_SIZE as u64 > total_size {
        return Err(Error::corrupt("directory extends past total size"));
    }

    Ok(IndexHeader {
        version,
        flags,
        namespace,
        created_at,
        total_size,
        header_size: header_size as u64,
        directory,
    })
}

/// A byte range covering one section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionRange {
    /// Section the range belongs to
    pub index_type: IndexType,
    /// Absolute byte offset
    pub offset: u64,
    /// Length in bytes (the section's compressed size)
    pub length: u64,
}

/// A coalesced byte-range request covering one or more sections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoalescedRange {
    /// Absolute byte offset of the request
    pub offset: u64,
    /// Request length in bytes
    pub length: u64,
    /// Sections contained in the request, in offset order
    pub types: Vec<IndexType>,
}

/// Ranges for the requested section types, sorted by offset.
///
/// Types absent from the directory are skipped.
pub fn plan_range_requests(header: &IndexHeader, wanted: &[IndexType]) -> Vec<SectionRange> {
    let mut ranges: Vec<SectionRange> = header
        .directory
        .iter()
        .filter(|e| wanted.contains(&e.index_type))
        .map(|e| SectionRange {
            index_type: e.index_type,
            offset: e.offset,
            length: e.compressed_size,
        })
        .collect();
    ranges.sort_by_key(|r| r.offset);
    ranges
}

/// Merge sorted ranges whose gap is at most `gap` bytes.
///
/// With `gap = 0` only overlapping or abutting ranges merge. Input is
/// sorted by offset before merging.
pub fn coalesce(ranges: &[SectionRange], gap: u64) -> Vec<CoalescedRange> {
    let mut sorted = ranges.to_vec();
    sorted.sort_by_key(|r| r.offset);

    let mut out: Vec<CoalescedRange> = Vec::new();
    for r in sorted {
        match out.last_mut() {
            Some(last) if r.offset <= last.offset + last.length + gap => {
                let end = (last.offset + last.length).max(r.offset + r.length);
                last.length = end - last.offset;
                last.types.push(r.index_type);
            }
            _ => out.push(CoalescedRange {
                offset: r.offset,
                length: r.length,
                types: vec![r.index_type],
            }),
        }
    }
    out
}

fn gzip(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(bytes)?;
    Ok(encoder.finish()?)
}

fn gunzip(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(bytes);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| Error::corrupt(format!("gzip inflate failed: {}", e)))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hnsw::VectorEntry;
    use crate::sections::Posting;

    fn pos_only() -> CombinedIndex {
        let mut index = CombinedIndex::new("test");
        let mut pos = PosIndex::default();
        pos.entries.insert(
            "name".into(),
            vec!["http://x/a".into(), "http://x/b".into()],
        );
        pos.entries.insert("age:25".into(), vec!["http://x/a".into()]);
        index.pos = Some(pos);
        index
    }

    fn full_index() -> CombinedIndex {
        let mut index = pos_only();
        let mut osp = OspIndex::default();
        osp.entries
            .insert("http://x/b".into(), vec!["http://x/a".into()]);
        index.osp = Some(osp);
        let mut fts = FtsIndex::default();
        fts.entries.insert(
            "alpha".into(),
            vec![Posting {
                entity_id: "http://x/a".into(),
                predicate: "title".into(),
                score: 2.0,
            }],
        );
        index.fts = Some(fts);
        let mut geo = GeoIndex::default();
        geo.insert("http://x/a", 52.52, 13.405);
        index.geo = Some(geo);
        index.vectors = Some(
            VectorSection::new(
                2,
                16,
                200,
                vec![VectorEntry {
                    entity_id: "http://x/a".into(),
                    predicate: "embedding".into(),
                    vector: vec![0.5, -0.5],
                    layers: vec![vec![]],
                }],
            )
            .unwrap(),
        );
        index
    }

    #[test]
    fn test_pos_only_round_trip() {
        let index = pos_only();
        let bytes = index.encode(&EncodeOptions::default()).unwrap();
        let header = decode_header(&bytes).unwrap();
        assert_eq!(header.namespace, "test");
        assert_eq!(header.directory.len(), 1);
        assert_eq!(header.directory[0].index_type, IndexType::Pos);
        let back = CombinedIndex::decode(&bytes).unwrap();
        assert_eq!(back, index);
    }

    #[test]
    fn test_vec_section_is_opt_in() {
        let index = full_index();
        let bytes = index.encode(&EncodeOptions::default()).unwrap();
        let header = decode_header(&bytes).unwrap();
        assert!(header.entry(IndexType::Vec).is_none());
        let back = CombinedIndex::decode(&bytes).unwrap();
        assert!(back.vectors.is_none());

        let bytes = index
            .encode(&EncodeOptions {
                include_vectors: true,
                ..Default::default()
            })
            .unwrap();
        let back = CombinedIndex::decode(&bytes).unwrap();
        assert_eq!(back, index);
    }

    #[test]
    fn test_gzip_round_trip() {
        let index = full_index();
        let bytes = index
            .encode(&EncodeOptions {
                compression: Compression::Gzip,
                include_vectors: true,
                ..Default::default()
            })
            .unwrap();
        let header = decode_header(&bytes).unwrap();
        for entry in &header.directory {
            assert_eq!(entry.compression, Compression::Gzip);
        }
        let back = CombinedIndex::decode(&bytes).unwrap();
        assert_eq!(back, index);
    }

    #[test]
    fn test_directory_is_tightly_packed() {
        let index = full_index();
        let bytes = index
            .encode(&EncodeOptions {
                include_vectors: true,
                ..Default::default()
            })
            .unwrap();
        let header = decode_header(&bytes).unwrap();
        assert!(header.directory[0].offset >= header.header_size);
        for pair in header.directory.windows(2) {
            assert_eq!(pair[0].offset + pair[0].compressed_size, pair[1].offset);
        }
        let last = header.directory.last().unwrap();
        assert_eq!(
            last.offset + last.compressed_size + FOOTER_SIZE as u64,
            header.total_size
        );
    }

    #[test]
    fn test_crc_covers_everything_before_crc_field() {
        let bytes = pos_only().encode(&EncodeOptions::default()).unwrap();
        let crc_at = bytes.len() - FOOTER_SIZE + 8;
        let stored = u32::from_le_bytes(bytes[crc_at..crc_at + 4].try_into().unwrap());
        assert_eq!(stored, crc32(&bytes[..crc_at]));
    }

    #[test]
    fn test_corruption_detected() {
        let mut bytes = pos_only().encode(&EncodeOptions::default()).unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0x40;
        assert!(matches!(
            CombinedIndex::decode(&bytes),
            Err(Error::Corrupt(_))
        ));
    }

    #[test]
    fn test_wrong_magic_is_bad_format() {
        let mut bytes = pos_only().encode(&EncodeOptions::default()).unwrap();
        bytes[0] = b'Z';
        assert!(matches!(decode_header(&bytes), Err(Error::BadFormat(_))));
    }

    #[test]
    fn test_zero_sections_representable() {
        let index = CombinedIndex::new("empty-ns");
        let bytes = index.encode(&EncodeOptions::default()).unwrap();
        let header = decode_header(&bytes).unwrap();
        assert!(header.directory.is_empty());
        assert_eq!(header.total_size, header.header_size + FOOTER_SIZE as u64);
        assert_eq!(CombinedIndex::decode(&bytes).unwrap(), index);
    }

    #[test]
    fn test_namespace_padding_to_eight() {
        for ns in ["a", "12345678", "123456789"] {
            let index = CombinedIndex::new(ns);
            let bytes = index.encode(&EncodeOptions::default()).unwrap();
            let header = decode_header(&bytes).unwrap();
            assert_eq!(header.namespace, ns);
            assert_eq!(
                header.header_size as usize,
                HEADER_SIZE + pad8(ns.len())
            );
        }
    }

    #[test]
    fn test_header_decode_from_bounded_prefix() {
        let index = full_index();
        let bytes = index.encode(&EncodeOptions::default()).unwrap();
        let range = default_header_fetch_range() as usize;
        let prefix = &bytes[..range.min(bytes.len())];
        let header = decode_header(prefix).unwrap();
        assert_eq!(header.directory.len(), 4);
    }

    #[test]
    fn test_header_prefix_too_short_is_corrupt() {
        let bytes = full_index().encode(&EncodeOptions::default()).unwrap();
        assert!(decode_header(&bytes[..HEADER_SIZE + 2]).is_err());
        assert!(decode_header(&bytes[..10]).is_err());
    }

    #[test]
    fn test_plan_range_requests_selects_wanted() {
        let index = full_index();
        let bytes = index.encode(&EncodeOptions::default()).unwrap();
        let header = decode_header(&bytes).unwrap();

        let plan = plan_range_requests(&header, &[IndexType::Fts]);
        assert_eq!(plan.len(), 1);
        let fts_entry = header.entry(IndexType::Fts).unwrap();
        assert_eq!(plan[0].offset, fts_entry.offset);
        assert_eq!(plan[0].length, fts_entry.compressed_size);

        let plan = plan_range_requests(&header, &[IndexType::Vec]);
        assert!(plan.is_empty());
    }

    #[test]
    fn test_coalesce_default_gap() {
        let ranges = [
            SectionRange {
                index_type: IndexType::Pos,
                offset: 100,
                length: 50,
            },
            SectionRange {
                index_type: IndexType::Osp,
                offset: 4100,
                length: 50,
            },
        ];
        let merged = coalesce(&ranges, 4096);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].offset, 100);
        assert_eq!(merged[0].length, 4050);
        assert_eq!(merged[0].types, vec![IndexType::Pos, IndexType::Osp]);

        let split = coalesce(&ranges, 10);
        assert_eq!(split.len(), 2);
    }

    #[test]
    fn test_coalesce_zero_gap_merges_only_abutting() {
        let abutting = [
            SectionRange {
                index_type: IndexType::Pos,
                offset: 0,
                length: 10,
            },
            SectionRange {
                index_type: IndexType::Osp,
                offset: 10,
                length: 10,
            },
        ];
        assert_eq!(coalesce(&abutting, 0).len(), 1);

        let separated = [
            SectionRange {
                index_type: IndexType::Pos,
                offset: 0,
                length: 10,
            },
            SectionRange {
                index_type: IndexType::Osp,
                offset: 11,
                length: 10,
            },
        ];
        assert_eq!(coalesce(&separated, 0).len(), 2);
    }

    #[test]
    fn test_coalesce_sorts_unsorted_input() {
        let ranges = [
            SectionRange {
                index_type: IndexType::Osp,
                offset: 200,
                length: 10,
            },
            SectionRange {
                index_type: IndexType::Pos,
                offset: 100,
                length: 120,
            },
        ];
        let merged = coalesce(&ranges, 0);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].offset, 100);
        assert_eq!(merged[0].length, 120);
        assert_eq!(merged[0].types, vec![IndexType::Pos, IndexType::Osp]);
    }

    #[test]
    fn test_selective_section_fetch_by_ranges() {
        // Simulate an edge reader: header prefix, then one coalesced fetch.
        let index = full_index();
        let bytes = index.encode(&EncodeOptions::default()).unwrap();
        let header = decode_header(&bytes[..default_header_fetch_range() as usize]).unwrap();

        let plan = plan_range_requests(&header, &[IndexType::Pos, IndexType::Geo]);
        let requests = coalesce(&plan, 4096);
        assert_eq!(requests.len(), 1);

        let fetched =
            &bytes[requests[0].offset as usize..(requests[0].offset + requests[0].length) as usize];
        let pos_entry = header.entry(IndexType::Pos).unwrap();
        let rel = (pos_entry.offset - requests[0].offset) as usize;
        let raw = &fetched[rel..rel + pos_entry.compressed_size as usize];
        let plain = inflate_section(pos_entry, raw).unwrap();
        let pos = PosIndex::decode(&plain).unwrap();
        assert_eq!(&pos, index.pos.as_ref().unwrap());
    }

    #[test]
    fn test_inflate_section_validates_claimed_sizes() {
        let entry = DirectoryEntry {
            index_type: IndexType::Pos,
            compression: Compression::None,
            flags: 0,
            offset: 0,
            compressed_size: 4,
            uncompressed_size: 5,
        };
        assert!(inflate_section(&entry, &[0, 1, 2, 3]).is_err());
    }
}
