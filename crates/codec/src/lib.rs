//! Binary codecs for the Trellis on-blob formats
//!
//! Everything in this crate is pure: bytes in, bytes out, no I/O. The
//! formats are little-endian, CRC32-guarded, and immutable once published.
//!
//! - [`varint`] / [`checksum`]: LEB128 varints and the single CRC32 used
//!   by every container
//! - [`quant`]: the quantized-vector file (FLOAT32 / INT8 / BINARY)
//! - [`entity_index`]: sorted entity → byte-span directory over a chunk
//! - [`graphcol`]: the column-oriented triple stream inside chunk blobs
//! - [`sections`]: POS / OSP / FTS / GEO section codecs
//! - [`hnsw`]: the VEC section (HNSW graph layout)
//! - [`container`]: the combined index container with selective
//!   byte-range loading

pub mod checksum;
pub mod container;
pub mod entity_index;
pub mod graphcol;
pub mod hnsw;
pub mod quant;
pub mod sections;
pub mod varint;

pub use container::{
    coalesce, decode_header, default_header_fetch_range, header_fetch_range, inflate_section,
    plan_range_requests, CoalescedRange, CombinedIndex, Compression, DirectoryEntry,
    EncodeOptions, IndexHeader, IndexType, SectionRange, DIRECTORY_ENTRY_SIZE, FOOTER_SIZE,
    HEADER_SIZE,
};
pub use entity_index::{EntityEntry, EntityIndex};
pub use hnsw::{VectorEntry, VectorSection};
pub use quant::{cosine_similarity, Quantization, QuantizedVectors};
pub use sections::{FtsIndex, GeoIndex, OspIndex, PosIndex, Posting};
