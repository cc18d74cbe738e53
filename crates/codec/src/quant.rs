//! Quantized-vector file codec
//!
//! Stores a set of (id, f32 vector) pairs under one of three quantizations.
//!
//! ## File Format (Version 1)
//!
//! ```text
//! [magic "TRLQUANT" 8B]
//! [version u16 LE]
//! [quantization u8]       — 0=FLOAT32, 1=INT8, 2=BINARY
//! [reserved u8]
//! [dimensions u32 LE]
//! [vector_count u32 LE]
//! [id_table_offset u64 LE]
//! [scale f32 LE, offset f32 LE]   — INT8 only
//! [vector payload: vector_count × dimensions × bytes_per_scalar]
//! [id table: vector_count × (varint len + UTF-8 bytes)]
//! ```
//!
//! INT8 uses one global affine mapping over all scalars in the set:
//! `scale = (max - min) / 255`, `offset = min`,
//! `q = clamp(round((v - offset) / scale) - 128, -128, 127)`.
//! BINARY packs one bit per dimension (bit set iff `v >= 0`), eight
//! dimensions per byte, low bit first.

use crate::varint::{write_varint, ByteReader};
use trellis_core::{Error, Result};

const MAGIC: &[u8; 8] = b"TRLQUANT";
const VERSION: u16 = 1;

/// Fixed header size without the INT8 scale/offset extension.
const BASE_HEADER: usize = 8 + 2 + 1 + 1 + 4 + 4 + 8;

/// Vector quantization modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Quantization {
    /// Verbatim little-endian IEEE 754, exact round-trip
    Float32 = 0,
    /// Global affine map to one signed byte per scalar (≈4× smaller)
    Int8 = 1,
    /// One bit per dimension, sign only (≈32× smaller)
    Binary = 2,
}

impl Quantization {
    fn from_code(code: u8) -> Result<Self> {
        Ok(match code {
            0 => Quantization::Float32,
            1 => Quantization::Int8,
            2 => Quantization::Binary,
            other => {
                return Err(Error::bad_format(format!(
                    "unknown quantization code {}",
                    other
                )))
            }
        })
    }

    /// Payload bytes per vector at a given dimensionality.
    pub fn bytes_per_vector(self, dimensions: usize) -> usize {
        match self {
            Quantization::Float32 => dimensions * 4,
            Quantization::Int8 => dimensions,
            Quantization::Binary => (dimensions + 7) / 8,
        }
    }
}

/// A decoded quantized-vector file.
///
/// Holds the packed payload; scalars are dequantized on access.
#[derive(Debug, Clone)]
pub struct QuantizedVectors {
    quantization: Quantization,
    dimensions: usize,
    scale: f32,
    offset: f32,
    payload: Vec<u8>,
    ids: Vec<String>,
}

impl QuantizedVectors {
    /// Encode a vector set into the file format.
    ///
    /// Fails with `BadInput` on an empty set or ragged dimensions.
    pub fn encode(vectors: &[(String, Vec<f32>)], quantization: Quantization) -> Result<Vec<u8>> {
        if vectors.is_empty() {
            return Err(Error::bad_input("cannot encode an empty vector set"));
        }
        let dimensions = vectors[0].1.len();
        if dimensions == 0 {
            return Err(Error::bad_input("vectors must have at least one dimension"));
        }
        for (id, v) in vectors {
            if v.len() != dimensions {
                return Err(Error::bad_input(format!(
                    "vector {:?} has {} dimensions, expected {}",
                    id,
                    v.len(),
                    dimensions
                )));
            }
        }

        // INT8: one affine map across every scalar in the set.
        let (scale, offset) = match quantization {
            Quantization::Int8 => {
                let mut min_v = f32::INFINITY;
                let mut max_v = f32::NEG_INFINITY;
                for (_, v) in vectors {
                    for &x in v {
                        min_v = min_v.min(x);
                        max_v = max_v.max(x);
                    }
                }
                ((max_v - min_v) / 255.0, min_v)
            }
            _ => (0.0, 0.0),
        };

        let bytes_per_vector = quantization.bytes_per_vector(dimensions);
        let header_len = BASE_HEADER
            + if quantization == Quantization::Int8 {
                8
            } else {
                0
            };
        let id_table_offset = (header_len + vectors.len() * bytes_per_vector) as u64;

        let mut buf = Vec::with_capacity(id_table_offset as usize + vectors.len() * 16);
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&VERSION.to_le_bytes());
        buf.push(quantization as u8);
        buf.push(0); // reserved
        buf.extend_from_slice(&(dimensions as u32).to_le_bytes());
        buf.extend_from_slice(&(vectors.len() as u32).to_le_bytes());
        buf.extend_from_slice(&id_table_offset.to_le_bytes());
        if quantization == Quantization::Int8 {
            buf.extend_from_slice(&scale.to_le_bytes());
            buf.extend_from_slice(&offset.to_le_bytes());
        }

        for (_, v) in vectors {
            match quantization {
                Quantization::Float32 => {
                    for &x in v {
                        buf.extend_from_slice(&x.to_le_bytes());
                    }
                }
                Quantization::Int8 => {
                    for &x in v {
                        buf.push(quantize_int8(x, scale, offset) as u8);
                    }
                }
                Quantization::Binary => {
                    let mut packed = vec![0u8; bytes_per_vector];
                    for (k, &x) in v.iter().enumerate() {
                        if x >= 0.0 {
                            packed[k / 8] |= 1 << (k % 8);
                        }
                    }
                    buf.extend_from_slice(&packed);
                }
            }
        }

        for (id, _) in vectors {
            write_varint(&mut buf, id.len() as u64);
            buf.extend_from_slice(id.as_bytes());
        }

        Ok(buf)
    }

    /// Decode a quantized-vector file.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < BASE_HEADER {
            return Err(Error::corrupt("truncated quantized-vector header"));
        }
        if &bytes[0..8] != MAGIC {
            return Err(Error::bad_format("quantized-vector magic mismatch"));
        }
        let mut r = ByteReader::new(&bytes[8..]);
        let version = r.read_u16()?;
        if version != VERSION {
            return Err(Error::bad_format(format!(
                "unsupported quantized-vector version {}",
                version
            )));
        }
        let quantization = Quantization::from_code(r.read_bytes(1)?[0])?;
        let _reserved = r.read_bytes(1)?;
        let dimensions = r.read_u32()? as usize;
        let vector_count = r.read_u32()? as usize;
        let id_table_offset = r.read_u64()? as usize;
        let (scale, offset) = if quantization == Quantization::Int8 {
            (r.read_f32()?, r.read_f32()?)
        } else {
            (0.0, 0.0)
        };

        let payload_start = 8 + r.position();
        let payload_len = vector_count * quantization.bytes_per_vector(dimensions);
        if id_table_offset != payload_start + payload_len {
            return Err(Error::corrupt(format!(
                "id table offset {} does not follow payload ({} + {})",
                id_table_offset, payload_start, payload_len
            )));
        }
        if bytes.len() < id_table_offset {
            return Err(Error::corrupt("truncated quantized-vector payload"));
        }
        let payload = bytes[payload_start..id_table_offset].to_vec();

        let mut ids = Vec::with_capacity(vector_count);
        let mut idr = ByteReader::new(&bytes[id_table_offset..]);
        for _ in 0..vector_count {
            ids.push(idr.read_string()?);
        }

        Ok(QuantizedVectors {
            quantization,
            dimensions,
            scale,
            offset,
            payload,
            ids,
        })
    }

    /// Quantization mode of the set.
    pub fn quantization(&self) -> Quantization {
        self.quantization
    }

    /// Dimensionality of every vector in the set.
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Number of stored vectors.
    pub fn vector_count(&self) -> usize {
        self.ids.len()
    }

    /// INT8 affine scale (0 for other quantizations).
    pub fn scale(&self) -> f32 {
        self.scale
    }

    /// Id of vector `i`.
    pub fn id(&self, i: usize) -> Result<&str> {
        self.ids
            .get(i)
            .map(|s| s.as_str())
            .ok_or_else(|| Error::NotFound(format!("vector index {}", i)))
    }

    /// Raw packed bytes of vector `i`.
    pub fn raw(&self, i: usize) -> Result<&[u8]> {
        let per = self.quantization.bytes_per_vector(self.dimensions);
        let start = i * per;
        if i >= self.vector_count() {
            return Err(Error::NotFound(format!("vector index {}", i)));
        }
        Ok(&self.payload[start..start + per])
    }

    /// Vector `i` dequantized to f32.
    ///
    /// FLOAT32 is bit-exact; INT8 is exact to within `scale / 2` per
    /// scalar; BINARY yields ±1.0.
    pub fn get_vector_f32(&self, i: usize) -> Result<Vec<f32>> {
        let raw = self.raw(i)?;
        let mut out = Vec::with_capacity(self.dimensions);
        match self.quantization {
            Quantization::Float32 => {
                for chunk in raw.chunks_exact(4) {
                    out.push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
                }
            }
            Quantization::Int8 => {
                for &b in raw {
                    let q = b as i8;
                    out.push((q as f32 + 128.0) * self.scale + self.offset);
                }
            }
            Quantization::Binary => {
                for k in 0..self.dimensions {
                    let bit = raw[k / 8] >> (k % 8) & 1;
                    out.push(if bit == 1 { 1.0 } else { -1.0 });
                }
            }
        }
        Ok(out)
    }

    /// Hamming distance between two BINARY vectors, over packed bytes.
    pub fn hamming_distance(&self, i: usize, j: usize) -> Result<u32> {
        if self.quantization != Quantization::Binary {
            return Err(Error::bad_input(
                "hamming distance requires BINARY quantization",
            ));
        }
        let a = self.raw(i)?;
        let b = self.raw(j)?;
        Ok(a.iter()
            .zip(b.iter())
            .map(|(x, y)| (x ^ y).count_ones())
            .sum())
    }
}

/// Quantize a scalar under the set's affine map.
fn quantize_int8(v: f32, scale: f32, offset: f32) -> i8 {
    if scale == 0.0 {
        // Degenerate set: every scalar equal; dequant returns `offset`.
        return -128;
    }
    let q = ((v - offset) / scale).round() as i64 - 128;
    q.clamp(-128, 127) as i8
}

/// Cosine similarity; 0 when either vector has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut na = 0.0f32;
    let mut nb = 0.0f32;
    for (&x, &y) in a.iter().zip(b.iter()) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}
