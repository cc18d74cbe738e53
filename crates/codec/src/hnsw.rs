//! HNSW vector section codec
//!
//! Serializes an HNSW graph (vector table plus per-node per-layer neighbor
//! lists) into the VEC section of a combined index. Cycles are represented
//! by entity-id references, never pointers, so the layout is symmetric:
//! every neighbor list — including empty lists at arbitrary layers —
//! survives encode → decode unchanged.
//!
//! ## Layout (Version 1)
//!
//! ```text
//! [version u16 LE][dimensions u32 LE][m u32 LE][ef_construction u32 LE]
//! [entry_count u32 LE]
//! per entry, in stored order:
//!   [varint id_len][entity_id][varint pred_len][predicate]
//!   [dimensions × f32 LE]
//!   [varint layer_count]
//!   per layer: [varint neighbor_count][neighbor ids, varint-length-prefixed]
//! ```
//!
//! The entry point is not stored: it is recoverable as the entry with the
//! maximum layer count, ties broken by stored order.

use crate::varint::{write_string, write_varint, ByteReader};
use trellis_core::{Error, Result};

const VERSION: u16 = 1;

/// One node of the serialized HNSW graph.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorEntry {
    /// Entity the vector belongs to
    pub entity_id: String,
    /// Predicate the embedding was derived from
    pub predicate: String,
    /// The embedding itself
    pub vector: Vec<f32>,
    /// Neighbor ids per layer; `layers.len()` is the node's layer count
    pub layers: Vec<Vec<String>>,
}

/// The VEC section: HNSW parameters plus the node table.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorSection {
    /// Dimensionality of every vector
    pub dimensions: u32,
    /// Max connections per layer
    pub m: u32,
    /// Build-time beam width
    pub ef_construction: u32,
    /// Nodes in insertion order
    pub entries: Vec<VectorEntry>,
}

impl VectorSection {
    /// Create a section, validating vector dimensionality.
    pub fn new(
        dimensions: u32,
        m: u32,
        ef_construction: u32,
        entries: Vec<VectorEntry>,
    ) -> Result<Self> {
        for e in &entries {
            if e.vector.len() != dimensions as usize {
                return Err(Error::bad_input(format!(
                    "vector for {:?} has {} dimensions, expected {}",
                    e.entity_id,
                    e.vector.len(),
                    dimensions
                )));
            }
        }
        Ok(VectorSection {
            dimensions,
            m,
            ef_construction,
            entries,
        })
    }

    /// The graph entry point: max layer count, ties by insertion order.
    pub fn entry_point(&self) -> Option<&VectorEntry> {
        let mut best: Option<&VectorEntry> = None;
        for e in &self.entries {
            match best {
                Some(b) if e.layers.len() <= b.layers.len() => {}
                _ => best = Some(e),
            }
        }
        best
    }

    /// Serialize to the section payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&VERSION.to_le_bytes());
        buf.extend_from_slice(&self.dimensions.to_le_bytes());
        buf.extend_from_slice(&self.m.to_le_bytes());
        buf.extend_from_slice(&self.ef_construction.to_le_bytes());
        buf.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());
        for e in &self.entries {
            write_string(&mut buf, &e.entity_id);
            write_string(&mut buf, &e.predicate);
            for &x in &e.vector {
                buf.extend_from_slice(&x.to_le_bytes());
            }
            write_varint(&mut buf, e.layers.len() as u64);
            for layer in &e.layers {
                write_varint(&mut buf, layer.len() as u64);
                for n in layer {
                    write_string(&mut buf, n);
                }
            }
        }
        buf
    }

    /// Parse a section payload.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(bytes);
        let version = r.read_u16()?;
        if version != VERSION {
            return Err(Error::bad_format(format!(
                "unsupported VEC section version {}",
                version
            )));
        }
        let dimensions = r.read_u32()?;
        let m = r.read_u32()?;
        let ef_construction = r.read_u32()?;
        let entry_count = r.read_u32()? as usize;

        let mut entries = Vec::with_capacity(entry_count);
        for _ in 0..entry_count {
            let entity_id = r.read_string()?;
            let predicate = r.read_string()?;
            let mut vector = Vec::with_capacity(dimensions as usize);
            for _ in 0..dimensions {
                vector.push(r.read_f32()?);
            }
            let layer_count = r.read_varint()? as usize;
            let mut layers = Vec::with_capacity(layer_count);
            for _ in 0..layer_count {
                let n = r.read_varint()? as usize;
                let mut neighbors = Vec::with_capacity(n);
                for _ in 0..n {
                    neighbors.push(r.read_string()?);
                }
                layers.push(neighbors);
            }
            entries.push(VectorEntry {
                entity_id,
                predicate,
                vector,
                layers,
            });
        }
        if r.remaining() != 0 {
            return Err(Error::corrupt("trailing bytes after VEC section"));
        }
        VectorSection::new(dimensions, m, ef_construction, entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> VectorSection {
        VectorSection::new(
            4,
            16,
            200,
            vec![
                VectorEntry {
                    entity_id: "http://x/a".into(),
                    predicate: "embedding".into(),
                    vector: vec![0.1, 0.2, 0.3, 0.4],
                    layers: vec![
                        vec!["http://x/b".into(), "http://x/c".into()],
                        vec!["http://x/b".into()],
                        vec![], // empty top layer: this node is the entry point
                    ],
                },
                VectorEntry {
                    entity_id: "http://x/b".into(),
                    predicate: "embedding".into(),
                    vector: vec![0.5, 0.6, 0.7, 0.8],
                    layers: vec![vec!["http://x/a".into(), "http://x/c".into()]],
                },
                VectorEntry {
                    entity_id: "http://x/c".into(),
                    predicate: "embedding".into(),
                    vector: vec![-0.1, -0.2, -0.3, -0.4],
                    layers: vec![vec!["http://x/a".into()], vec![]],
                },
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_round_trip_preserves_empty_layers() {
        let section = sample();
        let back = VectorSection::decode(&section.encode()).unwrap();
        assert_eq!(back, section);
        assert_eq!(back.entries[0].layers.len(), 3);
        assert!(back.entries[0].layers[2].is_empty());
        assert!(back.entries[2].layers[1].is_empty());
    }

    #[test]
    fn test_entry_point_is_max_layer() {
        let section = sample();
        assert_eq!(section.entry_point().unwrap().entity_id, "http://x/a");
    }

    #[test]
    fn test_entry_point_tie_breaks_by_insertion_order() {
        let section = VectorSection::new(
            1,
            8,
            100,
            vec![
                VectorEntry {
                    entity_id: "http://x/first".into(),
                    predicate: "embedding".into(),
                    vector: vec![1.0],
                    layers: vec![vec![], vec![]],
                },
                VectorEntry {
                    entity_id: "http://x/second".into(),
                    predicate: "embedding".into(),
                    vector: vec![2.0],
                    layers: vec![vec![], vec![]],
                },
            ],
        )
        .unwrap();
        assert_eq!(section.entry_point().unwrap().entity_id, "http://x/first");
    }

    #[test]
    fn test_entry_point_of_empty_section() {
        let section = VectorSection::new(4, 16, 200, vec![]).unwrap();
        assert!(section.entry_point().is_none());
    }

    #[test]
    fn test_zero_layer_node_round_trips() {
        let section = VectorSection::new(
            2,
            8,
            100,
            vec![VectorEntry {
                entity_id: "http://x/lonely".into(),
                predicate: "embedding".into(),
                vector: vec![0.0, 1.0],
                layers: vec![],
            }],
        )
        .unwrap();
        let back = VectorSection::decode(&section.encode()).unwrap();
        assert_eq!(back, section);
        assert!(back.entries[0].layers.is_empty());
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let err = VectorSection::new(
            3,
            8,
            100,
            vec![VectorEntry {
                entity_id: "http://x/a".into(),
                predicate: "embedding".into(),
                vector: vec![1.0, 2.0],
                layers: vec![],
            }],
        );
        assert!(matches!(err, Err(Error::BadInput(_))));
    }

    #[test]
    fn test_truncated_is_corrupt() {
        let bytes = sample().encode();
        assert!(VectorSection::decode(&bytes[..bytes.len() - 3]).is_err());
    }
}
