//! Index builder
//!
//! Folds acknowledged CDC events into the per-namespace secondary-index
//! state and materializes a [`CombinedIndex`] from it at publish time.
//! The builder carries the full binding state for its namespace, so every
//! published generation reflects a totally-ordered merge of all events
//! applied so far — a newer generation is always a superset of older ones.

use crate::event::{CdcEvent, SequencedEvent};
use std::collections::BTreeMap;
use trellis_codec::hnsw::VectorSection;
use trellis_codec::sections::{FtsIndex, GeoIndex, OspIndex, PosIndex, Posting};
use trellis_codec::CombinedIndex;
use trellis_core::ObjectValue;

/// Accumulated index state for one namespace.
#[derive(Debug, Clone, Default)]
pub struct IndexBuilder {
    /// (subject, predicate) → current value; tombstones remove the binding
    bindings: BTreeMap<(String, String), ObjectValue>,
    /// Optional HNSW section supplied by the vector indexer
    vectors: Option<VectorSection>,
    applied: u64,
}

impl IndexBuilder {
    /// An empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one event into the binding state.
    pub fn apply(&mut self, event: &SequencedEvent) {
        let triple = event.event.triple();
        let key = (triple.subject.clone(), triple.predicate.clone());
        match &event.event {
            CdcEvent::Insert { .. } | CdcEvent::Update { .. } => {
                if triple.object.is_tombstone() {
                    self.bindings.remove(&key);
                } else {
                    self.bindings.insert(key, triple.object.clone());
                }
            }
            CdcEvent::Delete { .. } => {
                self.bindings.remove(&key);
            }
        }
        self.applied += 1;
    }

    /// Events applied since creation.
    pub fn applied(&self) -> u64 {
        self.applied
    }

    /// Live (non-tombstoned) bindings.
    pub fn binding_count(&self) -> usize {
        self.bindings.len()
    }

    /// Attach an HNSW section for the next publications.
    pub fn set_vectors(&mut self, vectors: VectorSection) {
        self.vectors = Some(vectors);
    }

    /// Materialize the combined index from the current state.
    pub fn build(&self, namespace: &str) -> CombinedIndex {
        let mut pos: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut osp: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut fts = FtsIndex::default();
        let mut geo = GeoIndex::default();

        for ((subject, predicate), value) in &self.bindings {
            push_unique(pos.entry(predicate.clone()).or_default(), subject);
            if let Some(hash) = value_hash(value) {
                let keyed = format!("{}:{}", predicate, hash);
                push_unique(pos.entry(keyed).or_default(), subject);
            }
            match value {
                ObjectValue::Ref(target) => {
                    push_unique(osp.entry(target.clone()).or_default(), subject);
                }
                ObjectValue::GeoPoint { lat, lng } => {
                    geo.insert(subject, *lat, *lng);
                }
                ObjectValue::String(text) => {
                    for term in tokenize(text) {
                        let postings = fts.entries.entry(term).or_default();
                        if !postings
                            .iter()
                            .any(|p| p.entity_id == *subject && p.predicate == *predicate)
                        {
                            postings.push(Posting {
                                entity_id: subject.clone(),
                                predicate: predicate.clone(),
                                score: 1.0,
                            });
                        }
                    }
                }
                _ => {}
            }
        }

        let mut index = CombinedIndex::new(namespace);
        index.pos = Some(PosIndex { entries: pos });
        index.osp = Some(OspIndex { entries: osp });
        index.fts = Some(fts);
        index.geo = Some(geo);
        index.vectors = self.vectors.clone();
        index
    }
}

fn push_unique(list: &mut Vec<String>, value: &str) {
    if !list.iter().any(|v| v == value) {
        list.push(value.to_string());
    }
}

/// Short stable hash of a scalar value for `predicate:valueHash` keys.
fn value_hash(value: &ObjectValue) -> Option<String> {
    let canonical = match value {
        ObjectValue::String(s) => s.clone(),
        ObjectValue::Int32(v) => v.to_string(),
        ObjectValue::Int64(v) => v.to_string(),
        ObjectValue::Bool(v) => v.to_string(),
        ObjectValue::Timestamp(v) => v.to_string(),
        _ => return None,
    };
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&[value.object_type().code()]);
    hasher.update(canonical.as_bytes());
    Some(format!("{:08x}", hasher.finalize()))
}

/// Whitespace/punctuation tokenizer for FTS state.
///
/// The real tokenizer and ranker live outside the core; this produces the
/// serialized postings shape they feed in.
fn tokenize(text: &str) -> Vec<String> {
    let mut terms: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 2)
        .map(|t| t.to_lowercase())
        .collect();
    terms.sort();
    terms.dedup();
    terms
}
