//! Edge index reader
//!
//! Loads combined index files from blob storage the way an edge node
//! does: one bounded prefix fetch for the header and directory, then
//! coalesced byte-range requests for exactly the sections the caller
//! wants.

use crate::blob::BlobStore;
use std::sync::Arc;
use tracing::debug;
use trellis_codec::container::{
    coalesce, decode_header, default_header_fetch_range, inflate_section, plan_range_requests,
    CombinedIndex, IndexHeader, IndexType,
};
use trellis_codec::hnsw::VectorSection;
use trellis_codec::sections::{FtsIndex, GeoIndex, OspIndex, PosIndex};
use trellis_core::limits::DEFAULT_COALESCE_GAP;
use trellis_core::{Error, Result};

/// Reader over combined index files in a blob store.
pub struct IndexReader {
    store: Arc<dyn BlobStore>,
    /// Gap under which adjacent section ranges merge into one request
    coalesce_gap: u64,
    /// Bytes fetched for the header + directory
    header_range: u64,
}

impl IndexReader {
    /// A reader with default range-planning parameters.
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        IndexReader {
            store,
            coalesce_gap: DEFAULT_COALESCE_GAP,
            header_range: default_header_fetch_range(),
        }
    }

    /// Override the coalescing gap.
    pub fn with_coalesce_gap(mut self, gap: u64) -> Self {
        self.coalesce_gap = gap;
        self
    }

    /// Fetch and decode the header + directory of an index file.
    pub fn load_header(&self, key: &str) -> Result<IndexHeader> {
        let prefix = self.store.get_range(key, 0, self.header_range)?;
        decode_header(&prefix)
    }

    /// Fetch the requested sections with coalesced range requests.
    ///
    /// Returns a [`CombinedIndex`] populated with only the wanted sections
    /// that are present in the file.
    pub fn load_sections(
        &self,
        key: &str,
        header: &IndexHeader,
        wanted: &[IndexType],
    ) -> Result<CombinedIndex> {
        let plan = plan_range_requests(header, wanted);
        let requests = coalesce(&plan, self.coalesce_gap);
        debug!(
            target: "trellis::reader",
            key,
            sections = plan.len(),
            requests = requests.len(),
            "fetching index sections"
        );

        let mut index = CombinedIndex::new(header.namespace.clone());
        for request in &requests {
            let fetched = self.store.get_range(key, request.offset, request.length)?;
            if fetched.len() as u64 != request.length {
                return Err(Error::corrupt(format!(
                    "range fetch returned {} bytes, wanted {}",
                    fetched.len(),
                    request.length
                )));
            }
            for index_type in &request.types {
                let entry = header
                    .entry(*index_type)
                    .ok_or_else(|| Error::NotFound(format!("section {:?}", index_type)))?;
                let rel = (entry.offset - request.offset) as usize;
                let raw = &fetched[rel..rel + entry.compressed_size as usize];
                let plain = inflate_section(entry, raw)?;
                match index_type {
                    IndexType::Pos => index.pos = Some(PosIndex::decode(&plain)?),
                    IndexType::Osp => index.osp = Some(OspIndex::decode(&plain)?),
                    IndexType::Fts => index.fts = Some(FtsIndex::decode(&plain)?),
                    IndexType::Geo => index.geo = Some(GeoIndex::decode(&plain)?),
                    IndexType::Vec => index.vectors = Some(VectorSection::decode(&plain)?),
                }
            }
        }
        Ok(index)
    }

    /// Header + sections in one call.
    pub fn load(&self, key: &str, wanted: &[IndexType]) -> Result<CombinedIndex> {
        let header = self.load_header(key)?;
        self.load_sections(key, &header, wanted)
    }

    /// The latest generation key under a prefix, by lexicographic order.
    ///
    /// Generation keys are zero-padded so lexicographic order equals
    /// numeric order; readers tolerate stale listings.
    pub fn latest_key(&self, prefix: &str) -> Result<Option<String>> {
        let mut keys = self.store.list(prefix)?;
        keys.sort();
        Ok(keys.pop())
    }
}
