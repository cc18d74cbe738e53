//! Blob storage and the edge index reader
//!
//! The [`BlobStore`] trait is the only I/O boundary in the core: chunk
//! blobs, CDC event logs, and combined index files all move through it.
//! [`IndexReader`] is the edge-side consumer, loading index sections with
//! bounded header fetches and coalesced range requests.

pub mod blob;
pub mod fs;
pub mod reader;
pub mod testing;

pub use blob::{BlobStore, MemoryBlobStore};
pub use fs::FsBlobStore;
pub use reader::IndexReader;
pub use testing::{FailureMode, FlakyStore};
