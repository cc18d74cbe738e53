//! Filesystem-backed blob store
//!
//! Keys map to paths under a root directory. Writes go through a temp
//! file and an atomic rename so a crashed put never leaves a partial blob
//! behind.

use crate::blob::{clamp_range, BlobStore};
use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::debug;
use trellis_core::{Error, Result};

/// Blob store rooted at a local directory.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(FsBlobStore { root })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        // Keys are slash-separated identifiers, never paths; reject
        // anything that could escape the root.
        if key.is_empty() || key.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..")
        {
            return Err(Error::bad_input(format!("invalid blob key {:?}", key)));
        }
        Ok(self.root.join(key))
    }
}

impl BlobStore for FsBlobStore {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &path)?;
        debug!(target: "trellis::store", key, bytes = bytes.len(), "blob written");
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("blob {}", key)))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn get_range(&self, key: &str, offset: u64, length: u64) -> Result<Vec<u8>> {
        let path = self.path_for(key)?;
        let mut file = match fs::File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(format!("blob {}", key)))
            }
            Err(e) => return Err(e.into()),
        };
        let len = file.metadata()?.len() as usize;
        let (start, end) = clamp_range(len, offset, length)?;
        file.seek(SeekFrom::Start(start as u64))?;
        let mut buf = vec![0u8; end - start];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn head(&self, key: &str) -> Result<u64> {
        let path = self.path_for(key)?;
        match fs::metadata(&path) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("blob {}", key)))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        collect_keys(&self.root, &self.root, &mut keys)?;
        keys.retain(|k| k.starts_with(prefix));
        keys.sort();
        Ok(keys)
    }

    fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn collect_keys(root: &Path, dir: &Path, keys: &mut Vec<String>) -> Result<()> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_keys(root, &path, keys)?;
        } else if path.extension().map(|e| e == "tmp") != Some(true) {
            if let Ok(rel) = path.strip_prefix(root) {
                keys.push(rel.to_string_lossy().replace('\\', "/"));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::open(dir.path()).unwrap();
        store.put("chunk/ns/abc", b"payload").unwrap();
        assert_eq!(store.get("chunk/ns/abc").unwrap(), b"payload");
        assert_eq!(store.head("chunk/ns/abc").unwrap(), 7);
    }

    #[test]
    fn test_range_reads() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::open(dir.path()).unwrap();
        store.put("k", b"0123456789").unwrap();
        assert_eq!(store.get_range("k", 4, 3).unwrap(), b"456");
        assert_eq!(store.get_range("k", 7, 100).unwrap(), b"789");
    }

    #[test]
    fn test_missing_blob_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::open(dir.path()).unwrap();
        assert!(matches!(store.get("absent"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_list_recurses_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::open(dir.path()).unwrap();
        store.put("idx/ns/2", b"b").unwrap();
        store.put("idx/ns/1", b"a").unwrap();
        store.put("cdc/ns/1", b"c").unwrap();
        assert_eq!(
            store.list("idx/").unwrap(),
            vec!["idx/ns/1".to_string(), "idx/ns/2".to_string()]
        );
    }

    #[test]
    fn test_rejects_traversal_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::open(dir.path()).unwrap();
        assert!(store.put("../escape", b"x").is_err());
        assert!(store.put("a//b", b"x").is_err());
        assert!(store.put("", b"x").is_err());
    }
}
