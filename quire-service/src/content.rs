//! Content-addressed file storage under the data directory.
//!
//! Document bytes and job outputs (thumbnails, split pages, converted
//! files) live here, keyed by relative paths like `{document_id}/original`.

use std::path::{Path, PathBuf};

use crate::error::StorageError;

pub struct ContentStore {
    root: PathBuf,
}

impl ContentStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            root: data_dir.join("content"),
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    /// Read stored bytes for a key
    pub fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        std::fs::read(self.path_for(key)).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound {
                    key: key.to_string(),
                }
            } else {
                StorageError::Io(e)
            }
        })
    }

    /// Write bytes under a key, creating parent directories as needed
    pub fn put(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(StorageError::Io)?;
        }
        std::fs::write(&path, bytes).map_err(StorageError::Io)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_then_get_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(dir.path());

        store.put("doc-1/original", b"hello").unwrap();
        assert_eq!(store.get("doc-1/original").unwrap(), b"hello");
    }

    #[test]
    fn test_missing_key_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(dir.path());

        match store.get("doc-1/missing") {
            Err(StorageError::NotFound { key }) => assert_eq!(key, "doc-1/missing"),
            other => panic!("expected NotFound, got {:?}", other),
        }
    }
}
