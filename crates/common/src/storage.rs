//! Blob storage for uploaded images
//!
//! The inference engine only ever reads through [`BlobStore::load_bytes`];
//! the job server also writes and deletes. Paths handed out by the store are
//! opaque strings that round-trip through the job record.

use crate::error::{NeuroPixelError, Result};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Byte storage keyed by path
pub trait BlobStore: Send + Sync {
    /// Read the whole object. Missing objects are `NotFound`.
    fn load_bytes(&self, path: &str) -> Result<Vec<u8>>;

    /// Store `bytes` under `name` and return the path to record
    fn put_bytes(&self, name: &str, bytes: &[u8]) -> Result<String>;

    /// Delete the object. Returns `false` when it did not exist.
    fn delete(&self, path: &str) -> Result<bool>;
}

/// Blob store backed by a local directory
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    /// Open (and create if needed) a store rooted at `root`
    pub fn new<P: Into<PathBuf>>(root: P) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        debug!("Blob store rooted at {}", root.display());
        Ok(Self { root })
    }

    /// Root directory of the store
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, name: &str) -> Result<PathBuf> {
        let candidate = Path::new(name);
        let is_plain_name = candidate.components().count() == 1
            && matches!(candidate.components().next(), Some(Component::Normal(_)));
        if !is_plain_name {
            return Err(NeuroPixelError::invalid_input(format!(
                "Invalid object name: {}",
                name
            )));
        }
        Ok(self.root.join(candidate))
    }
}

impl BlobStore for LocalBlobStore {
    fn load_bytes(&self, path: &str) -> Result<Vec<u8>> {
        std::fs::read(path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => NeuroPixelError::not_found(format!("File not found: {}", path)),
            _ => NeuroPixelError::Io(e),
        })
    }

    fn put_bytes(&self, name: &str, bytes: &[u8]) -> Result<String> {
        let path = self.object_path(name)?;
        std::fs::write(&path, bytes)?;
        debug!("Stored {} bytes at {}", bytes.len(), path.display());
        Ok(path.to_string_lossy().into_owned())
    }

    fn delete(&self, path: &str) -> Result<bool> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(NeuroPixelError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_load_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path().join("uploads")).unwrap();

        let path = store.put_bytes("a.png", b"png-bytes").unwrap();
        assert_eq!(store.load_bytes(&path).unwrap(), b"png-bytes");

        assert!(store.delete(&path).unwrap());
        assert!(!store.delete(&path).unwrap());
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path()).unwrap();
        let missing = dir.path().join("missing.jpg");

        let err = store.load_bytes(&missing.to_string_lossy()).unwrap_err();
        assert!(matches!(err, NeuroPixelError::NotFound(_)));
        assert!(err.to_string().contains("missing.jpg"));
    }

    #[test]
    fn test_rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path()).unwrap();

        assert!(store.put_bytes("../escape.png", b"x").is_err());
        assert!(store.put_bytes("nested/dir.png", b"x").is_err());
    }
}
