//! Filesystem object store.
//!
//! Layout: `<root>/objects/<bucket>/<key>`. Writes go to `<root>/.tmp` and
//! are renamed into place, so a reader never sees a partial object.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use salsag_ledger::{validate_store_key, ObjectRef, ObjectStore, StoreError, StoreResult};
use tracing::debug;

static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

pub(crate) fn io_error(context: &str, err: io::Error) -> StoreError {
    if err.kind() == io::ErrorKind::NotFound {
        StoreError::not_found(context.to_string())
    } else {
        StoreError::unavailable(format!("{}: {}", context, err))
    }
}

/// Write `bytes` to `dest` via a temp file in `tmp_dir` and a rename.
pub(crate) fn write_atomic(tmp_dir: &Path, dest: &Path, bytes: &[u8]) -> io::Result<()> {
    fs::create_dir_all(tmp_dir)?;
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }

    let temp_path = tmp_dir.join(format!(
        ".tmp.{}.{}",
        std::process::id(),
        TEMP_SEQ.fetch_add(1, Ordering::Relaxed)
    ));

    let result = (|| {
        let mut file = File::create(&temp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&temp_path, dest)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

/// Object store over a local directory, holding one bucket.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
    bucket: String,
}

impl FsObjectStore {
    pub fn new(root: impl AsRef<Path>, bucket: impl Into<String>) -> StoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        let bucket = bucket.into();
        fs::create_dir_all(root.join("objects").join(&bucket))
            .map_err(|e| io_error(&root.display().to_string(), e))?;
        Ok(Self { root, bucket })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Filesystem path for a reference in this store.
    pub fn object_path(&self, reference: &ObjectRef) -> StoreResult<PathBuf> {
        if reference.bucket != self.bucket {
            return Err(StoreError::not_found(reference.to_string()));
        }
        self.key_path(&reference.key)
    }

    fn key_path(&self, key: &str) -> StoreResult<PathBuf> {
        validate_store_key(key).map_err(|e| StoreError::InvalidKey {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        Ok(self.root.join("objects").join(&self.bucket).join(key))
    }
}

impl ObjectStore for FsObjectStore {
    fn put(&self, key: &str, bytes: &[u8]) -> StoreResult<ObjectRef> {
        let path = self.key_path(key)?;
        write_atomic(&self.root.join(".tmp"), &path, bytes)
            .map_err(|e| io_error(&path.display().to_string(), e))?;
        debug!(bucket = %self.bucket, key, size = bytes.len(), "object stored");
        Ok(ObjectRef::new(self.bucket.clone(), key))
    }

    fn get(&self, reference: &ObjectRef) -> StoreResult<Vec<u8>> {
        let path = self.object_path(reference)?;
        fs::read(&path).map_err(|e| io_error(&reference.to_string(), e))
    }

    fn exists(&self, reference: &ObjectRef) -> StoreResult<bool> {
        match self.object_path(reference) {
            Ok(path) => Ok(path.is_file()),
            Err(StoreError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_put_get_nested_key() {
        let tmp = TempDir::new().unwrap();
        let store = FsObjectStore::new(tmp.path(), "staging").unwrap();

        let r = store.put("cosign/app-v1.sig", b"sig").unwrap();
        assert_eq!(r.to_string(), "store://staging/cosign/app-v1.sig");
        assert_eq!(store.get(&r).unwrap(), b"sig");
        assert!(store.exists(&r).unwrap());
        assert!(tmp.path().join("objects/staging/cosign/app-v1.sig").is_file());
    }

    #[test]
    fn test_put_overwrites() {
        let tmp = TempDir::new().unwrap();
        let store = FsObjectStore::new(tmp.path(), "staging").unwrap();
        store.put("a", b"one").unwrap();
        let r = store.put("a", b"two").unwrap();
        assert_eq!(store.get(&r).unwrap(), b"two");
    }

    #[test]
    fn test_missing_and_foreign_refs() {
        let tmp = TempDir::new().unwrap();
        let store = FsObjectStore::new(tmp.path(), "staging").unwrap();

        let missing = ObjectRef::new("staging", "nope");
        assert!(matches!(store.get(&missing), Err(StoreError::NotFound { .. })));
        assert!(!store.exists(&missing).unwrap());

        let foreign = ObjectRef::new("other", "a");
        assert!(matches!(store.get(&foreign), Err(StoreError::NotFound { .. })));
    }

    #[test]
    fn test_rejects_escaping_key() {
        let tmp = TempDir::new().unwrap();
        let store = FsObjectStore::new(tmp.path(), "staging").unwrap();
        assert!(matches!(
            store.put("../../etc/passwd", b"x"),
            Err(StoreError::InvalidKey { .. })
        ));
        assert!(matches!(store.put("a/./b", b"x"), Err(StoreError::InvalidKey { .. })));
    }

    #[test]
    fn test_versioned_keys_nest_without_clashing() {
        let tmp = TempDir::new().unwrap();
        let store = FsObjectStore::new(tmp.path(), "staging").unwrap();
        let parent = store.put("artifacts/app@0a", b"parent").unwrap();
        let child = store.put("artifacts/app/x@0b", b"child").unwrap();
        assert_eq!(store.get(&parent).unwrap(), b"parent");
        assert_eq!(store.get(&child).unwrap(), b"child");
    }

    #[test]
    fn test_no_temp_files_left() {
        let tmp = TempDir::new().unwrap();
        let store = FsObjectStore::new(tmp.path(), "staging").unwrap();
        store.put("a", b"x").unwrap();
        let leftovers = fs::read_dir(tmp.path().join(".tmp")).unwrap().count();
        assert_eq!(leftovers, 0);
    }
}
