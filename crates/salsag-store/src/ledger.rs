//! Filesystem ledger store.
//!
//! Layout under the ledger root:
//! - `records/<sha256(object_key)>.json`: one canonical-JSON record per key
//! - `audit/<sha256(object_key)>.jsonl`: append-only verification events
//!
//! File names are hashed so arbitrary keys never touch path syntax.
//! Conditional writes and audit appends run under [`LedgerLock`].

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use salsag_ledger::{AuditEvent, LedgerStore, StoreError, StoreResult, TrustRecord, WriteCondition};
use sha2::{Digest as _, Sha256};
use tracing::{debug, warn};

use crate::lock::{LedgerLock, LockError};
use crate::object::{io_error, write_atomic};

/// Default bound on waiting for the ledger lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct FsLedgerStore {
    root: PathBuf,
    lock_timeout: Duration,
}

impl FsLedgerStore {
    pub fn new(root: impl AsRef<Path>) -> StoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        for sub in ["records", "audit"] {
            fs::create_dir_all(root.join(sub)).map_err(|e| io_error(&root.display().to_string(), e))?;
        }
        Ok(Self {
            root,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        })
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn key_hash(object_key: &str) -> String {
        hex::encode(Sha256::digest(object_key.as_bytes()))
    }

    fn record_path(&self, object_key: &str) -> PathBuf {
        self.root
            .join("records")
            .join(format!("{}.json", Self::key_hash(object_key)))
    }

    fn audit_path(&self, object_key: &str) -> PathBuf {
        self.root
            .join("audit")
            .join(format!("{}.jsonl", Self::key_hash(object_key)))
    }

    fn lock(&self) -> StoreResult<LedgerLock> {
        LedgerLock::acquire(&self.root, self.lock_timeout).map_err(|e| match e {
            LockError::Timeout(after) => StoreError::Timeout { after },
            LockError::Io(err) => io_error("ledger lock", err),
        })
    }

    fn read_record(path: &Path) -> StoreResult<Option<TrustRecord>> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(&path.display().to_string(), e)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StoreError::Corrupt {
                reference: path.display().to_string(),
                message: e.to_string(),
            })
    }
}

impl LedgerStore for FsLedgerStore {
    fn put_record(&self, record: &TrustRecord, condition: WriteCondition) -> StoreResult<()> {
        let path = self.record_path(&record.object_key);
        let bytes = serde_json_canonicalizer::to_vec(record).map_err(|e| StoreError::Corrupt {
            reference: record.object_key.clone(),
            message: format!("record not serializable: {}", e),
        })?;

        let _guard = self.lock()?;
        let current = Self::read_record(&path)?.map(|r| r.revision);
        let holds = match (condition, current) {
            (WriteCondition::Absent, None) => true,
            (WriteCondition::Revision(expected), Some(actual)) => expected == actual,
            _ => false,
        };
        if !holds {
            debug!(object_key = %record.object_key, ?condition, ?current, "conditional write rejected");
            return Err(StoreError::Conflict {
                key: record.object_key.clone(),
            });
        }

        write_atomic(&self.root.join(".tmp"), &path, &bytes)
            .map_err(|e| io_error(&path.display().to_string(), e))
    }

    fn get_record(&self, object_key: &str) -> StoreResult<Option<TrustRecord>> {
        let record = Self::read_record(&self.record_path(object_key))?;
        match record {
            // A hash collision would surface as a foreign key; treat it as corrupt.
            Some(r) if r.object_key != object_key => Err(StoreError::Corrupt {
                reference: object_key.to_string(),
                message: format!("record file holds key {:?}", r.object_key),
            }),
            other => Ok(other),
        }
    }

    fn scan(&self) -> StoreResult<Vec<TrustRecord>> {
        let dir = self.root.join("records");
        let entries = fs::read_dir(&dir).map_err(|e| io_error(&dir.display().to_string(), e))?;

        let mut records = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| io_error(&dir.display().to_string(), e))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(record) = Self::read_record(&path)? {
                records.push(record);
            }
        }
        records.sort_by(|a, b| a.object_key.cmp(&b.object_key));
        Ok(records)
    }

    fn append_audit(&self, event: &AuditEvent) -> StoreResult<()> {
        let path = self.audit_path(&event.object_key);
        let mut line = serde_json::to_vec(event).map_err(|e| StoreError::Corrupt {
            reference: event.object_key.clone(),
            message: e.to_string(),
        })?;
        line.push(b'\n');

        let _guard = self.lock()?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| io_error(&path.display().to_string(), e))?;
        file.write_all(&line)
            .map_err(|e| io_error(&path.display().to_string(), e))
    }

    fn audit_trail(&self, object_key: &str) -> StoreResult<Vec<AuditEvent>> {
        let path = self.audit_path(object_key);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&path.display().to_string(), e)),
        };

        let mut events = Vec::new();
        for (n, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditEvent>(line) {
                Ok(event) => events.push(event),
                // A torn trailing line from a crashed writer is skipped, not fatal.
                Err(e) => warn!(path = %path.display(), line = n + 1, error = %e, "skipping unreadable audit line"),
            }
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use salsag_ledger::{digest, ObjectRef, TrustStatus, Verdict};
    use tempfile::TempDir;

    fn record(key: &str, revision: u64) -> TrustRecord {
        TrustRecord {
            object_key: key.to_string(),
            digest: digest(b"b1"),
            signature_ref: ObjectRef::new("staging", "cosign/a.sig"),
            certificate_ref: ObjectRef::new("staging", "cosign/a.pem"),
            sbom_ref: None,
            provenance_ref: None,
            signed_at: Utc::now(),
            signer_identity: "ci".to_string(),
            transparency_log_ref: None,
            status: TrustStatus::Recorded,
            artifact_ref: None,
            revision,
            last_verified_at: None,
        }
    }

    #[test]
    fn test_put_get_roundtrip_and_scan() {
        let tmp = TempDir::new().unwrap();
        let store = FsLedgerStore::new(tmp.path()).unwrap();

        store.put_record(&record("b-key", 1), WriteCondition::Absent).unwrap();
        store.put_record(&record("a-key", 1), WriteCondition::Absent).unwrap();

        let got = store.get_record("b-key").unwrap().unwrap();
        assert_eq!(got.object_key, "b-key");
        assert!(store.get_record("missing").unwrap().is_none());

        let keys: Vec<_> = store.scan().unwrap().into_iter().map(|r| r.object_key).collect();
        assert_eq!(keys, vec!["a-key", "b-key"]);
    }

    #[test]
    fn test_conditional_write_conflicts() {
        let tmp = TempDir::new().unwrap();
        let store = FsLedgerStore::new(tmp.path()).unwrap();
        store.put_record(&record("k", 1), WriteCondition::Absent).unwrap();

        assert!(matches!(
            store.put_record(&record("k", 1), WriteCondition::Absent),
            Err(StoreError::Conflict { .. })
        ));
        assert!(matches!(
            store.put_record(&record("k", 5), WriteCondition::Revision(4)),
            Err(StoreError::Conflict { .. })
        ));
        store.put_record(&record("k", 2), WriteCondition::Revision(1)).unwrap();
        assert_eq!(store.get_record("k").unwrap().unwrap().revision, 2);
    }

    #[test]
    fn test_record_file_is_canonical_json() {
        let tmp = TempDir::new().unwrap();
        let store = FsLedgerStore::new(tmp.path()).unwrap();
        let r = record("k", 1);
        store.put_record(&r, WriteCondition::Absent).unwrap();

        let on_disk = fs::read(store.record_path("k")).unwrap();
        assert_eq!(on_disk, serde_json_canonicalizer::to_vec(&r).unwrap());
    }

    #[test]
    fn test_corrupt_record_reported() {
        let tmp = TempDir::new().unwrap();
        let store = FsLedgerStore::new(tmp.path()).unwrap();
        fs::write(store.record_path("k"), b"{not json").unwrap();
        assert!(matches!(store.get_record("k"), Err(StoreError::Corrupt { .. })));
    }

    #[test]
    fn test_audit_trail_appends_in_order() {
        let tmp = TempDir::new().unwrap();
        let store = FsLedgerStore::new(tmp.path()).unwrap();

        let first = AuditEvent::from_verdict(&Verdict::not_in_ledger("k"));
        let second = AuditEvent::from_verdict(&Verdict::checksum_mismatch("k", digest(b"x"), digest(b"y")));
        store.append_audit(&first).unwrap();
        store.append_audit(&second).unwrap();

        let trail = store.audit_trail("k").unwrap();
        assert_eq!(trail.len(), 2);
        assert_eq!(trail[0].event_id, first.event_id);
        assert_eq!(trail[1].event_id, second.event_id);
        assert!(store.audit_trail("other").unwrap().is_empty());
    }

    #[test]
    fn test_torn_audit_line_skipped() {
        let tmp = TempDir::new().unwrap();
        let store = FsLedgerStore::new(tmp.path()).unwrap();
        store
            .append_audit(&AuditEvent::from_verdict(&Verdict::not_in_ledger("k")))
            .unwrap();
        let mut f = OpenOptions::new().append(true).open(store.audit_path("k")).unwrap();
        f.write_all(b"{\"event_id\":").unwrap();

        assert_eq!(store.audit_trail("k").unwrap().len(), 1);
    }

    #[test]
    #[cfg(unix)]
    fn test_lock_timeout_maps_to_store_timeout() {
        let tmp = TempDir::new().unwrap();
        let store = FsLedgerStore::new(tmp.path())
            .unwrap()
            .with_lock_timeout(Duration::from_millis(50));
        let _held = LedgerLock::acquire(tmp.path(), Duration::from_secs(1)).unwrap();

        let err = store.put_record(&record("k", 1), WriteCondition::Absent).unwrap_err();
        assert!(matches!(err, StoreError::Timeout { .. }));
    }
}
