//! Concurrent ledger writers over the filesystem store
//!
//! Each thread opens its own store on the same directory, the way separate
//! pipeline processes would.

use std::path::Path;
use std::sync::{Arc, Barrier};
use std::thread;

use chrono::Utc;
use salsag::ledger::{
    digest, ErrorKind, LedgerStore, ObjectRef, RecordOutcome, SigningEvidence, TrustLedger, TrustRecord,
    TrustStatus, MAX_CAS_ATTEMPTS,
};
use salsag_store::FsLedgerStore;
use tempfile::TempDir;

const WRITERS: usize = 6;

fn evidence(key: &str, bytes: &[u8], run: usize) -> SigningEvidence {
    SigningEvidence {
        object_key: key.to_string(),
        digest: digest(bytes),
        signature_ref: ObjectRef::new("staging", format!("cosign/{}.sig", key)),
        certificate_ref: ObjectRef::new("staging", format!("cosign/{}.pem", key)),
        signer_identity: format!("https://github.com/org/repo/run/{}", run),
        sbom_ref: None,
        provenance_ref: None,
        artifact_ref: Some(ObjectRef::new("staging", key)),
        transparency_log_ref: None,
        signed_at: Utc::now(),
    }
}

fn race<F>(dir: &Path, f: F) -> Vec<Result<(TrustRecord, RecordOutcome), salsag::TrustError>>
where
    F: Fn(usize) -> SigningEvidence + Send + Sync + 'static,
{
    let barrier = Arc::new(Barrier::new(WRITERS));
    let f = Arc::new(f);
    let handles: Vec<_> = (0..WRITERS)
        .map(|i| {
            let barrier = barrier.clone();
            let f = f.clone();
            let dir = dir.to_path_buf();
            thread::spawn(move || {
                let ledger = TrustLedger::new(Arc::new(FsLedgerStore::new(&dir).unwrap()));
                barrier.wait();
                ledger.record_signing(f(i))
            })
        })
        .collect();
    handles.into_iter().map(|h| h.join().expect("writer panicked")).collect()
}

#[test]
fn test_same_digest_writers_leave_one_record() {
    let tmp = TempDir::new().unwrap();
    assert!(WRITERS as u32 <= MAX_CAS_ATTEMPTS);
    let results = race(tmp.path(), |i| evidence("app-v1", b"b1", i));

    // Idempotent re-signing never fails under contention.
    for r in &results {
        if let Err(e) = r {
            panic!("same-digest writer failed: {}", e);
        }
    }
    let created = results
        .iter()
        .filter(|r| matches!(r, Ok((_, RecordOutcome::Created))))
        .count();
    assert_eq!(created, 1);

    let store = FsLedgerStore::new(tmp.path()).unwrap();
    let records = store.scan().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].digest, digest(b"b1"));
    assert_eq!(records[0].status, TrustStatus::Recorded);
    assert_eq!(records[0].revision, WRITERS as u64);
}

#[test]
fn test_conflicting_digests_have_one_winner() {
    let tmp = TempDir::new().unwrap();
    let results = race(tmp.path(), |i| evidence("app-v1", format!("build-{}", i).as_bytes(), i));

    let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1);
    for r in &results {
        if let Err(e) = r {
            assert_eq!(e.kind, ErrorKind::DigestConflict, "{}", e);
        }
    }

    let store = FsLedgerStore::new(tmp.path()).unwrap();
    let record = store.get_record("app-v1").unwrap().unwrap();
    assert_eq!(record.digest, winners[0].0.digest);
    assert_eq!(record.revision, 1);
}

#[test]
fn test_distinct_keys_do_not_interfere() {
    let tmp = TempDir::new().unwrap();
    let results = race(tmp.path(), |i| evidence(&format!("svc-{}", i), b"same bytes", i));

    assert!(results.iter().all(|r| matches!(r, Ok((_, RecordOutcome::Created)))));
    let store = FsLedgerStore::new(tmp.path()).unwrap();
    let mut keys: Vec<_> = store.scan().unwrap().into_iter().map(|r| r.object_key).collect();
    keys.sort();
    assert_eq!(keys.len(), WRITERS);
    assert_eq!(keys[0], "svc-0");
}
