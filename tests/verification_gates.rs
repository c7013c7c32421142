//! Verifier gate ordering and degradation

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use salsag::ledger::fault::{Fault, FaultOp};
use salsag::ledger::memory::{MemoryLedgerStore, MemoryTransparencyLog};
use salsag::ledger::{
    digest, ErrorKind, FailureReason, LogRef, ObjectRef, SigningEvidence, TransparencyCheck, TransparencyLog,
    TrustLedger,
};
use salsag::Verifier;

fn ledger_with(key: &str, bytes: &[u8], log_ref: Option<LogRef>) -> Arc<MemoryLedgerStore> {
    let store = Arc::new(MemoryLedgerStore::new());
    TrustLedger::new(store.clone())
        .record_signing(SigningEvidence {
            object_key: key.to_string(),
            digest: digest(bytes),
            signature_ref: ObjectRef::new("staging", format!("cosign/{}.sig", key)),
            certificate_ref: ObjectRef::new("staging", format!("cosign/{}.pem", key)),
            signer_identity: "https://github.com/org/repo".to_string(),
            sbom_ref: None,
            provenance_ref: None,
            artifact_ref: None,
            transparency_log_ref: log_ref,
            signed_at: Utc::now(),
        })
        .unwrap();
    store
}

fn with_log(ledger: Arc<MemoryLedgerStore>, log: &Arc<MemoryTransparencyLog>) -> Verifier {
    Verifier::new(ledger).with_transparency(Some(log.clone() as Arc<dyn TransparencyLog>))
}

#[test]
fn test_tamper_detected_for_every_log_state() {
    let log_ref = LogRef::new("entry-1");
    let states: Vec<Box<dyn Fn(&MemoryTransparencyLog)>> = vec![
        Box::new(|_: &MemoryTransparencyLog| {}),
        Box::new(|log: &MemoryTransparencyLog| log.faults().inject(FaultOp::Lookup, Fault::unavailable())),
        Box::new(|log: &MemoryTransparencyLog| log.faults().inject(FaultOp::Lookup, Fault::timeout(Duration::from_millis(5)))),
    ];

    for setup in states {
        let log = Arc::new(MemoryTransparencyLog::new());
        log.insert(log_ref.clone(), digest(b"good"));
        setup(&*log);

        let verdict = with_log(ledger_with("app", b"good", Some(log_ref.clone())), &log)
            .verify("app", b"evil")
            .unwrap();
        assert_eq!(verdict.reason, Some(FailureReason::ChecksumMismatch));
    }
}

#[test]
fn test_log_timeout_degrades_to_ledger_only_pass() {
    let log_ref = LogRef::new("entry-1");
    let log = Arc::new(MemoryTransparencyLog::new());
    log.insert(log_ref.clone(), digest(b"good"));
    log.faults()
        .inject(FaultOp::Lookup, Fault::timeout(Duration::from_millis(10)));

    let verdict = with_log(ledger_with("app", b"good", Some(log_ref)), &log)
        .verify("app", b"good")
        .unwrap();
    assert!(verdict.passed());
    assert!(!verdict.transparency_checked);
    assert!(matches!(verdict.transparency, TransparencyCheck::Unavailable { .. }));
    assert_eq!(verdict.summary(), "app: PASS (ledger only)");
}

#[test]
fn test_transient_log_outage_recovers() {
    let log_ref = LogRef::new("entry-1");
    let log = Arc::new(MemoryTransparencyLog::new());
    log.insert(log_ref.clone(), digest(b"good"));
    log.faults().inject(FaultOp::Lookup, Fault::unavailable().times(1));

    let verifier = with_log(ledger_with("app", b"good", Some(log_ref)), &log);
    assert!(!verifier.verify("app", b"good").unwrap().transparency_checked);
    let second = verifier.verify("app", b"good").unwrap();
    assert!(second.transparency_checked);
    assert_eq!(second.summary(), "app: PASS (ledger + transparency log)");
}

#[test]
fn test_removed_log_entry_fails() {
    let log_ref = LogRef::new("entry-1");
    let log = Arc::new(MemoryTransparencyLog::new());
    log.insert(log_ref.clone(), digest(b"good"));
    let verifier = with_log(ledger_with("app", b"good", Some(log_ref.clone())), &log);
    assert!(verifier.verify("app", b"good").unwrap().passed());

    log.remove(&log_ref);
    let verdict = verifier.verify("app", b"good").unwrap();
    assert_eq!(verdict.reason, Some(FailureReason::TransparencyMismatch));
}

#[test]
fn test_ledger_outage_is_cannot_verify() {
    let ledger = ledger_with("app", b"good", None);
    ledger
        .faults()
        .inject(FaultOp::GetRecord, Fault::timeout(Duration::from_millis(5)));

    let err = Verifier::new(ledger).verify("app", b"good").unwrap_err();
    assert_eq!(err.kind, ErrorKind::StoreUnavailable);
    assert!(err.is_transient());
    assert!(err.message.contains("cannot verify"));
}

#[test]
fn test_not_in_ledger_never_consults_log() {
    let log = Arc::new(MemoryTransparencyLog::new());
    log.faults().inject(FaultOp::Lookup, Fault::unavailable());
    let verdict = with_log(Arc::new(MemoryLedgerStore::new()), &log)
        .verify("ghost", b"x")
        .unwrap();
    assert_eq!(verdict.reason, Some(FailureReason::NotInLedger));
    assert_eq!(log.faults().calls(FaultOp::Lookup), 0);
}

#[test]
fn test_verify_stored_without_artifact_ref() {
    let ledger = ledger_with("app", b"good", None);
    let err = Verifier::new(ledger).verify_stored("app").unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
}
