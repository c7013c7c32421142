//! Ledger write policy.
//!
//! All writes are read-modify-write with a compare-and-swap on the record
//! revision, so concurrent pipelines writing the same `object_key` either
//! observe each other or retry.
//!
//! Re-signing rules:
//! - no record: create with status RECORDED
//! - same digest: idempotent re-sign, refresh signing refs, keep status
//! - different digest: rejected with `DigestConflict`; a new artifact
//!   version needs its own key
//!
//! A lost compare-and-swap means another writer landed in between, so with
//! at most [`MAX_CAS_ATTEMPTS`] concurrent writers on one key every
//! same-digest re-sign eventually lands. Retries back off with jitter.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use tracing::{debug, info, warn};

use crate::digest::{compare, Digest};
use crate::error::{ErrorKind, StoreError, TrustError};
use crate::record::{validate_object_key, LogRef, ObjectRef, TrustRecord, TrustStatus};
use crate::store::{LedgerStore, WriteCondition};
use crate::verdict::{AuditEvent, FailureReason, Verdict};

/// Attempts before a contended key is reported as unavailable.
pub const MAX_CAS_ATTEMPTS: u32 = 8;

const BACKOFF_BASE_MS: u64 = 4;
const BACKOFF_MAX_MS: u64 = 100;

/// Exponential delay before retry `attempt`, capped, plus up to 50% jitter.
fn backoff(attempt: u32) -> Duration {
    let delay = BACKOFF_BASE_MS
        .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
        .min(BACKOFF_MAX_MS);
    let jitter = rand::thread_rng().gen_range(0..=delay / 2);
    Duration::from_millis(delay + jitter)
}

fn digest_conflict(key: &str, recorded: &Digest) -> TrustError {
    TrustError::new(
        ErrorKind::DigestConflict,
        format!(
            "ledger holds {} for this key; record the new content under a new key",
            recorded
        ),
    )
    .for_key(key)
}

/// Evidence produced by one signing event.
#[derive(Debug, Clone)]
pub struct SigningEvidence {
    pub object_key: String,
    pub digest: Digest,
    pub signature_ref: ObjectRef,
    pub certificate_ref: ObjectRef,
    pub signer_identity: String,
    pub sbom_ref: Option<ObjectRef>,
    pub provenance_ref: Option<ObjectRef>,
    pub artifact_ref: Option<ObjectRef>,
    pub transparency_log_ref: Option<LogRef>,
    pub signed_at: DateTime<Utc>,
}

impl SigningEvidence {
    fn into_new_record(self) -> TrustRecord {
        TrustRecord {
            object_key: self.object_key,
            digest: self.digest,
            signature_ref: self.signature_ref,
            certificate_ref: self.certificate_ref,
            sbom_ref: self.sbom_ref,
            provenance_ref: self.provenance_ref,
            signed_at: self.signed_at,
            signer_identity: self.signer_identity,
            transparency_log_ref: self.transparency_log_ref,
            status: TrustStatus::Recorded,
            artifact_ref: self.artifact_ref,
            revision: 1,
            last_verified_at: None,
        }
    }

    /// Refresh signing refs on an existing record with the same digest.
    fn apply_to(&self, previous: &TrustRecord) -> TrustRecord {
        TrustRecord {
            signature_ref: self.signature_ref.clone(),
            certificate_ref: self.certificate_ref.clone(),
            signer_identity: self.signer_identity.clone(),
            signed_at: self.signed_at,
            sbom_ref: self.sbom_ref.clone().or_else(|| previous.sbom_ref.clone()),
            provenance_ref: self
                .provenance_ref
                .clone()
                .or_else(|| previous.provenance_ref.clone()),
            artifact_ref: self
                .artifact_ref
                .clone()
                .or_else(|| previous.artifact_ref.clone()),
            transparency_log_ref: self
                .transparency_log_ref
                .clone()
                .or_else(|| previous.transparency_log_ref.clone()),
            revision: previous.revision + 1,
            ..previous.clone()
        }
    }
}

/// How a signing event landed in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Created,
    Resigned,
}

/// Write-side facade over a [`LedgerStore`].
#[derive(Clone)]
pub struct TrustLedger {
    store: Arc<dyn LedgerStore>,
}

impl TrustLedger {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    /// Fail with `DigestConflict` if `object_key` already holds a different
    /// digest. Lets the record path refuse before producing any evidence;
    /// [`TrustLedger::record_signing`] still enforces the rule atomically.
    pub fn admit(&self, object_key: &str, digest: &Digest) -> Result<Option<TrustRecord>, TrustError> {
        let current = self
            .store
            .get_record(object_key)
            .map_err(|e| TrustError::from_store(e, object_key))?;
        match current {
            Some(previous) if !compare(&previous.digest, digest) => Err(digest_conflict(object_key, &previous.digest)),
            other => Ok(other),
        }
    }

    /// Record a signing event per the re-signing rules above.
    pub fn record_signing(
        &self,
        evidence: SigningEvidence,
    ) -> Result<(TrustRecord, RecordOutcome), TrustError> {
        let key = evidence.object_key.clone();
        validate_object_key(&key).map_err(|e| TrustError::config(e.to_string()).for_key(&key))?;

        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let current = self
                .store
                .get_record(&key)
                .map_err(|e| TrustError::from_store(e, &key))?;

            let (record, condition, outcome) = match current {
                None => (
                    evidence.clone().into_new_record(),
                    WriteCondition::Absent,
                    RecordOutcome::Created,
                ),
                Some(previous) if compare(&previous.digest, &evidence.digest) => (
                    evidence.apply_to(&previous),
                    WriteCondition::Revision(previous.revision),
                    RecordOutcome::Resigned,
                ),
                Some(previous) => {
                    warn!(
                        object_key = %key,
                        ledger_digest = %previous.digest,
                        presented_digest = %evidence.digest,
                        "refusing to overwrite recorded digest"
                    );
                    return Err(digest_conflict(&key, &previous.digest));
                }
            };

            match self.store.put_record(&record, condition) {
                Ok(()) => {
                    info!(
                        object_key = %key,
                        digest = %record.digest,
                        revision = record.revision,
                        outcome = ?outcome,
                        "ledger record written"
                    );
                    return Ok((record, outcome));
                }
                Err(StoreError::Conflict { .. }) => {
                    debug!(object_key = %key, attempt, "ledger write conflict, retrying");
                    thread::sleep(backoff(attempt));
                    continue;
                }
                Err(e) => return Err(TrustError::from_store(e, &key)),
            }
        }

        Err(TrustError::store_unavailable(format!(
            "ledger write still contended after {} attempts",
            MAX_CAS_ATTEMPTS
        ))
        .for_key(&key))
    }

    /// Record a verification outcome.
    ///
    /// Moves `status` to VERIFIED/FAILED and stamps `last_verified_at`,
    /// then appends an audit event. Signing evidence is never touched. A
    /// NOT_IN_LEDGER verdict has no record to update and only yields the
    /// audit event.
    pub fn record_observation(&self, verdict: &Verdict) -> Result<(), TrustError> {
        let key = verdict.object_key.as_str();

        if verdict.reason != Some(FailureReason::NotInLedger) {
            self.update_status(verdict)?;
        }

        self.store
            .append_audit(&AuditEvent::from_verdict(verdict))
            .map_err(|e| TrustError::from_store(e, key))
    }

    fn update_status(&self, verdict: &Verdict) -> Result<(), TrustError> {
        let key = verdict.object_key.as_str();

        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let previous = match self
                .store
                .get_record(key)
                .map_err(|e| TrustError::from_store(e, key))?
            {
                Some(record) => record,
                None => {
                    return Err(TrustError::not_found("record disappeared before observation")
                        .for_key(key))
                }
            };

            // The verdict must describe the digest that is still recorded.
            if let Some(ledger_digest) = verdict.ledger_digest {
                if !compare(&ledger_digest, &previous.digest) {
                    return Err(TrustError::new(
                        ErrorKind::DigestConflict,
                        "ledger digest changed between verification and observation",
                    )
                    .for_key(key));
                }
            }

            let updated = TrustRecord {
                status: verdict.observed_status(),
                last_verified_at: Some(Utc::now()),
                revision: previous.revision + 1,
                ..previous.clone()
            };

            match self
                .store
                .put_record(&updated, WriteCondition::Revision(previous.revision))
            {
                Ok(()) => {
                    debug!(object_key = %key, status = %updated.status, "verification observed");
                    return Ok(());
                }
                Err(StoreError::Conflict { .. }) => {
                    debug!(object_key = %key, attempt, "status update conflict, retrying");
                    thread::sleep(backoff(attempt));
                    continue;
                }
                Err(e) => return Err(TrustError::from_store(e, key)),
            }
        }

        Err(TrustError::store_unavailable(format!(
            "status update still contended after {} attempts",
            MAX_CAS_ATTEMPTS
        ))
        .for_key(key))
    }
}
