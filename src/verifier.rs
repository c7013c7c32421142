//! Verification state machine
//!
//! Gates run in order and the first failure is terminal:
//! 1. ledger lookup: no record is NOT_IN_LEDGER; an unreachable ledger is
//!    an error ("cannot verify"), never a verdict
//! 2. digest recomputation: any difference is CHECKSUM_MISMATCH
//! 3. signature check, stored copies only and only with a signature
//!    verifier: stored signature, certificate and artifact must belong
//!    together, else SIGNATURE_MISMATCH
//! 4. transparency cross-check, only when the record carries a log ref:
//!    an absent, contradicting or unreadable entry is TRANSPARENCY_MISMATCH;
//!    only an unreachable or silent log lowers confidence instead
//! 5. PASS

use std::io;
use std::path::Path;
use std::sync::Arc;

use salsag_ledger::{
    compare, digest, digest_file, Digest, LedgerStore, ObjectRef, ObjectStore, SignatureCheck, StoreError,
    TransparencyCheck, TransparencyLog, TrustError, TrustLedger, TrustRecord, Verdict,
};
use tracing::{info, warn};

use crate::signing::{SignatureEvidence, SignatureVerifier};
use crate::telemetry::{metric_count, run_step};

pub struct Verifier {
    ledger: TrustLedger,
    objects: Option<Arc<dyn ObjectStore>>,
    transparency: Option<Arc<dyn TransparencyLog>>,
    signatures: Option<Arc<dyn SignatureVerifier>>,
    record_observations: bool,
}

impl Verifier {
    pub fn new(ledger: Arc<dyn LedgerStore>) -> Self {
        Self {
            ledger: TrustLedger::new(ledger),
            objects: None,
            transparency: None,
            signatures: None,
            record_observations: false,
        }
    }

    /// Object store used by [`Verifier::verify_stored`].
    pub fn with_objects(mut self, objects: Arc<dyn ObjectStore>) -> Self {
        self.objects = Some(objects);
        self
    }

    pub fn with_transparency(mut self, log: Option<Arc<dyn TransparencyLog>>) -> Self {
        self.transparency = log;
        self
    }

    /// Signature checker for stored evidence.
    pub fn with_signatures(mut self, checker: Option<Arc<dyn SignatureVerifier>>) -> Self {
        self.signatures = checker;
        self
    }

    /// Record each verdict as a status observation plus audit event.
    pub fn recording(mut self, enabled: bool) -> Self {
        self.record_observations = enabled;
        self
    }

    /// Verify presented bytes against the ledger.
    pub fn verify(&self, object_key: &str, presented: &[u8]) -> Result<Verdict, TrustError> {
        self.verify_digest(object_key, digest(presented))
    }

    /// Verify a local file, streamed through the digest engine.
    pub fn verify_file(&self, object_key: &str, path: &Path) -> Result<Verdict, TrustError> {
        let checked = digest_file(path).map_err(|e| {
            let message = format!("cannot read {}: {}", path.display(), e);
            let err = match e.kind() {
                io::ErrorKind::NotFound => TrustError::not_found(message),
                _ => TrustError::config(message),
            };
            err.for_key(object_key)
        })?;
        self.verify_digest(object_key, checked)
    }

    /// Verify an already computed digest of the presented bytes.
    pub fn verify_digest(&self, object_key: &str, checked: Digest) -> Result<Verdict, TrustError> {
        run_step("verify", || {
            let verdict = match self.lookup(object_key)? {
                None => Verdict::not_in_ledger(object_key),
                Some(record) => self.evaluate(&record, checked, None)?,
            };
            self.finish(&verdict);
            Ok(verdict)
        })
    }

    /// Verify the copy held in the object store under the record's
    /// `artifact_ref`, including its stored signature.
    pub fn verify_stored(&self, object_key: &str) -> Result<Verdict, TrustError> {
        run_step("verify_stored", || {
            let record = match self.lookup(object_key)? {
                None => {
                    let verdict = Verdict::not_in_ledger(object_key);
                    self.finish(&verdict);
                    return Ok(verdict);
                }
                Some(record) => record,
            };

            let artifact_ref = record
                .artifact_ref
                .as_ref()
                .ok_or_else(|| TrustError::not_found("record has no artifact_ref").for_key(object_key))?;
            let objects = self
                .objects
                .as_ref()
                .ok_or_else(|| TrustError::config("no object store configured").for_key(object_key))?;
            let bytes = objects
                .get(artifact_ref)
                .map_err(|e| TrustError::from_store(e, object_key))?;

            let verdict = self.evaluate(&record, digest(&bytes), Some((&**objects, bytes.as_slice())))?;
            self.finish(&verdict);
            Ok(verdict)
        })
    }

    fn lookup(&self, object_key: &str) -> Result<Option<TrustRecord>, TrustError> {
        self.ledger.store().get_record(object_key).map_err(|e| {
            metric_count("LedgerVerify-Error");
            let mut err = TrustError::from(e).for_key(object_key);
            err.message = format!("cannot verify: {}", err.message);
            err
        })
    }

    /// Gates 2-5 for a record that exists. `stored` carries the object
    /// store and artifact bytes when verifying a stored copy.
    fn evaluate(
        &self,
        record: &TrustRecord,
        checked: Digest,
        stored: Option<(&dyn ObjectStore, &[u8])>,
    ) -> Result<Verdict, TrustError> {
        if !compare(&checked, &record.digest) {
            return Ok(Verdict::checksum_mismatch(&record.object_key, checked, record.digest));
        }

        let signature = match stored {
            Some((objects, bytes)) => self.signature_check(record, objects, bytes)?,
            None => SignatureCheck::NotChecked,
        };
        if let SignatureCheck::Invalid { message } = signature {
            return Ok(Verdict::signature_mismatch(&record.object_key, checked, record.digest, message));
        }

        let verdict = match self.transparency_check(record) {
            TransparencyCheck::Contradicted { message } => {
                Verdict::transparency_mismatch(&record.object_key, checked, record.digest, message)
            }
            check => Verdict::pass(&record.object_key, checked, record.digest, check),
        };
        Ok(verdict.with_signature(signature))
    }

    fn signature_check(
        &self,
        record: &TrustRecord,
        objects: &dyn ObjectStore,
        bytes: &[u8],
    ) -> Result<SignatureCheck, TrustError> {
        let Some(checker) = self.signatures.as_ref() else {
            return Ok(SignatureCheck::NotChecked);
        };
        let key = record.object_key.as_str();

        let Some(signature) = fetch_evidence(objects, &record.signature_ref, key)? else {
            return Ok(missing_evidence(&record.signature_ref));
        };
        let Some(certificate) = fetch_evidence(objects, &record.certificate_ref, key)? else {
            return Ok(missing_evidence(&record.certificate_ref));
        };

        let check = checker
            .verify(&SignatureEvidence {
                object_key: key,
                bytes,
                digest: record.digest,
                signature: &signature,
                certificate: &certificate,
                signer_identity: &record.signer_identity,
            })
            .map_err(|e| {
                metric_count("SignatureVerify-Error");
                TrustError::signing(format!("cannot check signature: {}", e)).for_key(key)
            })?;
        if let SignatureCheck::Invalid { message } = &check {
            warn!(object_key = key, backend = checker.backend(), reason = %message, "stored signature rejected");
        }
        Ok(check)
    }

    fn transparency_check(&self, record: &TrustRecord) -> TransparencyCheck {
        let Some(log_ref) = record.transparency_log_ref.as_ref() else {
            return TransparencyCheck::NotRecorded;
        };
        let Some(log) = self.transparency.as_ref() else {
            return TransparencyCheck::NotConsulted;
        };

        match log.lookup(log_ref) {
            Ok(Some(entry)) if compare(&entry.digest, &record.digest) => TransparencyCheck::Confirmed,
            Ok(Some(entry)) => TransparencyCheck::Contradicted {
                message: format!("log entry {} attests {}, ledger holds {}", log_ref, entry.digest, record.digest),
            },
            Ok(None) => TransparencyCheck::Contradicted {
                message: format!("log entry {} not found", log_ref),
            },
            Err(e) if e.is_unavailable() => {
                warn!(object_key = %record.object_key, log_ref = %log_ref, error = %e, "transparency log unavailable, continuing on ledger evidence");
                metric_count("TransparencyLookup-Error");
                TransparencyCheck::Unavailable { message: e.to_string() }
            }
            // The log answered but did not confirm the digest.
            Err(e) => TransparencyCheck::Contradicted {
                message: format!("log entry {} unusable: {}", log_ref, e),
            },
        }
    }

    fn finish(&self, verdict: &Verdict) {
        info!(
            object_key = %verdict.object_key,
            outcome = %verdict.outcome,
            reason = ?verdict.reason,
            transparency_checked = verdict.transparency_checked,
            "verification complete"
        );
        metric_count(if verdict.passed() { "FullVerify-PASS" } else { "FullVerify-FAIL" });

        if self.record_observations {
            // The verdict stands even if it cannot be recorded.
            if let Err(e) = self.ledger.record_observation(verdict) {
                warn!(object_key = %verdict.object_key, error = %e, "failed to record verification observation");
            }
        }
    }
}

/// `None` when the object is gone; other store failures are errors.
fn fetch_evidence(
    objects: &dyn ObjectStore,
    reference: &ObjectRef,
    object_key: &str,
) -> Result<Option<Vec<u8>>, TrustError> {
    match objects.get(reference) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(StoreError::NotFound { .. }) => Ok(None),
        Err(e) => Err(TrustError::from_store(e, object_key)),
    }
}

fn missing_evidence(reference: &ObjectRef) -> SignatureCheck {
    SignatureCheck::Invalid {
        message: format!("evidence {} is missing", reference),
    }
}
