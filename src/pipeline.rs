//! Record path orchestration
//!
//! package -> digest -> sign -> upload -> transparency submit -> ledger write
//!
//! Any failing step aborts the rest. A key that already holds a different
//! digest is refused before signing, and every upload lands on a path
//! versioned by digest, so a rejected run never touches the evidence an
//! existing record points to. The ledger is written only after signing and
//! every upload succeeded, so a failed run never leaves a record pointing
//! at evidence that does not exist. The transparency submission is the one
//! best-effort step.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use regex_lite::Regex;
use salsag_ledger::{
    digest, validate_object_key, Digest, LedgerStore, LogRef, LogSubmission, ObjectRef, ObjectStore,
    RecordOutcome, SigningEvidence, TransparencyLog, TrustError, TrustLedger, TrustStatus,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::bundle::documents;
use crate::bundle::Packager;
use crate::config::ArtifactsConfig;
use crate::signing::{ArtifactSigner, SignedArtifact, SigningRequest};
use crate::telemetry::{metric_count, run_step};

/// Store key layout for artifacts and signing evidence.
///
/// Each path carries the object key and the artifact digest joined by `@`,
/// which object keys never contain, so no two keys or content versions
/// share a path. Signatures and certificates also carry the run id, which
/// keeps each signature next to its own certificate when runs overlap.
pub mod layout {
    use salsag_ledger::Digest;

    fn versioned(object_key: &str, digest: &Digest) -> String {
        format!("{}@{}", object_key, digest.to_hex())
    }

    pub fn artifact(object_key: &str, digest: &Digest) -> String {
        format!("artifacts/{}", versioned(object_key, digest))
    }

    /// Directory holding every run's signature and certificate.
    pub fn signing_dir(object_key: &str, digest: &Digest) -> String {
        format!("cosign/{}", versioned(object_key, digest))
    }

    pub fn signature(object_key: &str, digest: &Digest, run_id: &str) -> String {
        format!("{}/{}.sig", signing_dir(object_key, digest), run_id)
    }

    pub fn certificate(object_key: &str, digest: &Digest, run_id: &str) -> String {
        format!("{}/{}.pem", signing_dir(object_key, digest), run_id)
    }

    pub fn sbom(object_key: &str, digest: &Digest) -> String {
        format!("attestations/{}.spdx.json", versioned(object_key, digest))
    }

    pub fn provenance(object_key: &str, digest: &Digest) -> String {
        format!("attestations/{}.provenance.json", versioned(object_key, digest))
    }
}

/// Per-run packaging and attestation options
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub include_sbom: bool,
    pub include_provenance: bool,
    pub max_bytes: Option<u64>,
    pub builder_id: String,
    /// OIDC token handed to keyless signers
    pub identity_token: Option<String>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self::from_config(&ArtifactsConfig::default())
    }
}

impl PipelineOptions {
    pub fn from_config(artifacts: &ArtifactsConfig) -> Self {
        Self {
            include_sbom: artifacts.include_sbom,
            include_provenance: artifacts.include_provenance,
            max_bytes: artifacts.max_bytes,
            builder_id: artifacts.builder_id.clone(),
            identity_token: None,
        }
    }

    pub fn with_identity_token(mut self, token: Option<String>) -> Self {
        self.identity_token = token;
        self
    }
}

/// Outcome of a successful record run
#[derive(Debug, Clone, Serialize)]
pub struct RecordReport {
    pub object_key: String,
    pub digest: Digest,
    /// `created` or `resigned`
    pub outcome: &'static str,
    pub status: TrustStatus,
    pub revision: u64,
    pub signer_identity: String,
    pub signed_at: DateTime<Utc>,
    pub artifact_ref: Option<ObjectRef>,
    pub signature_ref: ObjectRef,
    pub certificate_ref: ObjectRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sbom_ref: Option<ObjectRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provenance_ref: Option<ObjectRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transparency_log_ref: Option<LogRef>,
}

/// What a record run would write, without signing or uploading
#[derive(Debug, Clone, Serialize)]
pub struct PlanReport {
    pub object_key: String,
    pub digest: Digest,
    pub size_bytes: u64,
    pub entry_count: usize,
    pub signer_backend: &'static str,
    pub artifact_key: String,
    /// Signature and certificate land here under a per-run id.
    pub signing_dir: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sbom_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provenance_key: Option<String>,
    pub transparency_submit: bool,
}

/// Evidence uploaded for one artifact.
struct Uploaded {
    artifact_ref: ObjectRef,
    signature_ref: ObjectRef,
    certificate_ref: ObjectRef,
    sbom_ref: Option<ObjectRef>,
    provenance_ref: Option<ObjectRef>,
}

pub struct Orchestrator {
    objects: Arc<dyn ObjectStore>,
    ledger: TrustLedger,
    signer: Arc<dyn ArtifactSigner>,
    transparency: Option<Arc<dyn TransparencyLog>>,
    identity_pattern: Regex,
    options: PipelineOptions,
}

impl Orchestrator {
    /// `identity_pattern` must already be anchored for full matching.
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        ledger: Arc<dyn LedgerStore>,
        signer: Arc<dyn ArtifactSigner>,
        identity_pattern: Regex,
    ) -> Self {
        Self {
            objects,
            ledger: TrustLedger::new(ledger),
            signer,
            transparency: None,
            identity_pattern,
            options: PipelineOptions::default(),
        }
    }

    pub fn with_transparency(mut self, log: Option<Arc<dyn TransparencyLog>>) -> Self {
        self.transparency = log;
        self
    }

    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    /// Package `source` and record it under `key` (or the derived key).
    pub fn record_path(&self, source: &Path, key: Option<&str>) -> Result<RecordReport, TrustError> {
        let packager = Packager::new(source).with_max_bytes(self.options.max_bytes);
        let object_key = key.map(str::to_string).unwrap_or_else(|| packager.default_key());
        let package = run_step("package", || packager.package().map_err(|e| TrustError::from(e).for_key(&object_key)))?;
        info!(
            object_key = %object_key,
            digest = %package.digest,
            size = package.bytes.len(),
            entries = package.entry_count,
            "artifact packaged"
        );
        self.record(&object_key, &package.bytes)
    }

    /// Dry run: package and digest only.
    pub fn plan(&self, source: &Path, key: Option<&str>) -> Result<PlanReport, TrustError> {
        let packager = Packager::new(source).with_max_bytes(self.options.max_bytes);
        let object_key = key.map(str::to_string).unwrap_or_else(|| packager.default_key());
        validate_object_key(&object_key).map_err(|e| TrustError::config(e.to_string()).for_key(&object_key))?;
        let package = packager
            .package()
            .map_err(|e| TrustError::from(e).for_key(&object_key))?;

        Ok(PlanReport {
            digest: package.digest,
            size_bytes: package.bytes.len() as u64,
            entry_count: package.entry_count,
            signer_backend: self.signer.backend(),
            artifact_key: layout::artifact(&object_key, &package.digest),
            signing_dir: layout::signing_dir(&object_key, &package.digest),
            sbom_key: self.options.include_sbom.then(|| layout::sbom(&object_key, &package.digest)),
            provenance_key: self
                .options
                .include_provenance
                .then(|| layout::provenance(&object_key, &package.digest)),
            transparency_submit: self.transparency.is_some(),
            object_key,
        })
    }

    /// Sign, upload and record already-packaged bytes.
    pub fn record(&self, object_key: &str, bytes: &[u8]) -> Result<RecordReport, TrustError> {
        validate_object_key(object_key).map_err(|e| TrustError::config(e.to_string()).for_key(object_key))?;
        let started = Utc::now();
        let artifact_digest = digest(bytes);

        // Refuse a changed digest before any evidence exists. The ledger
        // write re-checks under compare-and-swap.
        self.ledger.admit(object_key, &artifact_digest)?;

        let signed = run_step("sign", || self.sign(object_key, bytes, artifact_digest)).map_err(|e| {
            metric_count("SignArtifact-Error");
            e
        })?;

        let uploaded = run_step("upload", || self.upload(object_key, bytes, &artifact_digest, &signed, started))?;

        let transparency_log_ref = match signed.transparency_log_ref.clone() {
            Some(log_ref) => Some(log_ref),
            None => self.submit_to_log(object_key, &artifact_digest, &signed),
        };

        let evidence = SigningEvidence {
            object_key: object_key.to_string(),
            digest: artifact_digest,
            signature_ref: uploaded.signature_ref,
            certificate_ref: uploaded.certificate_ref,
            signer_identity: signed.signer_identity,
            sbom_ref: uploaded.sbom_ref,
            provenance_ref: uploaded.provenance_ref,
            artifact_ref: Some(uploaded.artifact_ref),
            transparency_log_ref,
            signed_at: Utc::now(),
        };

        let (record, outcome) = run_step("ledger_write", || self.ledger.record_signing(evidence))?;
        metric_count("LedgerRecord");

        Ok(RecordReport {
            object_key: record.object_key,
            digest: record.digest,
            outcome: match outcome {
                RecordOutcome::Created => "created",
                RecordOutcome::Resigned => "resigned",
            },
            status: record.status,
            revision: record.revision,
            signer_identity: record.signer_identity,
            signed_at: record.signed_at,
            artifact_ref: record.artifact_ref,
            signature_ref: record.signature_ref,
            certificate_ref: record.certificate_ref,
            sbom_ref: record.sbom_ref,
            provenance_ref: record.provenance_ref,
            transparency_log_ref: record.transparency_log_ref,
        })
    }

    fn sign(&self, object_key: &str, bytes: &[u8], artifact_digest: Digest) -> Result<SignedArtifact, TrustError> {
        let request = SigningRequest {
            object_key,
            bytes,
            digest: artifact_digest,
            identity_token: self.options.identity_token.as_deref(),
        };
        let signed = self
            .signer
            .sign(&request)
            .map_err(|e| TrustError::from(e).for_key(object_key))?;

        if !self.identity_pattern.is_match(&signed.signer_identity) {
            return Err(TrustError::signing(format!(
                "signer identity {:?} does not match {}",
                signed.signer_identity,
                self.identity_pattern.as_str()
            ))
            .for_key(object_key));
        }
        info!(
            object_key,
            backend = self.signer.backend(),
            signer_identity = %signed.signer_identity,
            "artifact signed"
        );
        Ok(signed)
    }

    fn upload(
        &self,
        object_key: &str,
        bytes: &[u8],
        artifact_digest: &Digest,
        signed: &SignedArtifact,
        started: DateTime<Utc>,
    ) -> Result<Uploaded, TrustError> {
        let put = |key: &str, data: &[u8]| {
            self.objects
                .put(key, data)
                .map_err(|e| TrustError::from_store(e, object_key))
        };

        let run_id = ulid::Ulid::new().to_string();

        let artifact_ref = put(&layout::artifact(object_key, artifact_digest), bytes)?;
        let signature_ref = put(
            &layout::signature(object_key, artifact_digest, &run_id),
            &signed.signature,
        )?;
        let certificate_ref = put(
            &layout::certificate(object_key, artifact_digest, &run_id),
            &signed.certificate,
        )?;

        let sbom_ref = if self.options.include_sbom {
            let doc = documents::sbom(object_key, artifact_digest, started);
            Some(put(&layout::sbom(object_key, artifact_digest), &encode(&doc, object_key)?)?)
        } else {
            None
        };
        let provenance_ref = if self.options.include_provenance {
            let doc = documents::provenance(object_key, artifact_digest, &self.options.builder_id, started);
            Some(put(&layout::provenance(object_key, artifact_digest), &encode(&doc, object_key)?)?)
        } else {
            None
        };

        Ok(Uploaded {
            artifact_ref,
            signature_ref,
            certificate_ref,
            sbom_ref,
            provenance_ref,
        })
    }

    fn submit_to_log(&self, object_key: &str, artifact_digest: &Digest, signed: &SignedArtifact) -> Option<LogRef> {
        let log = self.transparency.as_ref()?;
        let submission = LogSubmission {
            digest: *artifact_digest,
            signature: signed.signature.clone(),
            certificate: signed.certificate.clone(),
        };
        match log.submit(&submission) {
            Ok(log_ref) => {
                info!(object_key, log_ref = %log_ref, "transparency entry submitted");
                Some(log_ref)
            }
            Err(e) => {
                warn!(object_key, error = %e, "transparency submit failed, recording without log ref");
                metric_count("TransparencySubmit-Error");
                None
            }
        }
    }
}

fn encode<T: Serialize>(document: &T, object_key: &str) -> Result<Vec<u8>, TrustError> {
    documents::to_bytes(document)
        .map_err(|e| TrustError::signing(format!("cannot encode attestation: {}", e)).for_key(object_key))
}
