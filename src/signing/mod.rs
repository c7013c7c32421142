//! Signing service adapters
//!
//! The pipeline hands a signer the packaged bytes and their digest and gets
//! back signature and certificate bytes plus the signer identity. Failures
//! surface as `SigningFailed` and are never retried.
//!
//! [`SignatureVerifier`] is the read side: it checks stored signature and
//! certificate bytes against a stored artifact.

mod cosign;
mod ephemeral;

pub use cosign::{log_ref_from_bundle, CosignSigner, CosignVerifier};
pub use ephemeral::{EphemeralCertificate, EphemeralSigner, EphemeralVerifier};

use std::io;
use std::time::Duration;

use salsag_ledger::{Digest, LogRef, SignatureCheck, TrustError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SignerError {
    #[error("cannot start signer {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("signer did not finish within {0:?}")]
    Timeout(Duration),

    #[error("signer exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("signer produced no {0}")]
    MissingOutput(&'static str),

    #[error("no signer identity: set signing.identity or run inside GitHub Actions")]
    NoIdentity,

    #[error("signing I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("signing key error: {0}")]
    Key(String),
}

impl From<SignerError> for TrustError {
    fn from(err: SignerError) -> Self {
        TrustError::signing(err.to_string())
    }
}

/// Input to a signing call.
#[derive(Debug, Clone, Copy)]
pub struct SigningRequest<'a> {
    pub object_key: &'a str,
    pub bytes: &'a [u8],
    pub digest: Digest,
    /// OIDC token for keyless signing, when the environment supplies one.
    pub identity_token: Option<&'a str>,
}

/// Output of a successful signing call.
#[derive(Debug, Clone)]
pub struct SignedArtifact {
    pub signature: Vec<u8>,
    pub certificate: Vec<u8>,
    pub signer_identity: String,
    /// Set when the signer already wrote a transparency log entry.
    pub transparency_log_ref: Option<LogRef>,
}

pub trait ArtifactSigner: Send + Sync {
    /// Short backend name for logs.
    fn backend(&self) -> &'static str;

    fn sign(&self, request: &SigningRequest<'_>) -> Result<SignedArtifact, SignerError>;
}

/// Stored evidence for one signing event.
#[derive(Debug, Clone, Copy)]
pub struct SignatureEvidence<'a> {
    pub object_key: &'a str,
    pub bytes: &'a [u8],
    pub digest: Digest,
    pub signature: &'a [u8],
    pub certificate: &'a [u8],
    pub signer_identity: &'a str,
}

pub trait SignatureVerifier: Send + Sync {
    fn backend(&self) -> &'static str;

    /// `Ok(Invalid)` when the evidence does not hold up; `Err` only when the
    /// check itself could not run.
    fn verify(&self, evidence: &SignatureEvidence<'_>) -> Result<SignatureCheck, SignerError>;
}

/// Signer identity: the configured value, else the GitHub Actions workflow
/// identity (`$GITHUB_SERVER_URL/$GITHUB_WORKFLOW_REF`).
pub fn resolve_identity(configured: Option<&str>) -> Option<String> {
    resolve_identity_with(configured, |name| std::env::var(name).ok())
}

fn resolve_identity_with<F>(configured: Option<&str>, env: F) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(identity) = configured.filter(|s| !s.trim().is_empty()) {
        return Some(identity.to_string());
    }
    let server = env("GITHUB_SERVER_URL")?;
    let workflow_ref = env("GITHUB_WORKFLOW_REF")?;
    Some(format!("{}/{}", server.trim_end_matches('/'), workflow_ref))
}

/// OIDC token from the environment (`SIGSTORE_ID_TOKEN`), if any.
pub fn identity_token_from_env() -> Option<String> {
    std::env::var("SIGSTORE_ID_TOKEN").ok().filter(|t| !t.is_empty())
}
