//! In-process Ed25519 signer with a throwaway key.
//!
//! The "certificate" is a canonical JSON document carrying the public key
//! and the claimed identity. It is not a trust anchor; use it for local
//! pipelines and tests where keyless signing is unavailable.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use salsag_ledger::{Digest, SignatureCheck};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

use super::{ArtifactSigner, SignatureEvidence, SignatureVerifier, SignedArtifact, SignerError, SigningRequest};

pub const CERTIFICATE_KIND: &str = "salsag-ephemeral/v1";
pub const SIGNATURE_ALGORITHM: &str = "Ed25519";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EphemeralCertificate {
    pub kind: String,
    pub algorithm: String,
    /// Base64 Ed25519 public key.
    pub public_key: String,
    /// Hex SHA-256 of the raw public key.
    pub fingerprint: String,
    pub identity: String,
    pub issued_at: DateTime<Utc>,
}

impl EphemeralCertificate {
    pub fn parse(bytes: &[u8]) -> Result<Self, SignerError> {
        serde_json::from_slice(bytes).map_err(|e| SignerError::Key(format!("bad certificate: {}", e)))
    }

    fn verifying_key(&self) -> Result<VerifyingKey, SignerError> {
        let raw = STANDARD
            .decode(&self.public_key)
            .map_err(|e| SignerError::Key(e.to_string()))?;
        let raw: [u8; 32] = raw
            .try_into()
            .map_err(|_| SignerError::Key("public key must be 32 bytes".to_string()))?;
        VerifyingKey::from_bytes(&raw).map_err(|e| SignerError::Key(e.to_string()))
    }
}

pub struct EphemeralSigner {
    key: SigningKey,
    identity: String,
}

impl EphemeralSigner {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            key: SigningKey::generate(&mut OsRng),
            identity: identity.into(),
        }
    }

    pub fn fingerprint(&self) -> String {
        hex::encode(Sha256::digest(self.key.verifying_key().as_bytes()))
    }

    fn certificate(&self) -> Result<Vec<u8>, SignerError> {
        let cert = EphemeralCertificate {
            kind: CERTIFICATE_KIND.to_string(),
            algorithm: SIGNATURE_ALGORITHM.to_string(),
            public_key: STANDARD.encode(self.key.verifying_key().as_bytes()),
            fingerprint: self.fingerprint(),
            identity: self.identity.clone(),
            issued_at: Utc::now(),
        };
        serde_json_canonicalizer::to_vec(&cert).map_err(|e| SignerError::Key(e.to_string()))
    }

    /// Check a signature produced by this backend against its certificate.
    pub fn verify(certificate: &[u8], digest: &Digest, signature: &[u8]) -> Result<bool, SignerError> {
        let cert = EphemeralCertificate::parse(certificate)?;
        let key = cert.verifying_key()?;
        let raw = STANDARD
            .decode(signature)
            .map_err(|e| SignerError::Key(format!("signature is not base64: {}", e)))?;
        let signature = Signature::from_slice(&raw).map_err(|e| SignerError::Key(e.to_string()))?;
        Ok(key.verify(digest.to_string().as_bytes(), &signature).is_ok())
    }
}

impl ArtifactSigner for EphemeralSigner {
    fn backend(&self) -> &'static str {
        "ephemeral"
    }

    /// Signs the digest text (`sha256:<hex>`); the signature is base64 text
    /// like cosign's `--output-signature`.
    fn sign(&self, request: &SigningRequest<'_>) -> Result<SignedArtifact, SignerError> {
        let signature = self.key.sign(request.digest.to_string().as_bytes());
        Ok(SignedArtifact {
            signature: STANDARD.encode(signature.to_bytes()).into_bytes(),
            certificate: self.certificate()?,
            signer_identity: self.identity.clone(),
            transparency_log_ref: None,
        })
    }
}

/// Checks evidence written by [`EphemeralSigner`].
///
/// Without a trust anchor this proves only that the stored signature, the
/// key in the stored certificate and the stored artifact belong together,
/// and that the certificate names the recorded signer.
#[derive(Debug, Default, Clone, Copy)]
pub struct EphemeralVerifier;

impl SignatureVerifier for EphemeralVerifier {
    fn backend(&self) -> &'static str {
        "ephemeral"
    }

    fn verify(&self, evidence: &SignatureEvidence<'_>) -> Result<SignatureCheck, SignerError> {
        let invalid = |message: String| Ok(SignatureCheck::Invalid { message });

        let cert = match EphemeralCertificate::parse(evidence.certificate) {
            Ok(cert) => cert,
            Err(e) => return invalid(e.to_string()),
        };
        if cert.identity != evidence.signer_identity {
            return invalid(format!(
                "certificate names {:?}, ledger records {:?}",
                cert.identity, evidence.signer_identity
            ));
        }
        match EphemeralSigner::verify(evidence.certificate, &evidence.digest, evidence.signature) {
            Ok(true) => Ok(SignatureCheck::Valid),
            Ok(false) => invalid("signature does not match certificate key and artifact".to_string()),
            Err(e) => invalid(e.to_string()),
        }
    }
}
