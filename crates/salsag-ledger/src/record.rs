//! Trust record model
//!
//! One [`TrustRecord`] per `object_key`. The signing evidence (digest, refs,
//! identity, timestamp) is written at signing time; verification only
//! touches `status` and `last_verified_at`.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::digest::Digest;

/// URI scheme for object references.
pub const OBJECT_REF_SCHEME: &str = "store://";

/// Maximum object key length in bytes.
pub const MAX_OBJECT_KEY_LEN: usize = 512;

/// Maximum store key length: an object key plus namespace, digest and run id.
pub const MAX_STORE_KEY_LEN: usize = MAX_OBJECT_KEY_LEN + 128;

/// Ledger status of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrustStatus {
    /// Signed and recorded; no verification observed yet.
    Recorded,
    /// Last recorded verification passed.
    Verified,
    /// Last recorded verification failed.
    Failed,
}

impl fmt::Display for TrustStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrustStatus::Recorded => write!(f, "RECORDED"),
            TrustStatus::Verified => write!(f, "VERIFIED"),
            TrustStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// Invalid object key or reference.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("object key is empty")]
    Empty,

    #[error("key exceeds {0} bytes")]
    TooLong(usize),

    #[error("object key {0:?} contains characters outside [A-Za-z0-9._/-]")]
    BadCharacters(String),

    #[error("object key {0:?} must be relative and free of '.' and '..' segments")]
    PathEscape(String),

    #[error("object reference {0:?} is not of the form store://<bucket>/<key>")]
    BadReference(String),
}

fn key_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9._/-]+$").expect("static pattern compiles"))
}

fn store_key_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9._/@-]+$").expect("static pattern compiles"))
}

/// Validate an object key for use as a ledger primary key and store path.
pub fn validate_object_key(key: &str) -> Result<(), KeyError> {
    check_key(key, key_pattern(), MAX_OBJECT_KEY_LEN)
}

/// Validate a key inside the object store.
///
/// Store keys may also contain `@`, which object keys never do; evidence
/// paths use it to split the object key from the content version.
pub fn validate_store_key(key: &str) -> Result<(), KeyError> {
    check_key(key, store_key_pattern(), MAX_STORE_KEY_LEN)
}

fn check_key(key: &str, pattern: &Regex, max_len: usize) -> Result<(), KeyError> {
    if key.is_empty() {
        return Err(KeyError::Empty);
    }
    if key.len() > max_len {
        return Err(KeyError::TooLong(max_len));
    }
    if !pattern.is_match(key) {
        return Err(KeyError::BadCharacters(key.to_string()));
    }
    if key.starts_with('/') || key.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..") {
        return Err(KeyError::PathEscape(key.to_string()));
    }
    Ok(())
}

/// Locator of bytes in the Object Store, rendered as `store://<bucket>/<key>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObjectRef {
    pub bucket: String,
    pub key: String,
}

impl ObjectRef {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}/{}", OBJECT_REF_SCHEME, self.bucket, self.key)
    }
}

impl FromStr for ObjectRef {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix(OBJECT_REF_SCHEME)
            .ok_or_else(|| KeyError::BadReference(s.to_string()))?;
        let (bucket, key) = rest
            .split_once('/')
            .ok_or_else(|| KeyError::BadReference(s.to_string()))?;
        if bucket.is_empty() {
            return Err(KeyError::BadReference(s.to_string()));
        }
        validate_store_key(key)?;
        Ok(Self::new(bucket, key))
    }
}

impl TryFrom<String> for ObjectRef {
    type Error = KeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ObjectRef> for String {
    fn from(value: ObjectRef) -> Self {
        value.to_string()
    }
}

/// Reference to a transparency log entry (Rekor UUID or numeric log index).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogRef(pub String);

impl LogRef {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric refs address the log by index rather than by entry UUID.
    pub fn is_log_index(&self) -> bool {
        !self.0.is_empty() && self.0.bytes().all(|b| b.is_ascii_digit())
    }
}

impl fmt::Display for LogRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ledger entry for one artifact.
///
/// Serializes as the flat interop shape; the optional refs are omitted when
/// absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustRecord {
    pub object_key: String,

    /// Immutable once written.
    pub digest: Digest,

    pub signature_ref: ObjectRef,

    pub certificate_ref: ObjectRef,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sbom_ref: Option<ObjectRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance_ref: Option<ObjectRef>,

    pub signed_at: DateTime<Utc>,

    /// OIDC subject of the signer.
    pub signer_identity: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transparency_log_ref: Option<LogRef>,

    pub status: TrustStatus,

    /// Where the artifact bytes themselves live.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_ref: Option<ObjectRef>,

    /// Write counter for compare-and-swap. Starts at 1.
    #[serde(default)]
    pub revision: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_verified_at: Option<DateTime<Utc>>,
}

impl TrustRecord {
    /// Whether the signing evidence (everything except the verification
    /// bookkeeping) matches another record.
    pub fn same_signing_evidence(&self, other: &TrustRecord) -> bool {
        self.object_key == other.object_key
            && self.digest == other.digest
            && self.signature_ref == other.signature_ref
            && self.certificate_ref == other.certificate_ref
            && self.sbom_ref == other.sbom_ref
            && self.provenance_ref == other.provenance_ref
            && self.signed_at == other.signed_at
            && self.signer_identity == other.signer_identity
            && self.transparency_log_ref == other.transparency_log_ref
            && self.artifact_ref == other.artifact_ref
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::digest;

    fn sample_record() -> TrustRecord {
        TrustRecord {
            object_key: "app-v1.tar".to_string(),
            digest: digest(b"b1"),
            signature_ref: ObjectRef::new("staging", "cosign/app-v1.tar.sig"),
            certificate_ref: ObjectRef::new("staging", "cosign/app-v1.tar.pem"),
            sbom_ref: None,
            provenance_ref: None,
            signed_at: Utc::now(),
            signer_identity: "https://github.com/org/repo/.github/workflows/ci.yml@refs/heads/main"
                .to_string(),
            transparency_log_ref: None,
            status: TrustStatus::Recorded,
            artifact_ref: Some(ObjectRef::new("staging", "app-v1.tar")),
            revision: 1,
            last_verified_at: None,
        }
    }

    #[test]
    fn test_validate_object_key() {
        assert!(validate_object_key("app-v1").is_ok());
        assert!(validate_object_key("releases/2024/app_v1.2.tar").is_ok());
        assert_eq!(validate_object_key(""), Err(KeyError::Empty));
        assert!(matches!(validate_object_key("a b"), Err(KeyError::BadCharacters(_))));
        assert!(matches!(validate_object_key("../etc/passwd"), Err(KeyError::PathEscape(_))));
        assert!(matches!(validate_object_key("/abs"), Err(KeyError::PathEscape(_))));
        assert!(matches!(validate_object_key("a//b"), Err(KeyError::PathEscape(_))));
        assert!(matches!(validate_object_key("a/./b"), Err(KeyError::PathEscape(_))));
        assert!(matches!(validate_object_key("./a"), Err(KeyError::PathEscape(_))));
        assert!(matches!(validate_object_key("app@v1"), Err(KeyError::BadCharacters(_))));
        assert_eq!(validate_object_key(&"a".repeat(513)), Err(KeyError::TooLong(MAX_OBJECT_KEY_LEN)));
    }

    #[test]
    fn test_store_keys_allow_version_separator() {
        assert!(validate_store_key("artifacts/app@0a1b").is_ok());
        assert!(matches!(validate_store_key("cosign/./app@0a1b"), Err(KeyError::PathEscape(_))));
        assert!(matches!(validate_store_key("a b@c"), Err(KeyError::BadCharacters(_))));
    }

    #[test]
    fn test_object_ref_text_form() {
        let r = ObjectRef::new("staging", "cosign/app.sig");
        assert_eq!(r.to_string(), "store://staging/cosign/app.sig");
        assert_eq!("store://staging/cosign/app.sig".parse::<ObjectRef>().unwrap(), r);
        assert!("s3://staging/app".parse::<ObjectRef>().is_err());
        assert!("store:///app".parse::<ObjectRef>().is_err());
    }

    #[test]
    fn test_log_ref_kind() {
        assert!(LogRef::new("123456").is_log_index());
        assert!(!LogRef::new("24296fb24b8ad77a").is_log_index());
        assert!(!LogRef::new("").is_log_index());
    }

    #[test]
    fn test_external_shape_omits_absent_refs() {
        let record = sample_record();
        let value = serde_json::to_value(&record).unwrap();
        let obj = value.as_object().unwrap();

        for key in [
            "object_key",
            "digest",
            "signature_ref",
            "certificate_ref",
            "signed_at",
            "signer_identity",
            "status",
        ] {
            assert!(obj.contains_key(key), "missing {}", key);
        }
        assert!(!obj.contains_key("sbom_ref"));
        assert!(!obj.contains_key("provenance_ref"));
        assert!(!obj.contains_key("transparency_log_ref"));
        assert_eq!(obj["status"], "RECORDED");
        assert!(obj["digest"].as_str().unwrap().starts_with("sha256:"));
    }

    #[test]
    fn test_minimal_external_shape_parses() {
        let json = serde_json::json!({
            "object_key": "app-v1",
            "digest": format!("sha256:{}", digest(b"b1").to_hex()),
            "signature_ref": "store://staging/cosign/app-v1.sig",
            "certificate_ref": "store://staging/cosign/app-v1.pem",
            "signed_at": "2024-05-01T12:00:00Z",
            "signer_identity": "ci@example.com",
            "status": "VERIFIED"
        });
        let record: TrustRecord = serde_json::from_value(json).unwrap();
        assert_eq!(record.status, TrustStatus::Verified);
        assert_eq!(record.revision, 0);
        assert!(record.transparency_log_ref.is_none());
    }

    #[test]
    fn test_same_signing_evidence_ignores_verification_fields() {
        let a = sample_record();
        let mut b = a.clone();
        b.status = TrustStatus::Failed;
        b.revision = 7;
        b.last_verified_at = Some(Utc::now());
        assert!(a.same_signing_evidence(&b));

        b.signer_identity = "someone-else".to_string();
        assert!(!a.same_signing_evidence(&b));
    }
}
