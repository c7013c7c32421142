//! Verification verdicts and audit observations.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::digest::Digest;
use crate::record::TrustStatus;

/// Final outcome of a verification run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Pass,
    Fail,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Pass => write!(f, "PASS"),
            Outcome::Fail => write!(f, "FAIL"),
        }
    }
}

/// Closed set of reasons a verification can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureReason {
    NotInLedger,
    ChecksumMismatch,
    TransparencyMismatch,
    /// The stored signature does not verify against the stored
    /// certificate and artifact, or that evidence is missing.
    SignatureMismatch,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::NotInLedger => write!(f, "NOT_IN_LEDGER"),
            FailureReason::ChecksumMismatch => write!(f, "CHECKSUM_MISMATCH"),
            FailureReason::TransparencyMismatch => write!(f, "TRANSPARENCY_MISMATCH"),
            FailureReason::SignatureMismatch => write!(f, "SIGNATURE_MISMATCH"),
        }
    }
}

/// What the transparency gate established.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransparencyCheck {
    /// The log entry exists and matches the ledger digest.
    Confirmed,
    /// The record carries no log reference.
    NotRecorded,
    /// No log adapter was configured for this verifier.
    NotConsulted,
    /// The log could not be reached; the result is unknown.
    Unavailable { message: String },
    /// The log was reachable but the entry is absent or disagrees.
    Contradicted { message: String },
}

impl TransparencyCheck {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, TransparencyCheck::Confirmed)
    }
}

/// What the signature gate established.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignatureCheck {
    /// Presented bytes carry no signature; only stored copies are checked.
    #[default]
    NotChecked,
    Valid,
    Invalid { message: String },
}

/// Result of one verification call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub object_key: String,
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<FailureReason>,
    /// Digest of the presented bytes; absent if the run stopped before
    /// recomputing it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checked_digest: Option<Digest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ledger_digest: Option<Digest>,
    pub transparency: TransparencyCheck,
    pub transparency_checked: bool,
    #[serde(default)]
    pub signature: SignatureCheck,
}

impl Verdict {
    pub fn pass(
        object_key: impl Into<String>,
        checked_digest: Digest,
        ledger_digest: Digest,
        transparency: TransparencyCheck,
    ) -> Self {
        let transparency_checked = transparency.is_confirmed();
        Self {
            object_key: object_key.into(),
            outcome: Outcome::Pass,
            reason: None,
            checked_digest: Some(checked_digest),
            ledger_digest: Some(ledger_digest),
            transparency,
            transparency_checked,
            signature: SignatureCheck::NotChecked,
        }
    }

    pub fn not_in_ledger(object_key: impl Into<String>) -> Self {
        Self {
            object_key: object_key.into(),
            outcome: Outcome::Fail,
            reason: Some(FailureReason::NotInLedger),
            checked_digest: None,
            ledger_digest: None,
            transparency: TransparencyCheck::NotConsulted,
            transparency_checked: false,
            signature: SignatureCheck::NotChecked,
        }
    }

    pub fn checksum_mismatch(
        object_key: impl Into<String>,
        checked_digest: Digest,
        ledger_digest: Digest,
    ) -> Self {
        Self {
            object_key: object_key.into(),
            outcome: Outcome::Fail,
            reason: Some(FailureReason::ChecksumMismatch),
            checked_digest: Some(checked_digest),
            ledger_digest: Some(ledger_digest),
            transparency: TransparencyCheck::NotConsulted,
            transparency_checked: false,
            signature: SignatureCheck::NotChecked,
        }
    }

    pub fn transparency_mismatch(
        object_key: impl Into<String>,
        checked_digest: Digest,
        ledger_digest: Digest,
        message: impl Into<String>,
    ) -> Self {
        Self {
            object_key: object_key.into(),
            outcome: Outcome::Fail,
            reason: Some(FailureReason::TransparencyMismatch),
            checked_digest: Some(checked_digest),
            ledger_digest: Some(ledger_digest),
            transparency: TransparencyCheck::Contradicted {
                message: message.into(),
            },
            transparency_checked: true,
            signature: SignatureCheck::NotChecked,
        }
    }

    pub fn signature_mismatch(
        object_key: impl Into<String>,
        checked_digest: Digest,
        ledger_digest: Digest,
        message: impl Into<String>,
    ) -> Self {
        Self {
            object_key: object_key.into(),
            outcome: Outcome::Fail,
            reason: Some(FailureReason::SignatureMismatch),
            checked_digest: Some(checked_digest),
            ledger_digest: Some(ledger_digest),
            transparency: TransparencyCheck::NotConsulted,
            transparency_checked: false,
            signature: SignatureCheck::Invalid {
                message: message.into(),
            },
        }
    }

    /// Attach the signature gate result to a verdict that got past it.
    pub fn with_signature(mut self, signature: SignatureCheck) -> Self {
        self.signature = signature;
        self
    }

    pub fn passed(&self) -> bool {
        self.outcome == Outcome::Pass
    }

    /// Ledger status this verdict maps to when recorded.
    pub fn observed_status(&self) -> TrustStatus {
        match self.outcome {
            Outcome::Pass => TrustStatus::Verified,
            Outcome::Fail => TrustStatus::Failed,
        }
    }

    /// One-line summary for operators.
    pub fn summary(&self) -> String {
        match self.reason {
            None if self.transparency_checked => {
                format!("{}: PASS (ledger + transparency log)", self.object_key)
            }
            None => format!("{}: PASS (ledger only)", self.object_key),
            Some(reason) => format!("{}: FAIL ({})", self.object_key, reason),
        }
    }
}

/// Append-only, non-authoritative record of one verification run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Sortable unique id.
    pub event_id: String,
    pub object_key: String,
    pub observed_at: DateTime<Utc>,
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<FailureReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checked_digest: Option<Digest>,
    pub transparency_checked: bool,
}

impl AuditEvent {
    pub fn from_verdict(verdict: &Verdict) -> Self {
        Self {
            event_id: ulid::Ulid::new().to_string(),
            object_key: verdict.object_key.clone(),
            observed_at: Utc::now(),
            outcome: verdict.outcome,
            reason: verdict.reason,
            checked_digest: verdict.checked_digest,
            transparency_checked: verdict.transparency_checked,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::digest;

    #[test]
    fn test_pass_transparency_flag_follows_check() {
        let d = digest(b"x");
        let confirmed = Verdict::pass("k", d, d, TransparencyCheck::Confirmed);
        assert!(confirmed.transparency_checked);

        let degraded = Verdict::pass(
            "k",
            d,
            d,
            TransparencyCheck::Unavailable {
                message: "timeout".to_string(),
            },
        );
        assert!(degraded.passed());
        assert!(!degraded.transparency_checked);
        assert_eq!(degraded.summary(), "k: PASS (ledger only)");
    }

    #[test]
    fn test_not_in_ledger_has_no_digests() {
        let v = Verdict::not_in_ledger("app-v2");
        assert_eq!(v.reason, Some(FailureReason::NotInLedger));
        assert!(v.checked_digest.is_none());
        assert!(v.ledger_digest.is_none());
        assert_eq!(v.observed_status(), TrustStatus::Failed);
    }

    #[test]
    fn test_verdict_json_shape() {
        let v = Verdict::checksum_mismatch("k", digest(b"a"), digest(b"b"));
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json["outcome"], "FAIL");
        assert_eq!(json["reason"], "CHECKSUM_MISMATCH");
        assert_eq!(json["transparency_checked"], false);
        assert_eq!(json["transparency"]["state"], "NOT_CONSULTED");
    }

    #[test]
    fn test_signature_state_in_json() {
        let d = digest(b"a");
        let pass = Verdict::pass("k", d, d, TransparencyCheck::NotRecorded).with_signature(SignatureCheck::Valid);
        let json = serde_json::to_value(&pass).unwrap();
        assert_eq!(json["signature"]["state"], "VALID");

        let bad = Verdict::signature_mismatch("k", d, d, "bad signature");
        assert_eq!(bad.summary(), "k: FAIL (SIGNATURE_MISMATCH)");
        assert_eq!(bad.observed_status(), TrustStatus::Failed);

        // Verdicts written before the signature gate existed still parse.
        let mut old = serde_json::to_value(&Verdict::pass("k", d, d, TransparencyCheck::NotRecorded)).unwrap();
        old.as_object_mut().unwrap().remove("signature");
        let back: Verdict = serde_json::from_value(old).unwrap();
        assert_eq!(back.signature, SignatureCheck::NotChecked);
    }

    #[test]
    fn test_audit_event_copies_verdict() {
        let v = Verdict::checksum_mismatch("k", digest(b"a"), digest(b"b"));
        let event = AuditEvent::from_verdict(&v);
        assert_eq!(event.object_key, "k");
        assert_eq!(event.outcome, Outcome::Fail);
        assert_eq!(event.reason, Some(FailureReason::ChecksumMismatch));
        assert_eq!(event.event_id.len(), 26);
    }
}
