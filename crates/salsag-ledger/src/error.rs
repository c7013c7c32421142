//! Error taxonomy for the trust pipeline.
//!
//! Adapter errors ([`StoreError`], [`TransparencyError`]) stay close to the
//! backing technology. Everything that crosses an operation boundary is a
//! [`TrustError`], which always carries one [`ErrorKind`] and, where one
//! exists, the offending `object_key`.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// A store could not be reached or did not answer in time.
    StoreUnavailable,
    /// The object or record is absent.
    NotFound,
    /// Recomputed digest differs from the recorded one.
    ChecksumMismatch,
    /// The transparency log was reachable and disagreed with the ledger.
    TransparencyMismatch,
    /// The external signer failed or returned unusable output.
    SigningFailed,
    /// Configuration rejected before any network call.
    ConfigInvalid,
    /// A different digest was presented for an existing `object_key`.
    DigestConflict,
    /// A stored record could not be decoded. Re-running will not help.
    StoreCorrupt,
}

impl ErrorKind {
    /// Only store unavailability may be retried by re-running the operation.
    pub fn is_transient(&self) -> bool {
        matches!(self, ErrorKind::StoreUnavailable)
    }

    /// Stable process exit code for the CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorKind::ConfigInvalid => 2,
            ErrorKind::StoreUnavailable => 3,
            ErrorKind::NotFound => 4,
            ErrorKind::SigningFailed => 5,
            ErrorKind::DigestConflict => 6,
            ErrorKind::ChecksumMismatch => 7,
            ErrorKind::TransparencyMismatch => 8,
            ErrorKind::StoreCorrupt => 9,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::StoreUnavailable => "STORE_UNAVAILABLE",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::ChecksumMismatch => "CHECKSUM_MISMATCH",
            ErrorKind::TransparencyMismatch => "TRANSPARENCY_MISMATCH",
            ErrorKind::SigningFailed => "SIGNING_FAILED",
            ErrorKind::ConfigInvalid => "CONFIG_INVALID",
            ErrorKind::DigestConflict => "DIGEST_CONFLICT",
            ErrorKind::StoreCorrupt => "STORE_CORRUPT",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operation-level error surfaced to callers.
#[derive(Debug, Clone, Error)]
#[error("{kind} [{}]: {message}", .object_key.as_deref().unwrap_or("-"))]
pub struct TrustError {
    pub kind: ErrorKind,
    pub object_key: Option<String>,
    pub message: String,
}

impl TrustError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            object_key: None,
            message: message.into(),
        }
    }

    /// Attach the artifact this error concerns.
    pub fn for_key(mut self, object_key: impl Into<String>) -> Self {
        self.object_key = Some(object_key.into());
        self
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConfigInvalid, message)
    }

    pub fn signing(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SigningFailed, message)
    }

    pub fn store_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::StoreUnavailable, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    /// Map a store error into the taxonomy for one key.
    pub fn from_store(err: StoreError, object_key: &str) -> Self {
        Self::from(err).for_key(object_key)
    }

    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }
}

impl From<StoreError> for TrustError {
    fn from(err: StoreError) -> Self {
        let kind = match err {
            StoreError::NotFound { .. } => ErrorKind::NotFound,
            StoreError::Corrupt { .. } => ErrorKind::StoreCorrupt,
            StoreError::InvalidKey { .. } => ErrorKind::ConfigInvalid,
            StoreError::Unavailable { .. } | StoreError::Timeout { .. } | StoreError::Conflict { .. } => {
                ErrorKind::StoreUnavailable
            }
        };
        Self::new(kind, err.to_string())
    }
}

/// Result alias for store adapters.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors from Object Store and Ledger Store adapters.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {message}")]
    Unavailable { message: String },

    #[error("store operation timed out after {after:?}")]
    Timeout { after: Duration },

    #[error("not found: {reference}")]
    NotFound { reference: String },

    /// A conditional write's precondition did not hold.
    #[error("conditional write conflict on {key}")]
    Conflict { key: String },

    #[error("corrupt entry {reference}: {message}")]
    Corrupt { reference: String, message: String },

    #[error("invalid key {key:?}: {reason}")]
    InvalidKey { key: String, reason: String },
}

impl StoreError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        StoreError::Unavailable {
            message: message.into(),
        }
    }

    pub fn not_found(reference: impl Into<String>) -> Self {
        StoreError::NotFound {
            reference: reference.into(),
        }
    }

    /// Whether re-running the whole operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::Unavailable { .. } | StoreError::Timeout { .. } | StoreError::Conflict { .. }
        )
    }
}

/// Errors from a transparency log adapter.
///
/// Only [`TransparencyError::is_unavailable`] errors let verification
/// continue on ledger evidence. A log that answered with a rejection or
/// an unreadable entry did not confirm the digest.
#[derive(Debug, Error)]
pub enum TransparencyError {
    #[error("transparency log unreachable: {0}")]
    Unreachable(String),

    #[error("transparency log timed out after {0:?}")]
    Timeout(Duration),

    #[error("transparency log rejected the request: {0}")]
    Rejected(String),

    #[error("malformed transparency log response: {0}")]
    Malformed(String),
}

impl TransparencyError {
    /// The log could not be reached or did not answer in time.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, TransparencyError::Unreachable(_) | TransparencyError::Timeout(_))
    }
}
