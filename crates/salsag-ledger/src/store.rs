//! Evidence source contracts.
//!
//! The orchestrator and verifier only see these traits, so backing
//! technology (filesystem, in-memory fakes, remote services) is swapped by
//! injecting a different `Arc<dyn ...>`.

use serde::{Deserialize, Serialize};

use crate::digest::Digest;
use crate::error::{StoreResult, TransparencyError};
use crate::record::{LogRef, ObjectRef, TrustRecord};
use crate::verdict::AuditEvent;

/// Blob storage for artifacts, signatures, certificates and documents.
pub trait ObjectStore: Send + Sync {
    /// Store bytes under `key`, overwriting any previous object.
    fn put(&self, key: &str, bytes: &[u8]) -> StoreResult<ObjectRef>;

    /// Fetch the bytes behind a reference.
    fn get(&self, reference: &ObjectRef) -> StoreResult<Vec<u8>>;

    fn exists(&self, reference: &ObjectRef) -> StoreResult<bool>;
}

/// Precondition for a conditional ledger write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteCondition {
    /// No record may exist for the key.
    Absent,
    /// The stored record must still be at this revision.
    Revision(u64),
}

/// Authoritative store of trust records.
pub trait LedgerStore: Send + Sync {
    /// Write a record if `condition` holds, failing with
    /// [`StoreError::Conflict`](crate::StoreError::Conflict) otherwise.
    fn put_record(&self, record: &TrustRecord, condition: WriteCondition) -> StoreResult<()>;

    fn get_record(&self, object_key: &str) -> StoreResult<Option<TrustRecord>>;

    /// Every record, in unspecified order.
    fn scan(&self) -> StoreResult<Vec<TrustRecord>>;

    /// Append a verification observation.
    fn append_audit(&self, event: &AuditEvent) -> StoreResult<()>;

    /// Observations for one key, oldest first.
    fn audit_trail(&self, object_key: &str) -> StoreResult<Vec<AuditEvent>>;
}

/// What gets submitted to the transparency log.
#[derive(Debug, Clone)]
pub struct LogSubmission {
    pub digest: Digest,
    pub signature: Vec<u8>,
    /// PEM certificate (or public key) that verifies `signature`.
    pub certificate: Vec<u8>,
}

/// An entry read back from the transparency log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub log_ref: LogRef,
    /// Artifact digest the entry attests to.
    pub digest: Digest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_index: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrated_time: Option<i64>,
}

/// Public append-only attestation index, consulted opportunistically.
///
/// Implementations must bound every call with a timeout and report
/// unreachability as an error rather than blocking.
pub trait TransparencyLog: Send + Sync {
    fn submit(&self, entry: &LogSubmission) -> Result<LogRef, TransparencyError>;

    /// `Ok(None)` means the log answered and has no such entry.
    fn lookup(&self, log_ref: &LogRef) -> Result<Option<LogEntry>, TransparencyError>;
}
