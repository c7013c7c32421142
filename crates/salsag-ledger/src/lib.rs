//! SalsaG ledger core
//!
//! Trust record model, SHA-256 digest engine, error taxonomy and the
//! contracts every evidence source (object store, ledger store,
//! transparency log) implements.

pub mod digest;
pub mod error;
pub mod fault;
pub mod memory;
pub mod policy;
pub mod record;
pub mod store;
pub mod verdict;

pub use digest::{compare, digest, digest_file, digest_reader, Digest, DigestParseError, DIGEST_PREFIX};
pub use error::{ErrorKind, StoreError, StoreResult, TransparencyError, TrustError};
pub use policy::{RecordOutcome, SigningEvidence, TrustLedger, MAX_CAS_ATTEMPTS};
pub use record::{validate_object_key, validate_store_key, KeyError, LogRef, ObjectRef, TrustRecord, TrustStatus};
pub use store::{LedgerStore, LogEntry, LogSubmission, ObjectStore, TransparencyLog, WriteCondition};
pub use verdict::{AuditEvent, FailureReason, Outcome, SignatureCheck, TransparencyCheck, Verdict};
