//! SalsaG - trust ledger and verification gate for CI/CD artifacts
//!
//! The record path packages, signs and uploads an artifact, then writes a
//! trust record. The verify path recomputes the digest and checks it
//! against that record and, when one is referenced, the public
//! transparency log.

pub mod bundle;
pub mod config;
pub mod context;
pub mod pipeline;
pub mod signing;
pub mod status;
pub mod telemetry;
pub mod timeout;
pub mod transparency;
pub mod verifier;

pub use salsag_ledger as ledger;
pub use salsag_ledger::{ErrorKind, TrustError, TrustRecord, TrustStatus, Verdict};

pub use context::Runtime;
pub use pipeline::{Orchestrator, PipelineOptions, PlanReport, RecordReport};
pub use status::{LedgerSummary, StatusReporter};
pub use verifier::Verifier;
