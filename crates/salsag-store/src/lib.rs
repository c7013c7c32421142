//! Filesystem-backed stores.
//!
//! [`FsObjectStore`] and [`FsLedgerStore`] implement the
//! `salsag_ledger` adapter traits over a local directory, suitable for a
//! single host or a shared network mount with working `flock`.

pub mod ledger;
pub mod lock;
pub mod object;

pub use ledger::{FsLedgerStore, DEFAULT_LOCK_TIMEOUT};
pub use lock::{LedgerLock, LockError};
pub use object::FsObjectStore;
