//! In-memory adapters.
//!
//! Used by tests and by dry runs. Every adapter carries a [`FaultPlan`] so
//! outages can be injected per operation.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::digest::Digest;
use crate::error::{StoreError, StoreResult, TransparencyError};
use crate::fault::{FaultOp, FaultPlan, Triggered};
use crate::record::{validate_store_key, LogRef, ObjectRef, TrustRecord};
use crate::store::{LedgerStore, LogEntry, LogSubmission, ObjectStore, TransparencyLog, WriteCondition};
use crate::verdict::AuditEvent;

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn store_fault(faults: &FaultPlan, op: FaultOp) -> StoreResult<()> {
    match faults.check(op) {
        None => Ok(()),
        Some(Triggered::Unavailable) => Err(StoreError::unavailable(format!("injected outage on {:?}", op))),
        Some(Triggered::Timeout(after)) => Err(StoreError::Timeout { after }),
    }
}

/// Object store holding one bucket in memory.
#[derive(Debug)]
pub struct MemoryObjectStore {
    bucket: String,
    objects: RwLock<BTreeMap<String, Vec<u8>>>,
    faults: Arc<FaultPlan>,
}

impl MemoryObjectStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            objects: RwLock::new(BTreeMap::new()),
            faults: Arc::new(FaultPlan::new()),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn faults(&self) -> &FaultPlan {
        &self.faults
    }

    /// Replace stored bytes behind the store's back.
    pub fn tamper(&self, key: &str, bytes: &[u8]) {
        write(&self.objects).insert(key.to_string(), bytes.to_vec());
    }

    pub fn len(&self) -> usize {
        read(&self.objects).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_bucket(&self, reference: &ObjectRef) -> StoreResult<()> {
        if reference.bucket != self.bucket {
            return Err(StoreError::not_found(reference.to_string()));
        }
        Ok(())
    }
}

impl ObjectStore for MemoryObjectStore {
    fn put(&self, key: &str, bytes: &[u8]) -> StoreResult<ObjectRef> {
        store_fault(&self.faults, FaultOp::Put)?;
        validate_store_key(key).map_err(|e| StoreError::InvalidKey {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        write(&self.objects).insert(key.to_string(), bytes.to_vec());
        Ok(ObjectRef::new(self.bucket.clone(), key))
    }

    fn get(&self, reference: &ObjectRef) -> StoreResult<Vec<u8>> {
        store_fault(&self.faults, FaultOp::Get)?;
        self.check_bucket(reference)?;
        read(&self.objects)
            .get(&reference.key)
            .cloned()
            .ok_or_else(|| StoreError::not_found(reference.to_string()))
    }

    fn exists(&self, reference: &ObjectRef) -> StoreResult<bool> {
        store_fault(&self.faults, FaultOp::Exists)?;
        Ok(reference.bucket == self.bucket && read(&self.objects).contains_key(&reference.key))
    }
}

/// Ledger store keyed by `object_key`.
#[derive(Debug, Default)]
pub struct MemoryLedgerStore {
    records: RwLock<BTreeMap<String, TrustRecord>>,
    audit: RwLock<Vec<AuditEvent>>,
    faults: Arc<FaultPlan>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn faults(&self) -> &FaultPlan {
        &self.faults
    }

    /// Overwrite a record unconditionally, bypassing revision checks.
    pub fn force_insert(&self, record: TrustRecord) {
        write(&self.records).insert(record.object_key.clone(), record);
    }
}

impl LedgerStore for MemoryLedgerStore {
    fn put_record(&self, record: &TrustRecord, condition: WriteCondition) -> StoreResult<()> {
        store_fault(&self.faults, FaultOp::PutRecord)?;
        let mut records = write(&self.records);
        let current = records.get(&record.object_key).map(|r| r.revision);

        let holds = match (condition, current) {
            (WriteCondition::Absent, None) => true,
            (WriteCondition::Revision(expected), Some(actual)) => expected == actual,
            _ => false,
        };
        if !holds {
            return Err(StoreError::Conflict {
                key: record.object_key.clone(),
            });
        }

        records.insert(record.object_key.clone(), record.clone());
        Ok(())
    }

    fn get_record(&self, object_key: &str) -> StoreResult<Option<TrustRecord>> {
        store_fault(&self.faults, FaultOp::GetRecord)?;
        Ok(read(&self.records).get(object_key).cloned())
    }

    fn scan(&self) -> StoreResult<Vec<TrustRecord>> {
        store_fault(&self.faults, FaultOp::Scan)?;
        Ok(read(&self.records).values().cloned().collect())
    }

    fn append_audit(&self, event: &AuditEvent) -> StoreResult<()> {
        store_fault(&self.faults, FaultOp::AppendAudit)?;
        write(&self.audit).push(event.clone());
        Ok(())
    }

    fn audit_trail(&self, object_key: &str) -> StoreResult<Vec<AuditEvent>> {
        store_fault(&self.faults, FaultOp::AuditTrail)?;
        Ok(read(&self.audit)
            .iter()
            .filter(|e| e.object_key == object_key)
            .cloned()
            .collect())
    }
}

/// Transparency log that keeps entries in memory.
#[derive(Debug, Default)]
pub struct MemoryTransparencyLog {
    entries: RwLock<BTreeMap<String, LogEntry>>,
    next_index: RwLock<u64>,
    faults: Arc<FaultPlan>,
}

impl MemoryTransparencyLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn faults(&self) -> &FaultPlan {
        &self.faults
    }

    /// Insert or replace an entry directly.
    pub fn insert(&self, log_ref: LogRef, digest: Digest) {
        let entry = LogEntry {
            log_ref: log_ref.clone(),
            digest,
            log_index: None,
            integrated_time: None,
        };
        write(&self.entries).insert(log_ref.0, entry);
    }

    pub fn remove(&self, log_ref: &LogRef) {
        write(&self.entries).remove(log_ref.as_str());
    }

    pub fn len(&self) -> usize {
        read(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn fault(&self, op: FaultOp) -> Result<(), TransparencyError> {
        match self.faults.check(op) {
            None => Ok(()),
            Some(Triggered::Unavailable) => {
                Err(TransparencyError::Unreachable("injected outage".to_string()))
            }
            Some(Triggered::Timeout(after)) => Err(TransparencyError::Timeout(after)),
        }
    }
}

impl TransparencyLog for MemoryTransparencyLog {
    fn submit(&self, entry: &LogSubmission) -> Result<LogRef, TransparencyError> {
        self.fault(FaultOp::Submit)?;
        if entry.signature.is_empty() {
            return Err(TransparencyError::Rejected("empty signature".to_string()));
        }

        let mut entries = write(&self.entries);
        if let Some(existing) = entries.values().find(|e| e.digest == entry.digest) {
            return Ok(existing.log_ref.clone());
        }

        let index = {
            let mut next = write(&self.next_index);
            let index = *next;
            *next += 1;
            index
        };
        let log_ref = LogRef::new(ulid::Ulid::new().to_string().to_lowercase());
        entries.insert(
            log_ref.0.clone(),
            LogEntry {
                log_ref: log_ref.clone(),
                digest: entry.digest,
                log_index: Some(index),
                integrated_time: Some(chrono::Utc::now().timestamp()),
            },
        );
        Ok(log_ref)
    }

    fn lookup(&self, log_ref: &LogRef) -> Result<Option<LogEntry>, TransparencyError> {
        self.fault(FaultOp::Lookup)?;
        let entries = read(&self.entries);
        if log_ref.is_log_index() {
            let wanted: u64 = log_ref
                .as_str()
                .parse()
                .map_err(|_| TransparencyError::Malformed(format!("bad log index {}", log_ref)))?;
            return Ok(entries.values().find(|e| e.log_index == Some(wanted)).cloned());
        }
        Ok(entries.get(log_ref.as_str()).cloned())
    }
}
