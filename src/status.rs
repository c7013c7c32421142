//! Ledger summary statistics.

use std::sync::Arc;

use salsag_ledger::{LedgerStore, TrustError, TrustRecord, TrustStatus};
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LedgerSummary {
    pub total: usize,
    pub verified_count: usize,
    pub failed_count: usize,
    pub recorded_only_count: usize,
}

impl LedgerSummary {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a TrustRecord>) -> Self {
        records.into_iter().fold(Self::default(), |mut acc, record| {
            acc.total += 1;
            match record.status {
                TrustStatus::Verified => acc.verified_count += 1,
                TrustStatus::Failed => acc.failed_count += 1,
                TrustStatus::Recorded => acc.recorded_only_count += 1,
            }
            acc
        })
    }
}

/// Read-only reporter over a ledger store.
pub struct StatusReporter {
    ledger: Arc<dyn LedgerStore>,
}

impl StatusReporter {
    pub fn new(ledger: Arc<dyn LedgerStore>) -> Self {
        Self { ledger }
    }

    pub fn summarize(&self) -> Result<LedgerSummary, TrustError> {
        let records = self.ledger.scan().map_err(TrustError::from)?;
        Ok(LedgerSummary::from_records(&records))
    }

    /// Records sorted by key, for listings.
    pub fn records(&self) -> Result<Vec<TrustRecord>, TrustError> {
        let mut records = self.ledger.scan().map_err(TrustError::from)?;
        records.sort_by(|a, b| a.object_key.cmp(&b.object_key));
        Ok(records)
    }
}
