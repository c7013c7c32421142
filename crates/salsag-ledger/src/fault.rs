//! Fault injection for the in-memory adapters.
//!
//! Lets tests drive the outage and latency paths of the pipeline without a
//! real network.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// Adapter operations that can be faulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultOp {
    Put,
    Get,
    Exists,
    PutRecord,
    GetRecord,
    Scan,
    AppendAudit,
    AuditTrail,
    Submit,
    Lookup,
}

/// What to do when a faulted operation is called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Return an "unavailable" error.
    Unavailable,
    /// Return a timeout error.
    Timeout,
    /// Only sleep, then proceed normally.
    Latency,
}

/// One injected fault.
#[derive(Debug, Clone)]
pub struct Fault {
    pub kind: FaultKind,
    /// Sleep before answering.
    pub delay: Option<Duration>,
    /// Fail this many calls, then succeed. `None` fails forever.
    pub fail_count: Option<u32>,
}

impl Fault {
    pub fn unavailable() -> Self {
        Self {
            kind: FaultKind::Unavailable,
            delay: None,
            fail_count: None,
        }
    }

    pub fn timeout(after: Duration) -> Self {
        Self {
            kind: FaultKind::Timeout,
            delay: Some(after),
            fail_count: None,
        }
    }

    pub fn latency(delay: Duration) -> Self {
        Self {
            kind: FaultKind::Latency,
            delay: Some(delay),
            fail_count: None,
        }
    }

    pub fn times(mut self, count: u32) -> Self {
        self.fail_count = Some(count);
        self
    }
}

/// Triggered fault returned to the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Triggered {
    Unavailable,
    Timeout(Duration),
}

/// Per-operation fault table with call counters.
#[derive(Debug, Default)]
pub struct FaultPlan {
    inner: Mutex<PlanState>,
}

#[derive(Debug, Default)]
struct PlanState {
    faults: HashMap<FaultOp, Fault>,
    calls: HashMap<FaultOp, u32>,
}

impl FaultPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inject(&self, op: FaultOp, fault: Fault) {
        let mut state = self.lock();
        state.faults.insert(op, fault);
        state.calls.insert(op, 0);
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.faults.clear();
        state.calls.clear();
    }

    /// Number of times `op` was called since it was injected.
    pub fn calls(&self, op: FaultOp) -> u32 {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Apply the fault for `op`, sleeping if a delay is configured.
    ///
    /// Returns the error the adapter should surface, or `None` to proceed.
    pub fn check(&self, op: FaultOp) -> Option<Triggered> {
        let (fault, active) = {
            let mut state = self.lock();
            let fault = state.faults.get(&op).cloned()?;
            let count = state.calls.entry(op).or_insert(0);
            *count += 1;
            let active = fault.fail_count.map_or(true, |limit| *count <= limit);
            (fault, active)
        };

        if !active {
            return None;
        }
        if let Some(delay) = fault.delay {
            std::thread::sleep(delay);
        }
        match fault.kind {
            FaultKind::Unavailable => Some(Triggered::Unavailable),
            FaultKind::Timeout => Some(Triggered::Timeout(fault.delay.unwrap_or_default())),
            FaultKind::Latency => None,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PlanState> {
        // A panicking test thread must not wedge the other adapters.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
