// sink.rs - Shared audit collaborators.
//
// The decision engine appends through `AuditSink` from background workers,
// so implementations take `&self` and synchronize internally.

use std::path::Path;
use std::sync::Mutex;

use crate::error::AuditError;
use crate::event::{AuditRecord, LedgerEntry};
use crate::ledger::{AuditLedger, ChainState};

/// Destination for audit records.
pub trait AuditSink: Send + Sync {
    fn record(&self, record: AuditRecord) -> Result<(), AuditError>;
}

/// Thread-safe handle to a file ledger.
pub struct SharedLedger {
    inner: Mutex<AuditLedger>,
}

impl SharedLedger {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        Ok(Self {
            inner: Mutex::new(AuditLedger::open(path)?),
        })
    }
}

impl AuditSink for SharedLedger {
    fn record(&self, record: AuditRecord) -> Result<(), AuditError> {
        let mut ledger = self.inner.lock().map_err(|_| AuditError::LockPoisoned)?;
        ledger.append(record)?;
        Ok(())
    }
}

/// In-memory ledger with the same chaining as the file ledger.
#[derive(Default)]
pub struct MemoryLedger {
    state: Mutex<(ChainState, Vec<LedgerEntry>)>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every entry, in append order.
    pub fn entries(&self) -> Vec<LedgerEntry> {
        self.state
            .lock()
            .map(|s| s.1.clone())
            .unwrap_or_default()
    }
}

impl AuditSink for MemoryLedger {
    fn record(&self, record: AuditRecord) -> Result<(), AuditError> {
        let mut state = self.state.lock().map_err(|_| AuditError::LockPoisoned)?;
        let (entry, _line) = state.0.link(record)?;
        state.1.push(entry);
        Ok(())
    }
}
