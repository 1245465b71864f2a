//! # trust-audit
//!
//! Append-only audit ledger for authorization decisions and policy changes.
//!
//! Every entry is one line of a JSONL file. Entries are chained per
//! organization: each carries the hash of its org's previous line and a
//! per-org sequence number, so edits, deletions and insertions are
//! detectable with [`AuditLedger::verify_chain`].
//!
//! ```rust,no_run
//! use trust_audit::{AuditAction, AuditLedger, AuditRecord};
//! use uuid::Uuid;
//!
//! let mut ledger = AuditLedger::open("/tmp/ledger.jsonl").unwrap();
//! let record = AuditRecord::new(
//!     Uuid::new_v4(),
//!     AuditAction::DecisionTraceRecorded,
//!     serde_json::json!({"trace_id": "9f2c4e1a0b7d3c55", "allow": true}),
//! );
//! ledger.append(record).unwrap();
//! ```

pub mod error;
pub mod event;
pub mod hasher;
pub mod ledger;
pub mod sink;

pub use error::AuditError;
pub use event::{AuditAction, AuditRecord, LedgerEntry};
pub use ledger::AuditLedger;
pub use sink::{AuditSink, MemoryLedger, SharedLedger};
