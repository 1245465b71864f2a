// error.rs - Error types for the audit ledger.

use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur during ledger operations.
#[derive(Debug, Error)]
pub enum AuditError {
    /// Failed to open or create the ledger file.
    #[error("failed to open audit ledger at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to write an entry.
    #[error("failed to append ledger entry: {0}")]
    WriteFailed(#[from] std::io::Error),

    /// An entry could not be serialized or a stored line is malformed JSON.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// The hash chain of one organization is broken.
    #[error("integrity check failed at line {line} (org {org_id}): expected previous hash {expected}, got {actual}")]
    IntegrityViolation {
        line: usize,
        org_id: Uuid,
        expected: String,
        actual: String,
    },

    /// A sequence number is out of order for its organization.
    #[error("sequence gap at line {line} (org {org_id}): expected seq {expected}, got {actual}")]
    SequenceGap {
        line: usize,
        org_id: Uuid,
        expected: u64,
        actual: u64,
    },

    /// The in-process ledger lock was poisoned by a panicking writer.
    #[error("audit ledger lock poisoned")]
    LockPoisoned,
}
