// ledger.rs - verify-ledger: recompute every org's hash chain.

use std::path::Path;

use trust_audit::{AuditError, AuditLedger};

pub fn execute(path: &Path) -> anyhow::Result<()> {
    if !path.exists() {
        println!("No audit ledger found at {}", path.display());
        return Ok(());
    }

    match AuditLedger::verify_chain(path) {
        Ok(count) => {
            println!("Audit ledger verified: {} entr(ies), hash chains intact.", count);
            Ok(())
        }
        Err(AuditError::IntegrityViolation {
            line,
            org_id,
            expected,
            actual,
        }) => {
            println!("INTEGRITY VIOLATION at line {} (org {}):", line, org_id);
            println!("  Expected previous_hash: {}", expected);
            println!("  Actual previous_hash:   {}", actual);
            anyhow::bail!("audit ledger integrity check failed")
        }
        Err(AuditError::SequenceGap {
            line,
            org_id,
            expected,
            actual,
        }) => {
            println!("SEQUENCE GAP at line {} (org {}): expected {}, got {}", line, org_id, expected, actual);
            anyhow::bail!("audit ledger integrity check failed")
        }
        Err(e) => Err(e.into()),
    }
}
