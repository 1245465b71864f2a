// ledger.rs - Append-only JSONL audit ledger with per-org hash chains.
//
// One JSON object per line. Each org has its own chain: an entry's
// `previous_hash` is the SHA-256 of the raw JSON line of that org's previous
// entry, and `seq` increments by one per org. Inserting, deleting or editing
// any line breaks its org's chain and is caught by `verify_chain`.
//
// The raw line is hashed rather than a re-serialization, so field order in
// the file is what is protected.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::error::AuditError;
use crate::event::{AuditRecord, LedgerEntry};
use crate::hasher;

/// Chain head per org: (last seq, hash of last line).
#[derive(Debug, Default, Clone)]
pub(crate) struct ChainState {
    heads: HashMap<Uuid, (u64, String)>,
}

impl ChainState {
    /// Render a record as the next entry of its org's chain without
    /// advancing the chain.
    pub(crate) fn render(&self, record: AuditRecord) -> Result<(LedgerEntry, String), AuditError> {
        let (seq, previous_hash) = match self.heads.get(&record.org_id) {
            Some((seq, hash)) => (seq + 1, Some(hash.clone())),
            None => (1, None),
        };
        let entry = LedgerEntry::chained(record, seq, previous_hash);
        let line = serde_json::to_string(&entry)?;
        Ok((entry, line))
    }

    /// Make a rendered entry the head of its org's chain.
    pub(crate) fn commit(&mut self, entry: &LedgerEntry, line: &str) {
        self.heads
            .insert(entry.org_id, (entry.seq, hasher::hash_str(line)));
    }

    pub(crate) fn link(&mut self, record: AuditRecord) -> Result<(LedgerEntry, String), AuditError> {
        let (entry, line) = self.render(record)?;
        self.commit(&entry, &line);
        Ok((entry, line))
    }

    /// Write the next entry to `out`. The chain only advances once the line
    /// is flushed, so a failed write leaves the head where the file is.
    fn write_next<W: Write>(
        &mut self,
        out: &mut W,
        record: AuditRecord,
    ) -> Result<LedgerEntry, AuditError> {
        let (entry, line) = self.render(record)?;
        writeln!(out, "{}", line)?;
        out.flush()?;
        self.commit(&entry, &line);
        Ok(entry)
    }

    /// Check one stored line against the chain and advance it.
    fn verify_line(&mut self, line_num: usize, line: &str) -> Result<LedgerEntry, AuditError> {
        let entry: LedgerEntry = serde_json::from_str(line)?;
        let (expected_seq, expected_hash) = match self.heads.get(&entry.org_id) {
            Some((seq, hash)) => (seq + 1, Some(hash.clone())),
            None => (1, None),
        };
        if entry.previous_hash != expected_hash {
            return Err(AuditError::IntegrityViolation {
                line: line_num,
                org_id: entry.org_id,
                expected: expected_hash.unwrap_or_else(|| "None".to_string()),
                actual: entry
                    .previous_hash
                    .clone()
                    .unwrap_or_else(|| "None".to_string()),
            });
        }
        if entry.seq != expected_seq {
            return Err(AuditError::SequenceGap {
                line: line_num,
                org_id: entry.org_id,
                expected: expected_seq,
                actual: entry.seq,
            });
        }
        self.heads
            .insert(entry.org_id, (entry.seq, hasher::hash_str(line)));
        Ok(entry)
    }
}

/// File-backed ledger.
pub struct AuditLedger {
    writer: BufWriter<File>,
    path: PathBuf,
    chain: ChainState,
}

impl AuditLedger {
    /// Open (or create) a ledger. Existing content is verified and its chain
    /// heads recovered so new entries link correctly.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();
        let chain = if path.exists() {
            Self::scan(&path)?.1
        } else {
            ChainState::default()
        };

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| AuditError::OpenFailed {
                path: path.clone(),
                source,
            })?;

        Ok(Self {
            writer: BufWriter::new(file),
            path,
            chain,
        })
    }

    /// Append a record, flushing before returning.
    pub fn append(&mut self, record: AuditRecord) -> Result<LedgerEntry, AuditError> {
        let entry = self.chain.write_next(&mut self.writer, record)?;
        tracing::debug!(
            org_id = %entry.org_id,
            seq = entry.seq,
            action = %entry.action,
            "appended audit entry"
        );
        Ok(entry)
    }

    /// Read every entry, oldest first. Blank lines are skipped.
    pub fn read_all(path: impl AsRef<Path>) -> Result<Vec<LedgerEntry>, AuditError> {
        let reader = Self::reader(path.as_ref())?;
        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            entries.push(serde_json::from_str(&line)?);
        }
        Ok(entries)
    }

    /// Verify every org chain in the file. Returns the number of entries
    /// checked, or the first violation found.
    pub fn verify_chain(path: impl AsRef<Path>) -> Result<usize, AuditError> {
        Ok(Self::scan(path.as_ref())?.0)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn scan(path: &Path) -> Result<(usize, ChainState), AuditError> {
        let reader = Self::reader(path)?;
        let mut chain = ChainState::default();
        let mut count = 0;
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            chain.verify_line(idx + 1, &line)?;
            count += 1;
        }
        Ok((count, chain))
    }

    fn reader(path: &Path) -> Result<BufReader<File>, AuditError> {
        let file = File::open(path).map_err(|source| AuditError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(BufReader::new(file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::AuditAction;
    use serde_json::json;
    use tempfile::tempdir;

    fn record(org: Uuid, n: u32) -> AuditRecord {
        AuditRecord::new(org, AuditAction::DecisionTraceRecorded, json!({"n": n}))
    }

    #[test]
    fn append_and_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger.jsonl");
        let org = Uuid::new_v4();
        {
            let mut ledger = AuditLedger::open(&path).unwrap();
            ledger.append(record(org, 1)).unwrap();
            ledger
                .append(AuditRecord::new(org, AuditAction::FederationBoundaryCrossing, json!({})))
                .unwrap();
        }
        let entries = AuditLedger::read_all(&path).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].seq, 1);
        assert!(entries[0].previous_hash.is_none());
        assert_eq!(entries[1].seq, 2);
        assert!(entries[1].previous_hash.is_some());
        assert_eq!(entries[1].action, AuditAction::FederationBoundaryCrossing);
    }

    #[test]
    fn chains_are_per_org() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger.jsonl");
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let mut ledger = AuditLedger::open(&path).unwrap();
        ledger.append(record(a, 1)).unwrap();
        let first_b = ledger.append(record(b, 1)).unwrap();
        let second_a = ledger.append(record(a, 2)).unwrap();
        assert_eq!(first_b.seq, 1);
        assert!(first_b.previous_hash.is_none());
        assert_eq!(second_a.seq, 2);
        assert_eq!(AuditLedger::verify_chain(&path).unwrap(), 3);
    }

    #[test]
    fn reopen_continues_chain() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger.jsonl");
        let org = Uuid::new_v4();
        {
            let mut ledger = AuditLedger::open(&path).unwrap();
            ledger.append(record(org, 1)).unwrap();
        }
        {
            let mut ledger = AuditLedger::open(&path).unwrap();
            let entry = ledger.append(record(org, 2)).unwrap();
            assert_eq!(entry.seq, 2);
        }
        assert_eq!(AuditLedger::verify_chain(&path).unwrap(), 2);
    }

    #[test]
    fn tampering_detected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger.jsonl");
        let org = Uuid::new_v4();
        {
            let mut ledger = AuditLedger::open(&path).unwrap();
            for n in 0..3 {
                ledger.append(record(org, n)).unwrap();
            }
        }
        let content = std::fs::read_to_string(&path).unwrap();
        let tampered = content.replacen("{\"n\":1}", "{\"n\":99}", 1);
        assert_ne!(content, tampered);
        std::fs::write(&path, tampered).unwrap();

        match AuditLedger::verify_chain(&path) {
            Err(AuditError::IntegrityViolation { line, .. }) => assert_eq!(line, 3),
            other => panic!("expected IntegrityViolation, got {:?}", other),
        }
        // A tampered file cannot be reopened for appending.
        assert!(AuditLedger::open(&path).is_err());
    }

    #[test]
    fn deleted_line_detected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger.jsonl");
        let org = Uuid::new_v4();
        {
            let mut ledger = AuditLedger::open(&path).unwrap();
            for n in 0..3 {
                ledger.append(record(org, n)).unwrap();
            }
        }
        let content = std::fs::read_to_string(&path).unwrap();
        let kept: Vec<&str> = content.lines().enumerate().filter(|(i, _)| *i != 1).map(|(_, l)| l).collect();
        std::fs::write(&path, kept.join("\n")).unwrap();
        assert!(AuditLedger::verify_chain(&path).is_err());
    }

    struct FailingWriter {
        fail: bool,
        written: Vec<u8>,
    }

    impl Write for FailingWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if self.fail {
                return Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full"));
            }
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn failed_write_does_not_advance_chain() {
        let org = Uuid::new_v4();
        let mut chain = ChainState::default();
        let mut out = FailingWriter {
            fail: true,
            written: Vec::new(),
        };

        match chain.write_next(&mut out, record(org, 1)) {
            Err(AuditError::WriteFailed(_)) => {}
            other => panic!("expected WriteFailed, got {:?}", other),
        }

        out.fail = false;
        let entry = chain.write_next(&mut out, record(org, 2)).unwrap();
        assert_eq!(entry.seq, 1);
        assert!(entry.previous_hash.is_none());

        let next = chain.write_next(&mut out, record(org, 3)).unwrap();
        assert_eq!(next.seq, 2);
        let first_line = String::from_utf8(out.written).unwrap();
        let first_line = first_line.lines().next().unwrap().to_string();
        assert_eq!(next.previous_hash, Some(hasher::hash_str(&first_line)));
    }
}
