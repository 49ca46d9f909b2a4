//! Append-only write-ahead log (spec §4.6, "WAL").

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use xln_types::CoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalEntry {
    pub sequence_id: u64,
    pub timestamp_ms: i64,
    pub input: Value,
    pub checksum: String,
}

fn checksum_of(sequence_id: u64, timestamp_ms: i64, input_repr: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{sequence_id}:{timestamp_ms}:{input_repr}").as_bytes());
    hex::encode(hasher.finalize())
}

/// A single-writer, single-reader append-only log of every input the
/// scheduler has dispatched. The next sequence id on reopen is always
/// `(max existing id) + 1` — entries are never renumbered.
pub struct Wal {
    path: PathBuf,
    next_sequence: u64,
}

impl Wal {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref().to_path_buf();
        let next_sequence = if path.exists() {
            let entries = read_all(&path)?;
            entries.last().map(|e| e.sequence_id + 1).unwrap_or(0)
        } else {
            0
        };
        Ok(Self { path, next_sequence })
    }

    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Append one input. Failure here is fatal to the calling tick (spec
    /// §4.1, §7's `WALFailure` policy) — the caller decides how to react.
    pub fn append(&mut self, timestamp_ms: i64, input: &impl Serialize) -> Result<WalEntry, CoreError> {
        let value = serde_json::to_value(input).map_err(|e| CoreError::WalFailure {
            message: format!("input not serializable: {e}"),
        })?;
        let repr = serde_json::to_string(&value).map_err(|e| CoreError::WalFailure {
            message: format!("input not serializable: {e}"),
        })?;
        let sequence_id = self.next_sequence;
        let checksum = checksum_of(sequence_id, timestamp_ms, &repr);

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| CoreError::WalFailure { message: e.to_string() })?;
        writeln!(file, "{sequence_id} {timestamp_ms} {checksum} {repr}")
            .map_err(|e| CoreError::WalFailure { message: e.to_string() })?;
        file.sync_all().map_err(|e| CoreError::WalFailure { message: e.to_string() })?;

        self.next_sequence += 1;
        Ok(WalEntry {
            sequence_id,
            timestamp_ms,
            input: value,
            checksum,
        })
    }

    pub fn read_all(&self) -> Result<Vec<WalEntry>, CoreError> {
        read_all(&self.path)
    }

    pub fn read_from(&self, min_sequence: u64) -> Result<Vec<WalEntry>, CoreError> {
        Ok(self.read_all()?.into_iter().filter(|e| e.sequence_id >= min_sequence).collect())
    }

    /// Recompute every checksum and confirm sequence ids are strictly
    /// sequential starting at the first entry's id.
    pub fn verify_integrity(&self) -> Result<(), CoreError> {
        verify_integrity(&self.read_all()?)
    }

    /// Drop entries with `sequence_id < min_sequence` (spec §4.6's
    /// post-snapshot pruning window).
    pub fn prune_below(&mut self, min_sequence: u64) -> Result<(), CoreError> {
        let kept = self.read_from(min_sequence)?;
        let mut file = File::create(&self.path).map_err(|e| CoreError::WalFailure { message: e.to_string() })?;
        for entry in &kept {
            let repr = serde_json::to_string(&entry.input).map_err(|e| CoreError::WalFailure { message: e.to_string() })?;
            writeln!(file, "{} {} {} {}", entry.sequence_id, entry.timestamp_ms, entry.checksum, repr)
                .map_err(|e| CoreError::WalFailure { message: e.to_string() })?;
        }
        file.sync_all().map_err(|e| CoreError::WalFailure { message: e.to_string() })?;
        Ok(())
    }
}

fn read_all(path: &Path) -> Result<Vec<WalEntry>, CoreError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = File::open(path).map_err(|e| CoreError::RecoveryFailure { message: e.to_string() })?;
    let mut entries = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|e| CoreError::RecoveryFailure { message: e.to_string() })?;
        if line.is_empty() {
            continue;
        }
        entries.push(parse_line(&line)?);
    }
    Ok(entries)
}

fn parse_line(line: &str) -> Result<WalEntry, CoreError> {
    let mut parts = line.splitn(4, ' ');
    let malformed = || CoreError::RecoveryFailure {
        message: format!("malformed WAL line: {line}"),
    };
    let sequence_id: u64 = parts.next().ok_or_else(malformed)?.parse().map_err(|_| malformed())?;
    let timestamp_ms: i64 = parts.next().ok_or_else(malformed)?.parse().map_err(|_| malformed())?;
    let checksum = parts.next().ok_or_else(malformed)?.to_string();
    let repr = parts.next().ok_or_else(malformed)?;
    let input: Value = serde_json::from_str(repr).map_err(|_| malformed())?;
    Ok(WalEntry {
        sequence_id,
        timestamp_ms,
        input,
        checksum,
    })
}

fn verify_integrity(entries: &[WalEntry]) -> Result<(), CoreError> {
    for (i, entry) in entries.iter().enumerate() {
        if i > 0 && entry.sequence_id != entries[i - 1].sequence_id + 1 {
            return Err(CoreError::RecoveryFailure {
                message: format!(
                    "non-sequential WAL entry: {} follows {}",
                    entry.sequence_id,
                    entries[i - 1].sequence_id
                ),
            });
        }
        let repr = serde_json::to_string(&entry.input).map_err(|e| CoreError::RecoveryFailure { message: e.to_string() })?;
        let expected = checksum_of(entry.sequence_id, entry.timestamp_ms, &repr);
        if expected != entry.checksum {
            return Err(CoreError::RecoveryFailure {
                message: format!("checksum mismatch at sequence {}", entry.sequence_id),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sequence_ids_are_assigned_monotonically_and_resume_on_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wal.log");
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(0, &json!({"kind": "chat"})).unwrap();
            wal.append(10, &json!({"kind": "vote"})).unwrap();
        }
        let wal = Wal::open(&path).unwrap();
        assert_eq!(wal.next_sequence(), 2);
        let entries = wal.read_all().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].sequence_id, 0);
        assert_eq!(entries[1].sequence_id, 1);
    }

    #[test]
    fn verify_integrity_passes_on_untampered_log() {
        let dir = tempfile::tempdir().unwrap();
        let mut wal = Wal::open(dir.path().join("wal.log")).unwrap();
        wal.append(0, &json!({"a": 1})).unwrap();
        wal.append(5, &json!({"b": 2})).unwrap();
        assert!(wal.verify_integrity().is_ok());
    }

    #[test]
    fn verify_integrity_rejects_a_tampered_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wal.log");
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(0, &json!({"a": 1})).unwrap();
        }
        let tampered = std::fs::read_to_string(&path).unwrap().replace("\"a\":1", "\"a\":2");
        std::fs::write(&path, tampered).unwrap();
        let wal = Wal::open(&path).unwrap();
        assert!(matches!(wal.verify_integrity(), Err(CoreError::RecoveryFailure { .. })));
    }

    #[test]
    fn prune_below_drops_older_entries() {
        let dir = tempfile::tempdir().unwrap();
        let mut wal = Wal::open(dir.path().join("wal.log")).unwrap();
        for i in 0..5 {
            wal.append(i, &json!({"i": i})).unwrap();
        }
        wal.prune_below(3).unwrap();
        let entries = wal.read_all().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].sequence_id, 3);
    }
}
