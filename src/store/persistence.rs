//! Commit log for file-backed counter stores

use crate::core::{HarnessError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind as IoErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

// ============================================================================
// Log Records
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogRecord {
    /// Drop-and-recreate of a cell.
    Reset { cell: String, value: i64 },
    /// Writes of one committed transaction.
    Commit { txn_id: u64, writes: Vec<(String, i64)> },
}

// ============================================================================
// Durability Configuration
// ============================================================================

/// How hard a commit pushes its log frame toward the disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DurabilityMode {
    /// fsync after every commit.
    Full,
    /// Flush to the OS, no fsync.
    #[default]
    Relaxed,
}

impl std::str::FromStr for DurabilityMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "full" => Ok(Self::Full),
            "relaxed" | "normal" => Ok(Self::Relaxed),
            other => Err(format!("unknown durability mode '{}'", other)),
        }
    }
}

// ============================================================================
// Commit Log
// ============================================================================

pub struct CommitLog {
    path: PathBuf,
    file: BufWriter<File>,
    durability: DurabilityMode,
    /// Bytes of complete, acknowledged frames
    len: u64,
    /// Set when a failed append could not be undone
    poisoned: bool,
    records_since_compaction: usize,
    compaction_threshold: usize,
}

impl CommitLog {
    /// Open or create the log, cutting off any torn trailing frame.
    pub fn open<P: AsRef<Path>>(path: P, durability: DurabilityMode) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    HarnessError::Io(format!("Failed to create log directory: {}", e))
                })?;
            }
        }

        let (_, len) = read_records(&path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| HarnessError::Io(format!("Failed to open commit log: {}", e)))?;

        let on_disk = file.metadata()?.len();
        if on_disk > len {
            warn!(path = %path.display(), kept = len, dropped = on_disk - len, "truncating torn log tail");
            file.set_len(len)
                .map_err(|e| HarnessError::Io(format!("Failed to truncate commit log: {}", e)))?;
            file.sync_all()?;
        }

        Ok(Self {
            path,
            file: BufWriter::new(file),
            durability,
            len,
            poisoned: false,
            records_since_compaction: 0,
            compaction_threshold: 10_000,
        })
    }

    /// Append one frame. On failure the log is cut back to its previous length.
    pub fn append(&mut self, record: &LogRecord) -> Result<()> {
        if self.poisoned {
            return Err(HarnessError::Corrupt(
                "commit log holds an unacknowledged frame".into(),
            ));
        }

        let frame = encode_frame(record)?;
        if let Err(err) = self.write_frame(&frame) {
            if let Err(rewind_err) = self.rewind() {
                self.poisoned = true;
                warn!(path = %self.path.display(), error = %rewind_err, "commit log poisoned");
            }
            return Err(err);
        }

        self.len += frame.len() as u64;
        self.records_since_compaction += 1;
        Ok(())
    }

    fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        self.file
            .write_all(frame)
            .map_err(|e| HarnessError::Io(format!("Failed to write commit log: {}", e)))?;
        self.file
            .flush()
            .map_err(|e| HarnessError::Io(format!("Failed to flush commit log: {}", e)))?;
        if self.durability == DurabilityMode::Full {
            self.file
                .get_mut()
                .sync_data()
                .map_err(|e| HarnessError::Io(format!("Failed to sync commit log: {}", e)))?;
        }
        Ok(())
    }

    /// Drop buffered bytes and cut the file back to the last acknowledged frame.
    fn rewind(&mut self) -> Result<()> {
        let file = OpenOptions::new().append(true).open(&self.path)?;
        file.set_len(self.len)?;
        let stale = std::mem::replace(&mut self.file, BufWriter::new(file));
        // into_parts hands back the buffer instead of flushing it
        let _ = stale.into_parts();
        Ok(())
    }

    /// Reads every complete frame. A torn trailing frame is treated as the end of the log.
    pub fn read_all(&self) -> Result<Vec<LogRecord>> {
        read_records(&self.path).map(|(records, _)| records)
    }

    pub fn needs_compaction(&self) -> bool {
        self.records_since_compaction >= self.compaction_threshold
    }

    pub fn set_compaction_threshold(&mut self, threshold: usize) {
        self.compaction_threshold = threshold.max(1);
    }

    /// Rewrites the log as one `Reset` per live cell.
    ///
    /// The new log is written beside the old one and renamed over it.
    pub fn compact(&mut self, cells: &HashMap<String, i64>) -> Result<()> {
        let temp_path = self.path.with_extension("compact");
        {
            let temp = File::create(&temp_path)
                .map_err(|e| HarnessError::Io(format!("Failed to create temp log: {}", e)))?;
            let mut writer = BufWriter::new(temp);
            let mut names: Vec<&String> = cells.keys().collect();
            names.sort();
            for name in names {
                let record = LogRecord::Reset {
                    cell: name.clone(),
                    value: cells[name],
                };
                writer.write_all(&encode_frame(&record)?)?;
            }
            writer.flush()?;
            writer.get_mut().sync_all()?;
        }
        fs::rename(&temp_path, &self.path)
            .map_err(|e| HarnessError::Io(format!("Failed to replace commit log: {}", e)))?;

        let file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|e| HarnessError::Io(format!("Failed to reopen commit log: {}", e)))?;
        self.len = file.metadata()?.len();
        self.file = BufWriter::new(file);
        self.poisoned = false;
        self.records_since_compaction = 0;
        debug!(path = %self.path.display(), cells = cells.len(), "commit log compacted");
        Ok(())
    }
}

fn encode_frame(record: &LogRecord) -> Result<Vec<u8>> {
    let payload = rmp_serde::to_vec(record)?;
    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Complete frames plus the byte length they span.
fn read_records(path: &Path) -> Result<(Vec<LogRecord>, u64)> {
    if !path.exists() {
        return Ok((Vec::new(), 0));
    }
    let file = File::open(path)
        .map_err(|e| HarnessError::Io(format!("Failed to open commit log for reading: {}", e)))?;
    let mut reader = BufReader::new(file);
    let mut records = Vec::new();
    let mut valid_len = 0u64;
    loop {
        let mut len_bytes = [0u8; 4];
        match reader.read_exact(&mut len_bytes) {
            Ok(()) => {}
            Err(e) if e.kind() == IoErrorKind::UnexpectedEof => {
                if reader.get_ref().metadata()?.len() > valid_len {
                    warn!(path = %path.display(), "ignoring torn trailing log frame");
                }
                break;
            }
            Err(e) => {
                return Err(HarnessError::Io(format!(
                    "Failed to read log frame length: {}",
                    e
                )));
            }
        }
        let len = u32::from_le_bytes(len_bytes) as usize;
        let mut data = vec![0u8; len];
        match reader.read_exact(&mut data) {
            Ok(()) => {}
            Err(e) if e.kind() == IoErrorKind::UnexpectedEof => {
                warn!(path = %path.display(), "ignoring torn trailing log frame");
                break;
            }
            Err(e) => {
                return Err(HarnessError::Io(format!("Failed to read log frame: {}", e)));
            }
        }
        records.push(rmp_serde::from_slice(&data)?);
        valid_len += (4 + len) as u64;
    }
    Ok((records, valid_len))
}

/// Rebuilds cell values from log records, in order.
pub fn replay(records: &[LogRecord]) -> HashMap<String, i64> {
    let mut cells = HashMap::new();
    for record in records {
        match record {
            LogRecord::Reset { cell, value } => {
                cells.insert(cell.clone(), *value);
            }
            LogRecord::Commit { writes, .. } => {
                for (cell, value) in writes {
                    cells.insert(cell.clone(), *value);
                }
            }
        }
    }
    cells
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn commit(txn_id: u64, value: i64) -> LogRecord {
        LogRecord::Commit {
            txn_id,
            writes: vec![("counter".to_string(), value)],
        }
    }

    #[test]
    fn test_append_and_replay() {
        let dir = TempDir::new().unwrap();
        let mut log = CommitLog::open(dir.path().join("counter.log"), DurabilityMode::Full).unwrap();

        log.append(&LogRecord::Reset { cell: "counter".into(), value: 0 }).unwrap();
        log.append(&commit(1, 1)).unwrap();
        log.append(&commit(2, 2)).unwrap();

        let records = log.read_all().unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(replay(&records).get("counter"), Some(&2));
    }

    #[test]
    fn test_reset_overrides_earlier_commits() {
        let records = vec![
            LogRecord::Reset { cell: "counter".into(), value: 0 },
            commit(1, 1),
            commit(2, 2),
            LogRecord::Reset { cell: "counter".into(), value: 0 },
        ];
        assert_eq!(replay(&records).get("counter"), Some(&0));
    }

    #[test]
    fn test_torn_tail_is_ignored() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("counter.log");
        {
            let mut log = CommitLog::open(&path, DurabilityMode::Relaxed).unwrap();
            log.append(&LogRecord::Reset { cell: "counter".into(), value: 0 }).unwrap();
            log.append(&commit(1, 1)).unwrap();
        }
        // Half a frame: a length prefix promising more bytes than exist.
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&64u32.to_le_bytes()).unwrap();
        file.write_all(&[0x92, 0x01]).unwrap();

        let (records, valid_len) = read_records(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(replay(&records).get("counter"), Some(&1));
        assert_eq!(valid_len, fs::metadata(&path).unwrap().len() - 6);
    }

    #[test]
    fn test_commits_after_torn_tail_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("counter.log");
        {
            let mut log = CommitLog::open(&path, DurabilityMode::Full).unwrap();
            log.append(&LogRecord::Reset { cell: "counter".into(), value: 0 }).unwrap();
            log.append(&commit(1, 1)).unwrap();
        }
        let clean_len = fs::metadata(&path).unwrap().len();
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&64u32.to_le_bytes()).unwrap();
        file.write_all(&[0x92, 0x01]).unwrap();
        drop(file);

        {
            let mut log = CommitLog::open(&path, DurabilityMode::Full).unwrap();
            assert_eq!(fs::metadata(&path).unwrap().len(), clean_len);
            log.append(&commit(2, 2)).unwrap();
            log.append(&commit(3, 3)).unwrap();
        }

        let log = CommitLog::open(&path, DurabilityMode::Full).unwrap();
        let records = log.read_all().unwrap();
        assert_eq!(records.len(), 4);
        assert_eq!(replay(&records).get("counter"), Some(&3));
    }

    #[test]
    fn test_rewind_discards_unacknowledged_frame() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("counter.log");
        let mut log = CommitLog::open(&path, DurabilityMode::Relaxed).unwrap();
        log.append(&LogRecord::Reset { cell: "counter".into(), value: 0 }).unwrap();

        // A frame half on disk and half still buffered, as left by a failed flush
        let frame = encode_frame(&commit(1, 1)).unwrap();
        log.file.get_mut().write_all(&frame[..3]).unwrap();
        log.file.write_all(&frame[3..]).unwrap();
        log.rewind().unwrap();

        log.append(&commit(2, 7)).unwrap();
        let records = log.read_all().unwrap();
        assert_eq!(records, vec![LogRecord::Reset { cell: "counter".into(), value: 0 }, commit(2, 7)]);
    }

    #[test]
    fn test_poisoned_log_rejects_appends() {
        let dir = TempDir::new().unwrap();
        let mut log = CommitLog::open(dir.path().join("counter.log"), DurabilityMode::Relaxed).unwrap();
        log.poisoned = true;

        let err = log.append(&commit(1, 1)).unwrap_err();
        assert!(matches!(err, HarnessError::Corrupt(_)));
        assert!(log.read_all().unwrap().is_empty());
    }

    #[test]
    fn test_compaction_keeps_latest_values() {
        let dir = TempDir::new().unwrap();
        let mut log = CommitLog::open(dir.path().join("counter.log"), DurabilityMode::Relaxed).unwrap();
        log.set_compaction_threshold(3);

        log.append(&LogRecord::Reset { cell: "counter".into(), value: 0 }).unwrap();
        for v in 1..=5 {
            log.append(&commit(v as u64, v)).unwrap();
        }
        assert!(log.needs_compaction());

        let cells = replay(&log.read_all().unwrap());
        log.compact(&cells).unwrap();
        assert!(!log.needs_compaction());

        let records = log.read_all().unwrap();
        assert_eq!(records, vec![LogRecord::Reset { cell: "counter".into(), value: 5 }]);

        log.append(&commit(6, 6)).unwrap();
        assert_eq!(replay(&log.read_all().unwrap()).get("counter"), Some(&6));
    }

    #[test]
    fn test_durability_mode_parsing() {
        assert_eq!("full".parse::<DurabilityMode>().unwrap(), DurabilityMode::Full);
        assert_eq!("RELAXED".parse::<DurabilityMode>().unwrap(), DurabilityMode::Relaxed);
        assert!("eventual".parse::<DurabilityMode>().is_err());
        assert_eq!(DurabilityMode::default(), DurabilityMode::Relaxed);
    }
}
