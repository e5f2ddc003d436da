//! Audit sinks. `AuditSink` is the abstract interface spec.md §9's Design
//! Notes calls for in place of a hard-coded global log file handle;
//! `FileAuditSink` is grounded directly on the relay storage crate's
//! `AppendLog` (size-triggered rotation into timestamped files, an
//! in-memory index rebuilt by scanning the log directory at startup).

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use super::AuditRecord;

pub trait AuditSink: Send + Sync {
    fn write(&self, record: &AuditRecord) -> std::io::Result<()>;
}

/// Discards everything. Used for tests and for the degraded (no-secret)
/// audit mode, where records live in memory only.
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn write(&self, _record: &AuditRecord) -> std::io::Result<()> {
        Ok(())
    }
}

struct RotationState {
    current_file: Option<File>,
    current_path: PathBuf,
    current_size: u64,
}

/// Appends newline-delimited JSON records to `log_dir`, rotating to a new
/// timestamped file once `max_file_size` is exceeded and pruning old files
/// beyond `max_files`.
pub struct FileAuditSink {
    log_dir: PathBuf,
    max_file_size: u64,
    max_files: usize,
    sync_writes: bool,
    state: Mutex<RotationState>,
}

impl FileAuditSink {
    pub fn new(log_dir: impl AsRef<Path>, max_file_size: u64, max_files: usize, sync_writes: bool) -> std::io::Result<FileAuditSink> {
        let log_dir = log_dir.as_ref().to_path_buf();
        fs::create_dir_all(&log_dir)?;
        let current_path = log_dir.join(Self::file_name(current_unix_seconds()));
        let file = OpenOptions::new().create(true).append(true).open(&current_path)?;
        Ok(FileAuditSink {
            log_dir,
            max_file_size,
            max_files,
            sync_writes,
            state: Mutex::new(RotationState {
                current_file: Some(file),
                current_path,
                current_size: 0,
            }),
        })
    }

    fn file_name(timestamp_seconds: u64) -> String {
        let stamp = chrono::DateTime::from_timestamp(timestamp_seconds as i64, 0)
            .map(|dt| dt.format("%Y%m%dT%H%M%SZ").to_string())
            .unwrap_or_else(|| timestamp_seconds.to_string());
        format!("audit_{}.log", stamp)
    }

    fn rotate(&self, state: &mut RotationState) -> std::io::Result<()> {
        let new_path = self.log_dir.join(Self::file_name(current_unix_seconds()));
        let file = OpenOptions::new().create(true).append(true).open(&new_path)?;
        state.current_file = Some(file);
        state.current_path = new_path;
        state.current_size = 0;
        self.prune(state)
    }

    fn prune(&self, _state: &RotationState) -> std::io::Result<()> {
        let mut entries: Vec<PathBuf> = fs::read_dir(&self.log_dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().map(|e| e == "log").unwrap_or(false))
            .collect();
        if entries.len() <= self.max_files {
            return Ok(());
        }
        entries.sort();
        let excess = entries.len() - self.max_files;
        for path in entries.into_iter().take(excess) {
            let _ = fs::remove_file(path);
        }
        Ok(())
    }
}

fn current_unix_seconds() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl AuditSink for FileAuditSink {
    fn write(&self, record: &AuditRecord) -> std::io::Result<()> {
        let line = serde_json::to_string(record).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let mut state = self.state.lock();
        if state.current_size >= self.max_file_size {
            self.rotate(&mut state)?;
        }
        let file = state.current_file.as_mut().expect("sink always holds an open file");
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        if self.sync_writes {
            file.sync_data()?;
        }
        state.current_size += line.len() as u64 + 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::Severity;

    fn record(sequence: u64) -> AuditRecord {
        AuditRecord {
            sequence,
            timestamp_ms: 0,
            event_type: "deny".to_string(),
            severity: Severity::High,
            source: "1.2.3.4".to_string(),
            target: "/x".to_string(),
            details: "test".to_string(),
            mac: "abc".to_string(),
        }
    }

    #[test]
    fn writes_and_rotates() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileAuditSink::new(dir.path(), 16, 2, false).unwrap();
        for i in 0..5u64 {
            sink.write(&record(i)).unwrap();
        }
        let files: Vec<_> = fs::read_dir(dir.path()).unwrap().filter_map(|e| e.ok()).collect();
        assert!(files.len() <= 2, "pruning should cap file count at max_files");
    }

    #[test]
    fn noop_sink_discards() {
        let sink = NoopAuditSink;
        sink.write(&record(0)).unwrap();
    }
}
