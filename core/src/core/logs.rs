//! Observability logs (spec §4.8): ring-buffer-backed error and input
//! history logs, each mirrored to an append-only JSONL file on disk.
//!
//! The write path borrows the teacher's file-IO idiom from
//! `plugin_config_writer.rs` (create-parent-dir-then-write, `tokio::fs`,
//! `log::debug!` on success) but trades read-merge-write JSON for
//! append-only JSONL, and adds the ring buffer from
//! [`crate::core::ring_buffer`] as the in-memory mirror queries read from.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::error::AppError;
use super::ring_buffer::RingBuffer;

/// Minimum spacing between `app:error-logged` / `app:input-history-updated`
/// pings, so a burst of writes collapses into one client re-fetch (spec
/// §4.8 "ping-then-fetch").
pub const PING_THROTTLE: Duration = Duration::from_millis(50);

const ERROR_LOG_KEEP_FILES: usize = 100;
const INPUT_HISTORY_KEEP_FILES: usize = 50;

/// Lets the ring log recover the true next sequence number from whatever
/// is already on disk, independent of the ring buffer's bounded capacity.
pub trait SeqEntry {
    fn seq(&self) -> u64;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorLogEntry {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub kind: String,
    pub message: String,
}

impl SeqEntry for ErrorLogEntry {
    fn seq(&self) -> u64 {
        self.seq
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputHistoryEntry {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub pane_id: u32,
    pub input: String,
}

impl SeqEntry for InputHistoryEntry {
    fn seq(&self) -> u64 {
        self.seq
    }
}

/// Whether a write should be followed by an outward ping (spec §4.8: the
/// event carries no payload, the client re-fetches via `get_*`).
pub struct WriteOutcome {
    pub should_ping: bool,
}

struct Inner<T> {
    ring: RingBuffer<T>,
    file: tokio::fs::File,
    next_seq: u64,
    last_ping: Option<Instant>,
}

/// Generic append-only JSONL-backed ring log. Both `ErrorLog` and
/// `InputHistoryLog` are thin aliases over this, matching spec §4.8's
/// identical shape for the two logs.
pub struct RingLog<T> {
    inner: Mutex<Inner<T>>,
    capacity: usize,
}

impl<T> RingLog<T>
where
    T: Clone + Serialize + for<'de> Deserialize<'de> + SeqEntry + Send + 'static,
{
    pub async fn open(path: &Path, capacity: usize, keep_files: usize) -> Result<Self, AppError> {
        rotate_old_files(path, keep_files).await?;

        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| AppError::io_failed(e.to_string()))?;
        }

        let (ring, max_seq) = load_existing_entries(path, capacity).await?;

        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| AppError::io_failed(e.to_string()))?;

        let next_seq = max_seq.map(|s| s + 1).unwrap_or(0);
        log::debug!("opened ring log at {path:?}, next seq {next_seq}");

        Ok(RingLog {
            inner: Mutex::new(Inner { ring, file, next_seq, last_ping: None }),
            capacity,
        })
    }

    /// Assigns the next sequence number, appends the JSON line to disk,
    /// pushes into the ring buffer, and reports whether enough time has
    /// passed since the last ping to emit one now (spec §4.8 write path:
    /// "assign seq -> format JSON -> append file -> push ring buffer ->
    /// decide ping via throttle -> release lock -> emit ping outside lock").
    pub async fn append(&self, make_entry: impl FnOnce(u64) -> T) -> Result<WriteOutcome, AppError>
    where
        T: Clone,
    {
        let mut inner = self.inner.lock().await;
        let seq = inner.next_seq;
        inner.next_seq += 1;
        let entry = make_entry(seq);

        let mut line = serde_json::to_string(&entry).map_err(|e| AppError::internal(e.to_string()))?;
        line.push('\n');
        inner
            .file
            .write_all(line.as_bytes())
            .await
            .map_err(|e| AppError::io_failed(e.to_string()))?;
        inner.file.flush().await.map_err(|e| AppError::io_failed(e.to_string()))?;

        inner.ring.push(entry);

        let should_ping = match inner.last_ping {
            Some(last) if last.elapsed() < PING_THROTTLE => false,
            _ => {
                inner.last_ping = Some(Instant::now());
                true
            }
        };

        Ok(WriteOutcome { should_ping })
    }

    pub async fn snapshot(&self) -> Vec<T> {
        self.inner.lock().await.ring.snapshot()
    }

    pub async fn tail(&self, n: usize) -> Vec<T> {
        self.inner.lock().await.ring.tail(n)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Replays the on-disk JSONL into a fresh ring buffer and reports the
/// highest `seq` seen, independent of the ring's bounded capacity (a log
/// truncated to the last `capacity` entries in memory must not reuse `seq`
/// values still present further back in the file).
async fn load_existing_entries<T>(path: &Path, capacity: usize) -> Result<(RingBuffer<T>, Option<u64>), AppError>
where
    T: Clone + for<'de> Deserialize<'de> + SeqEntry,
{
    let mut ring = RingBuffer::new(capacity);
    if !path.exists() {
        return Ok((ring, None));
    }
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| AppError::io_failed(e.to_string()))?;
    let mut max_seq: Option<u64> = None;
    for line in contents.lines() {
        if line.trim().is_empty() {
            continue;
        }
        if let Ok(entry) = serde_json::from_str::<T>(line) {
            max_seq = Some(max_seq.map_or(entry.seq(), |m: u64| m.max(entry.seq())));
            ring.push(entry);
        }
    }
    Ok((ring, max_seq))
}

/// Deletes old per-run log files past `keep_files` (spec §4.8 "file
/// rotation ... delete older at startup"). Each run's log lives in its own
/// dedicated subdirectory (`session-logs/`, `input-history/`) named with
/// its start timestamp and pid, so rotation here simply keeps the
/// `keep_files` most recent `.jsonl` siblings in that directory and
/// removes the rest -- `path` itself (this run's file, not yet created)
/// sorts last and is never a candidate.
async fn rotate_old_files(path: &Path, keep_files: usize) -> Result<(), AppError> {
    let Some(dir) = path.parent() else { return Ok(()) };
    if !dir.exists() {
        return Ok(());
    }

    let mut existing: Vec<PathBuf> = Vec::new();
    let mut read_dir = tokio::fs::read_dir(dir).await.map_err(|e| AppError::io_failed(e.to_string()))?;
    while let Some(entry) = read_dir.next_entry().await.map_err(|e| AppError::io_failed(e.to_string()))? {
        let name = entry.file_name();
        if name.to_string_lossy().ends_with(".jsonl") {
            existing.push(entry.path());
        }
    }
    existing.sort();
    if existing.len() > keep_files {
        for old in &existing[..existing.len() - keep_files] {
            let _ = tokio::fs::remove_file(old).await;
        }
    }
    Ok(())
}

pub type ErrorLog = RingLog<ErrorLogEntry>;
pub type InputHistoryLog = RingLog<InputHistoryEntry>;

impl ErrorLog {
    pub async fn log_error(&self, kind: impl Into<String>, message: impl Into<String>) -> Result<WriteOutcome, AppError> {
        let kind = kind.into();
        let message = message.into();
        self.append(move |seq| ErrorLogEntry {
            seq,
            timestamp: Utc::now(),
            kind,
            message,
        })
        .await
    }

    /// Default keep-file count for session error logs (spec §4.8: "100").
    pub const KEEP_FILES: usize = ERROR_LOG_KEEP_FILES;
}

impl InputHistoryLog {
    pub async fn log_input(&self, pane_id: u32, input: impl Into<String>) -> Result<WriteOutcome, AppError> {
        let input = input.into();
        self.append(move |seq| InputHistoryEntry {
            seq,
            timestamp: Utc::now(),
            pane_id,
            input,
        })
        .await
    }

    /// Default keep-file count for input history (spec §4.8: "50").
    pub const KEEP_FILES: usize = INPUT_HISTORY_KEEP_FILES;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn appended_entries_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("errors.jsonl");
        {
            let log = ErrorLog::open(&path, 16, ErrorLog::KEEP_FILES).await.unwrap();
            log.log_error("io", "disk full").await.unwrap();
            log.log_error("internal", "panic recovered").await.unwrap();
        }
        let reopened = ErrorLog::open(&path, 16, ErrorLog::KEEP_FILES).await.unwrap();
        let entries = reopened.snapshot().await;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].seq, 0);
        assert_eq!(entries[1].message, "panic recovered");
    }

    #[tokio::test]
    async fn seq_numbers_are_monotonic_across_writes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("input-history.jsonl");
        let log = InputHistoryLog::open(&path, 8, InputHistoryLog::KEEP_FILES).await.unwrap();
        log.log_input(1, "git status").await.unwrap();
        log.log_input(1, "git commit").await.unwrap();
        let entries = log.snapshot().await;
        assert_eq!(entries[0].seq, 0);
        assert_eq!(entries[1].seq, 1);
    }

    #[tokio::test]
    async fn ping_is_throttled_within_window() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("errors.jsonl");
        let log = ErrorLog::open(&path, 8, ErrorLog::KEEP_FILES).await.unwrap();
        let first = log.log_error("io", "one").await.unwrap();
        let second = log.log_error("io", "two").await.unwrap();
        assert!(first.should_ping);
        assert!(!second.should_ping);
    }

    #[tokio::test]
    async fn ring_capacity_evicts_oldest_while_file_keeps_full_history() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("errors.jsonl");
        let log = ErrorLog::open(&path, 2, ErrorLog::KEEP_FILES).await.unwrap();
        for i in 0..5 {
            log.log_error("io", format!("err-{i}")).await.unwrap();
        }
        let ring = log.snapshot().await;
        assert_eq!(ring.len(), 2);
        assert_eq!(ring[1].message, "err-4");

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(contents.lines().count(), 5);
    }
}
