//! cz-logging: append-only NDJSON search events.
//!
//! One JSON object per line. [`EventLog`] serializes events into an
//! in-memory buffer and pushes whole lines to disk once a byte threshold is
//! passed, on an explicit flush, or when the log is dropped, so a line is
//! either fully on disk or not there at all as far as this process is
//! concerned. A hard crash can still truncate the final line mid-write,
//! which is why [`read_events`] parses leniently.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use serde::Serialize;
use thiserror::Error;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Buffered event bytes before an automatic flush.
pub const DEFAULT_FLUSH_BYTES: usize = 8 * 1024;

#[derive(Debug, Error)]
pub enum LogError {
    #[error("event log io: {0}")]
    Io(#[from] std::io::Error),
    #[error("event serialization: {0}")]
    Json(#[from] serde_json::Error),
}

/// Per-batch progress of a running search.
#[derive(Debug, Clone, Serialize)]
pub struct SearchStepEventV1 {
    pub event: &'static str,
    pub ts_ms: u64,
    pub run_id: String,
    pub batch: u64,
    pub tree_nodes: u64,
    pub root_n: u32,
    pub root_q: f32,
    pub elapsed_ms: u64,
    pub evaluator_calls: u64,
    pub evaluated_positions: u64,
    pub transposition_links: u64,
    pub transposition_draws: u64,
    pub deferred_pairings: u64,
    pub materializations: u64,
    pub max_batch_fill: u64,
}

/// Final move choice of a search.
#[derive(Debug, Clone, Serialize)]
pub struct BestMoveEventV1 {
    pub event: &'static str,
    pub ts_ms: u64,
    pub run_id: String,
    pub limit: String,
    pub best_move: String,
    pub n: u32,
    pub q: f32,
    pub best_n: u32,
    pub best_q: f32,
    pub top_moves_n_ratio: f32,
    pub mlh_bonus_applied: f32,
}

/// Append-only NDJSON event log.
pub struct EventLog {
    file: File,
    pending: Vec<u8>,
    flush_at: usize,
}

impl EventLog {
    /// Open `path` for appending with the default flush threshold.
    pub fn append(path: impl AsRef<Path>) -> Result<Self, LogError> {
        Self::with_flush_threshold(path, DEFAULT_FLUSH_BYTES)
    }

    /// Open `path` for appending; `flush_at_bytes = 0` lands every event on
    /// disk immediately.
    pub fn with_flush_threshold(
        path: impl AsRef<Path>,
        flush_at_bytes: usize,
    ) -> Result<Self, LogError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file,
            pending: Vec::with_capacity(flush_at_bytes + 256),
            flush_at: flush_at_bytes,
        })
    }

    /// Queue one event as one line. A failed serialization leaves the
    /// pending buffer exactly as it was, so no partial line can reach the
    /// file through this path.
    pub fn write<T: Serialize>(&mut self, event: &T) -> Result<(), LogError> {
        let mark = self.pending.len();
        if let Err(e) = serde_json::to_writer(&mut self.pending, event) {
            self.pending.truncate(mark);
            return Err(e.into());
        }
        self.pending.push(b'\n');
        if self.pending.len() >= self.flush_at {
            self.flush()?;
        }
        Ok(())
    }

    /// Push all pending lines to the file.
    pub fn flush(&mut self) -> Result<(), LogError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        self.file.write_all(&self.pending)?;
        self.pending.clear();
        Ok(())
    }
}

impl Drop for EventLog {
    fn drop(&mut self) {
        // Best effort on teardown; errors have nowhere to go.
        let _ = self.flush();
    }
}

/// Read an NDJSON file, skipping anything that does not parse as a JSON
/// value. The skip covers the truncated tail a crashed writer leaves
/// behind, as well as blank lines.
pub fn read_events(path: impl AsRef<Path>) -> Result<Vec<serde_json::Value>, LogError> {
    let text = std::fs::read_to_string(path)?;
    Ok(text
        .lines()
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect())
}

/// Wall-clock milliseconds for event timestamps.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Serialize)]
    struct Probe {
        event: &'static str,
        x: u32,
    }

    #[test]
    fn events_come_back_in_write_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.ndjson");

        let mut log = EventLog::append(&path).unwrap();
        for x in 0..3 {
            log.write(&Probe { event: "probe", x }).unwrap();
        }
        log.flush().unwrap();

        let vals = read_events(&path).unwrap();
        assert_eq!(vals.len(), 3);
        for (i, v) in vals.iter().enumerate() {
            assert_eq!(v["x"], i as u32);
        }
    }

    #[test]
    fn zero_threshold_lands_events_without_explicit_flush() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.ndjson");

        let mut log = EventLog::with_flush_threshold(&path, 0).unwrap();
        log.write(&Probe { event: "probe", x: 1 }).unwrap();
        log.write(&Probe { event: "probe", x: 2 }).unwrap();

        // No flush, no drop: both lines must already be on disk.
        assert_eq!(read_events(&path).unwrap().len(), 2);
    }

    #[test]
    fn drop_flushes_pending_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.ndjson");

        {
            let mut log = EventLog::with_flush_threshold(&path, 1 << 20).unwrap();
            log.write(&Probe { event: "probe", x: 7 }).unwrap();
            assert!(read_events(&path).unwrap().is_empty(), "still buffered");
        }

        let vals = read_events(&path).unwrap();
        assert_eq!(vals.len(), 1);
        assert_eq!(vals[0]["x"], 7);
    }

    #[test]
    fn reader_skips_a_truncated_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.ndjson");
        std::fs::write(&path, "{\"event\":\"ok\",\"x\":1}\n{\"event\":\"tru").unwrap();

        let vals = read_events(&path).unwrap();
        assert_eq!(vals.len(), 1);
        assert_eq!(vals[0]["event"], "ok");
    }

    #[test]
    fn failed_serialization_leaves_no_partial_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.ndjson");

        // serde_json rejects non-string map keys at serialization time.
        let mut bad: HashMap<Vec<u8>, u32> = HashMap::new();
        bad.insert(vec![1], 1);

        let mut log = EventLog::with_flush_threshold(&path, 0).unwrap();
        assert!(log.write(&bad).is_err());
        log.write(&Probe { event: "probe", x: 9 }).unwrap();
        log.flush().unwrap();

        let vals = read_events(&path).unwrap();
        assert_eq!(vals.len(), 1);
        assert_eq!(vals[0]["x"], 9);
    }
}
