//! Telemetry ring buffer and audit log.
//!
//! Snapshots go into a bounded ring (oldest evicted on overflow) and,
//! optionally, onto disk as JSON-lines — one snapshot per line, in tick
//! order. The audit log is an append-only bounded record of every action
//! applied to the simulator and its outcome.

use crate::state::FacilityState;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use tracing::warn;

/// Snapshot ring capacity.
pub const TELEMETRY_CAPACITY: usize = 1000;
/// Audit log capacity.
pub const AUDIT_CAPACITY: usize = 5000;

/// Bounded ring of facility snapshots with an optional JSONL sink.
pub struct TelemetryBuffer {
    buffer: VecDeque<FacilityState>,
    capacity: usize,
    sink: Option<JsonlSink>,
}

struct JsonlSink {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl TelemetryBuffer {
    pub fn new() -> Self {
        Self::with_capacity(TELEMETRY_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: VecDeque::with_capacity(capacity),
            capacity,
            sink: None,
        }
    }

    /// Append each future snapshot to a JSON-lines file as well.
    pub fn log_to_file(&mut self, path: PathBuf) -> std::io::Result<()> {
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        self.sink = Some(JsonlSink {
            path,
            writer: BufWriter::new(file),
        });
        Ok(())
    }

    /// Push a snapshot, evicting the oldest entry when full.
    pub fn push(&mut self, state: FacilityState) {
        if let Some(sink) = &mut self.sink {
            let write = serde_json::to_string(&state)
                .map_err(std::io::Error::other)
                .and_then(|line| writeln!(sink.writer, "{}", line))
                .and_then(|_| sink.writer.flush());
            if let Err(error) = write {
                warn!(path = %sink.path.display(), %error, "telemetry log write failed; disabling sink");
                self.sink = None;
            }
        }

        if self.buffer.len() == self.capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(state);
    }

    /// Most recent snapshot.
    pub fn latest(&self) -> Option<&FacilityState> {
        self.buffer.back()
    }

    /// The last `n` snapshots, oldest first.
    pub fn last_n(&self, n: usize) -> Vec<&FacilityState> {
        let skip = self.buffer.len().saturating_sub(n);
        self.buffer.iter().skip(skip).collect()
    }

    /// All buffered snapshots, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &FacilityState> {
        self.buffer.iter()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

impl Default for TelemetryBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Record of one action applied to the simulator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: f64,
    pub action: String,
    pub params: serde_json::Value,
    /// "ok" or a short error tag.
    pub result: String,
    /// Who initiated the action: "api", "agent", "scenario", "operator".
    pub source: String,
}

/// Append-only bounded log of actions and outcomes.
pub struct AuditLog {
    entries: VecDeque<AuditEntry>,
    capacity: usize,
}

impl AuditLog {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::with_capacity(AUDIT_CAPACITY),
            capacity: AUDIT_CAPACITY,
        }
    }

    pub fn record(
        &mut self,
        timestamp: f64,
        action: &str,
        params: serde_json::Value,
        result: &str,
        source: &str,
    ) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(AuditEntry {
            timestamp,
            action: action.to_string(),
            params,
            result: result.to_string(),
            source: source.to_string(),
        });
    }

    /// The last `n` entries, oldest first.
    pub fn last_n(&self, n: usize) -> Vec<&AuditEntry> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).collect()
    }

    pub fn entries(&self) -> impl Iterator<Item = &AuditEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_audit_bounded_and_ordered() {
        let mut log = AuditLog::new();
        for i in 0..(AUDIT_CAPACITY + 10) {
            log.record(i as f64, "adjust_cooling", json!({"rack_id": 0}), "ok", "api");
        }
        assert_eq!(log.len(), AUDIT_CAPACITY);
        let last = log.last_n(2);
        assert!(last[0].timestamp < last[1].timestamp);
    }

    #[test]
    fn test_last_n_larger_than_len() {
        let mut log = AuditLog::new();
        log.record(1.0, "preempt_job", json!({}), "job_not_found", "agent");
        assert_eq!(log.last_n(50).len(), 1);
        assert_eq!(log.last_n(50)[0].result, "job_not_found");
    }
}
