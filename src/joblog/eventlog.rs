//! CW-006: Append-only JSONL worker event log.
//!
//! One event per line, ISO-8601 timestamps. The log is observability output
//! for the run, not persistent state; the parent may tail it or discard it.

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

/// Worker lifecycle and per-job events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkerEvent {
    WorkerStarted {
        version: String,
        message_stream: bool,
    },
    ReadySent {},
    JobReceived {
        job: i32,
        sources: usize,
        references: usize,
    },
    JobCompleted {
        job: i32,
        succeeded: u32,
        failed: u32,
        artifact_hash: String,
        duration_seconds: f64,
    },
    JobFailed {
        job: i32,
        kind: String,
        error: String,
    },
    UnitExcluded {
        job: i32,
        file: String,
        code: String,
        line: u32,
    },
    Shutdown {
        source: String,
    },
}

/// Timestamped event wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampedEvent {
    pub ts: String,
    #[serde(flatten)]
    pub event: WorkerEvent,
}

/// Generate an ISO 8601 timestamp.
pub fn now_iso8601() -> String {
    // Manual implementation — no chrono dependency
    use std::time::{SystemTime, UNIX_EPOCH};
    let dur = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let secs = dur.as_secs();
    let days = secs / 86400;
    let time_secs = secs % 86400;
    let hours = time_secs / 3600;
    let minutes = (time_secs % 3600) / 60;
    let seconds = time_secs % 60;

    // Days since epoch to Y-M-D (simplified Gregorian)
    let mut y = 1970i64;
    let mut remaining = days as i64;
    loop {
        let year_days = if is_leap(y) { 366 } else { 365 };
        if remaining < year_days {
            break;
        }
        remaining -= year_days;
        y += 1;
    }
    let leap = is_leap(y);
    let month_days = [
        31,
        if leap { 29 } else { 28 },
        31,
        30,
        31,
        30,
        31,
        31,
        30,
        31,
        30,
        31,
    ];
    let mut m = 0;
    for (i, &md) in month_days.iter().enumerate() {
        if remaining < md as i64 {
            m = i + 1;
            break;
        }
        remaining -= md as i64;
    }
    let d = remaining + 1;

    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
        y, m, d, hours, minutes, seconds
    )
}

fn is_leap(y: i64) -> bool {
    (y % 4 == 0 && y % 100 != 0) || y % 400 == 0
}

/// Hash an emitted artifact. Returns `"blake3:{hex}"`; empty binaries hash
/// to the fixed empty-input digest, which is fine for log correlation.
pub fn hash_artifact(bytes: &[u8]) -> String {
    format!("blake3:{}", blake3::hash(bytes).to_hex())
}

/// Append an event to the log file, creating parent directories as needed.
pub fn append_event(log_path: &Path, event: WorkerEvent) -> Result<(), String> {
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| format!("cannot create log dir: {}", e))?;
    }

    let te = TimestampedEvent {
        ts: now_iso8601(),
        event,
    };
    let json = serde_json::to_string(&te).map_err(|e| format!("JSON serialize error: {}", e))?;

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .map_err(|e| format!("cannot open event log {}: {}", log_path.display(), e))?;

    writeln!(file, "{}", json).map_err(|e| format!("write error: {}", e))?;

    Ok(())
}
