//! CW-006: Worker observability — JSONL event log and artifact hashing.

pub mod eventlog;
