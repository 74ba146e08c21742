// src/telemetry.rs
//
// Telemetry sinks.
// - EventSink: trait the reactor reports each tick through
// - NoopSink:  discards all events
// - FileSink:  one JSON line per tick, for offline analysis

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use serde::Serialize;

use crate::types::{StrategyId, TimestampMs};

/// Per-tick record: what the strategy wanted and what was scheduled.
#[derive(Debug, Clone, Serialize)]
pub struct TickRecord {
    pub timestamp_ms: TimestampMs,
    pub strategy: StrategyId,
    pub desired_bid_levels: usize,
    pub desired_ask_levels: usize,
    pub cancels: usize,
    pub creates: usize,
    pub skipped: bool,
}

pub trait EventSink: Send {
    fn log_tick(&mut self, record: &TickRecord);
}

/// Sink that discards all events.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn log_tick(&mut self, _record: &TickRecord) {
        // intentionally no-op
    }
}

/// JSONL file sink. Write errors are swallowed: losing a telemetry line
/// must never take the engine down.
pub struct FileSink {
    writer: BufWriter<File>,
}

impl FileSink {
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }
}

impl EventSink for FileSink {
    fn log_tick(&mut self, record: &TickRecord) {
        if let Ok(line) = serde_json::to_string(record) {
            let _ = self.writer.write_all(line.as_bytes());
            let _ = self.writer.write_all(b"\n");
            let _ = self.writer.flush();
        }
    }
}
