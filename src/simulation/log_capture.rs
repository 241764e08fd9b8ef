//! Log capture for routing simulator logs to per-node log streams.
//!
//! `TeeLogger` forwards every record to the wrapped `env_logger` and, for
//! records emitted by this crate, extracts the node ID from the `[N]` prefix
//! and stores the line in a bounded global buffer. Consumers drain the buffer
//! with `drain_captured_logs` and distribute entries to per-node histories.
//!
//! Node-scoped log lines look like `[12] CSMA channel busy, backoff 39000 ns`.

use log::{Level, Log, Metadata, Record};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Instant;

use super::types::NodeId;

/// Maximum number of log entries to buffer before they're consumed.
const LOG_BUFFER_CAPACITY: usize = 10000;

/// Module path prefix of records that are captured.
const CAPTURED_MODULE_PREFIX: &str = "vanet_stack_simulator";

/// A captured log entry with extracted node ID.
#[derive(Debug, Clone)]
pub struct CapturedLogEntry {
    pub node_id: NodeId,
    pub timestamp: Instant,
    pub content: String,
    pub level: Level,
}

/// Global buffer for captured log entries.
static CAPTURED_LOGS: Mutex<Option<VecDeque<CapturedLogEntry>>> = Mutex::new(None);

/// Initialize the log capture buffer. Entries logged before this are not kept.
pub fn init_log_capture() {
    if let Ok(mut guard) = CAPTURED_LOGS.lock() {
        *guard = Some(VecDeque::with_capacity(LOG_BUFFER_CAPACITY));
    }
}

/// Drain all captured log entries from the buffer.
pub fn drain_captured_logs() -> Vec<CapturedLogEntry> {
    match CAPTURED_LOGS.lock() {
        Ok(mut guard) => match guard.as_mut() {
            Some(buffer) => buffer.drain(..).collect(),
            None => Vec::new(),
        },
        Err(_) => Vec::new(),
    }
}

/// Drain only the entries of one node, keeping the rest buffered.
pub fn drain_node_logs(node_id: NodeId) -> Vec<CapturedLogEntry> {
    let Ok(mut guard) = CAPTURED_LOGS.lock() else {
        return Vec::new();
    };
    let Some(buffer) = guard.as_mut() else {
        return Vec::new();
    };
    let (mine, rest): (VecDeque<_>, VecDeque<_>) = buffer.drain(..).partition(|e| e.node_id == node_id);
    *buffer = rest;
    mine.into()
}

fn push_log_entry(entry: CapturedLogEntry) {
    let Ok(mut guard) = CAPTURED_LOGS.lock() else {
        return;
    };
    if let Some(buffer) = guard.as_mut() {
        if buffer.len() >= LOG_BUFFER_CAPACITY {
            buffer.pop_front();
        }
        buffer.push_back(entry);
    }
}

/// Extract the node ID from a log message with format `[N] ...`.
/// Returns (node_id, remaining_message) if successful.
fn extract_node_id(message: &str) -> Option<(NodeId, &str)> {
    let trimmed = message.trim_start();
    if !trimmed.starts_with('[') {
        return None;
    }

    let end_bracket = trimmed.find(']')?;
    let node_id: NodeId = trimmed[1..end_bracket].parse().ok()?;
    let rest = trimmed[end_bracket + 1..].trim_start();
    Some((node_id, rest))
}

/// A tee logger that forwards to `env_logger` and captures node-scoped lines of this crate.
pub struct TeeLogger {
    inner: env_logger::Logger,
}

impl TeeLogger {
    pub fn new(inner: env_logger::Logger) -> Self {
        Self { inner }
    }

    /// Get the maximum log level filter from the inner logger.
    pub fn filter(&self) -> log::LevelFilter {
        self.inner.filter()
    }

    /// Install as the global logger.
    pub fn install(self) -> Result<(), log::SetLoggerError> {
        let max_level = self.filter();
        init_log_capture();
        log::set_boxed_logger(Box::new(self))?;
        log::set_max_level(max_level);
        Ok(())
    }
}

impl Log for TeeLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.inner.enabled(metadata)
    }

    fn log(&self, record: &Record) {
        self.inner.log(record);

        if !self.inner.matches(record) {
            return;
        }
        if record.module_path().is_some_and(|m| m.starts_with(CAPTURED_MODULE_PREFIX)) {
            let message = record.args().to_string();
            if let Some((node_id, content)) = extract_node_id(&message) {
                push_log_entry(CapturedLogEntry {
                    node_id,
                    timestamp: Instant::now(),
                    content: content.to_string(),
                    level: record.level(),
                });
            }
        }
    }

    fn flush(&self) {
        self.inner.flush();
    }
}
