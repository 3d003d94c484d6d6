//! Relay event log.
//!
//! Every entry is mirrored to `tracing` and kept in a bounded ring buffer so
//! the admin surface can show recent activity. When a file path is given the
//! entries are also appended to it as JSON lines and replayed on startup.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

const MAX_LOG_ENTRIES: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub component: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

impl LogEntry {
    pub fn new(level: LogLevel, component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            component: component.into(),
            message: message.into(),
            context: None,
        }
    }

    #[must_use]
    pub fn with_context(mut self, ctx: serde_json::Value) -> Self {
        self.context = Some(ctx);
        self
    }

    fn emit(&self) {
        let component = self.component.as_str();
        let message = self.message.as_str();
        let context = self.context.as_ref().map(ToString::to_string).unwrap_or_default();
        match self.level {
            LogLevel::Debug => tracing::debug!(component, context = %context, "{message}"),
            LogLevel::Info => tracing::info!(component, context = %context, "{message}"),
            LogLevel::Warn => tracing::warn!(component, context = %context, "{message}"),
            LogLevel::Error => tracing::error!(component, context = %context, "{message}"),
        }
    }
}

pub struct EventLog {
    entries: VecDeque<LogEntry>,
    writer: Option<BufWriter<File>>,
}

impl EventLog {
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            entries: VecDeque::new(),
            writer: None,
        }
    }

    pub fn with_file(file_path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file_path = file_path.as_ref();

        if let Some(parent) = file_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let mut log = Self::in_memory();

        if file_path.exists() {
            let reader = BufReader::new(File::open(file_path)?);
            for line in reader.lines().map_while(std::result::Result::ok) {
                if let Ok(entry) = serde_json::from_str::<LogEntry>(&line) {
                    log.remember(entry);
                }
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(file_path)?;
        log.writer = Some(BufWriter::new(file));

        Ok(log)
    }

    pub fn log(&mut self, entry: LogEntry) {
        entry.emit();
        if let Some(ref mut writer) = self.writer {
            if let Ok(json) = serde_json::to_string(&entry) {
                let _ = writeln!(writer, "{json}");
                let _ = writer.flush();
            }
        }
        self.remember(entry);
    }

    fn remember(&mut self, entry: LogEntry) {
        if self.entries.len() >= MAX_LOG_ENTRIES {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Most recent entries first.
    pub fn recent(&self, limit: usize) -> Vec<LogEntry> {
        self.entries.iter().rev().take(limit).cloned().collect()
    }
}

#[derive(Clone)]
pub struct SharedLogger(Arc<Mutex<EventLog>>);

impl SharedLogger {
    pub fn new(file_path: impl AsRef<Path>) -> std::io::Result<Self> {
        Ok(Self(Arc::new(Mutex::new(EventLog::with_file(file_path)?))))
    }

    #[must_use]
    pub fn in_memory() -> Self {
        Self(Arc::new(Mutex::new(EventLog::in_memory())))
    }

    pub fn log(&self, entry: LogEntry) {
        if let Ok(mut log) = self.0.lock() {
            log.log(entry);
        }
    }

    pub fn info(&self, component: impl Into<String>, message: impl Into<String>) {
        self.log(LogEntry::new(LogLevel::Info, component, message));
    }

    pub fn warn(&self, component: impl Into<String>, message: impl Into<String>) {
        self.log(LogEntry::new(LogLevel::Warn, component, message));
    }

    pub fn error(&self, component: impl Into<String>, message: impl Into<String>) {
        self.log(LogEntry::new(LogLevel::Error, component, message));
    }

    pub fn debug(&self, component: impl Into<String>, message: impl Into<String>) {
        self.log(LogEntry::new(LogLevel::Debug, component, message));
    }

    pub fn log_with_context(
        &self,
        level: LogLevel,
        component: impl Into<String>,
        message: impl Into<String>,
        context: serde_json::Value,
    ) {
        self.log(LogEntry::new(level, component, message).with_context(context));
    }

    pub fn recent(&self, limit: usize) -> Vec<LogEntry> {
        self.0.lock().map(|l| l.recent(limit)).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recent_is_newest_first() {
        let logger = SharedLogger::in_memory();
        logger.info("test", "first");
        logger.warn("test", "second");

        let recent = logger.recent(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].message, "second");
        assert_eq!(recent[0].level, LogLevel::Warn);
        assert_eq!(recent[1].message, "first");
    }

    #[test]
    fn test_file_entries_are_replayed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.log");

        {
            let logger = SharedLogger::new(&path).unwrap();
            logger.log_with_context(
                LogLevel::Error,
                "forward",
                "boom",
                serde_json::json!({ "status": 500 }),
            );
        }

        let reopened = SharedLogger::new(&path).unwrap();
        let recent = reopened.recent(1);
        assert_eq!(recent[0].message, "boom");
        assert_eq!(recent[0].context, Some(serde_json::json!({ "status": 500 })));
    }
}
