//! Structured in-memory log.
//!
//! The [`Logger`] keeps the most recent entries in a bounded ring buffer so a
//! diagnostics panel can show what the sync layer has been doing. Every entry
//! is also forwarded to `tracing`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

/// Default number of retained entries.
pub const DEFAULT_CAPACITY: usize = 1000;

/// Severity of a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// Subsystem a log entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogCategory {
    System,
    Data,
    Ui,
    Auth,
    Sync,
}

impl LogCategory {
    fn as_str(self) -> &'static str {
        match self {
            LogCategory::System => "SYSTEM",
            LogCategory::Data => "DATA",
            LogCategory::Ui => "UI",
            LogCategory::Auth => "AUTH",
            LogCategory::Sync => "SYNC",
        }
    }
}

/// One log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub category: LogCategory,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

/// Append-only ring buffer of log entries.
#[derive(Debug)]
pub struct Logger {
    entries: Mutex<VecDeque<LogEntry>>,
    capacity: usize,
}

impl Default for Logger {
    fn default() -> Self {
        Self::new()
    }
}

impl Logger {
    /// Create a logger retaining [`DEFAULT_CAPACITY`] entries.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a logger retaining at most `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY))),
            capacity,
        }
    }

    /// Record an entry, evicting the oldest one when full.
    pub fn log(
        &self,
        level: LogLevel,
        category: LogCategory,
        message: impl Into<String>,
        data: Option<Value>,
        context: Option<&str>,
    ) {
        let entry = LogEntry {
            timestamp: Utc::now(),
            level,
            category,
            message: message.into(),
            data,
            context: context.map(str::to_string),
        };

        emit(&entry);

        let mut entries = self.lock();
        entries.push_back(entry);
        while entries.len() > self.capacity {
            entries.pop_front();
        }
    }

    pub fn info(&self, category: LogCategory, message: impl Into<String>, context: Option<&str>) {
        self.log(LogLevel::Info, category, message, None, context);
    }

    pub fn warn(&self, category: LogCategory, message: impl Into<String>, context: Option<&str>) {
        self.log(LogLevel::Warn, category, message, None, context);
    }

    pub fn error(&self, category: LogCategory, message: impl Into<String>, context: Option<&str>) {
        self.log(LogLevel::Error, category, message, None, context);
    }

    /// Copy of the retained entries, oldest first.
    pub fn history(&self) -> Vec<LogEntry> {
        self.lock().iter().cloned().collect()
    }

    /// Number of retained entries.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no entries are retained.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all retained entries.
    pub fn clear(&self) {
        self.lock().clear();
    }

    // A panic elsewhere while holding the lock must not turn logging into a
    // second panic, so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, VecDeque<LogEntry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn emit(entry: &LogEntry) {
    let category = entry.category.as_str();
    let context = entry.context.as_deref().unwrap_or("-");
    match entry.level {
        LogLevel::Info => {
            tracing::info!(category, context, data = ?entry.data, "{}", entry.message)
        }
        LogLevel::Warn => {
            tracing::warn!(category, context, data = ?entry.data, "{}", entry.message)
        }
        LogLevel::Error => {
            tracing::error!(category, context, data = ?entry.data, "{}", entry.message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn records_entries_in_order() {
        let logger = Logger::new();
        logger.info(LogCategory::System, "started", None);
        logger.warn(LogCategory::Ui, "verification in progress", Some("smoke"));
        logger.log(
            LogLevel::Error,
            LogCategory::Data,
            "insert failed",
            Some(json!({"code": "23505"})),
            Some("tasks"),
        );

        let history = logger.history();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].message, "started");
        assert_eq!(history[1].context.as_deref(), Some("smoke"));
        assert_eq!(history[2].level, LogLevel::Error);
        assert_eq!(history[2].data, Some(json!({"code": "23505"})));
    }

    #[test]
    fn evicts_oldest_beyond_capacity() {
        let logger = Logger::new();
        for i in 0..(DEFAULT_CAPACITY + 5) {
            logger.info(LogCategory::Sync, format!("entry {i}"), None);
        }

        let history = logger.history();
        assert_eq!(history.len(), DEFAULT_CAPACITY);
        assert_eq!(history[0].message, "entry 5");
        assert_eq!(
            history.last().unwrap().message,
            format!("entry {}", DEFAULT_CAPACITY + 4)
        );
    }

    #[test]
    fn clear_empties_buffer() {
        let logger = Logger::with_capacity(2);
        logger.info(LogCategory::Auth, "a", None);
        assert!(!logger.is_empty());
        logger.clear();
        assert!(logger.is_empty());
    }

    #[test]
    fn survives_poisoned_lock() {
        let logger = Arc::new(Logger::with_capacity(4));
        let poisoner = Arc::clone(&logger);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.entries.lock().unwrap();
            panic!("poison the log");
        })
        .join();

        logger.error(LogCategory::System, "still logging", None);
        assert_eq!(logger.len(), 1);
    }

    #[test]
    fn entry_serialization() {
        let logger = Logger::new();
        logger.info(LogCategory::Sync, "registered", Some("tasks"));
        let value = serde_json::to_value(&logger.history()[0]).unwrap();
        assert_eq!(value["level"], "INFO");
        assert_eq!(value["category"], "SYNC");
        assert_eq!(value["context"], "tasks");
        assert!(value.get("data").is_none());
    }
}
