use chrono::{DateTime, Local};
use std::collections::VecDeque;
use std::fmt;

pub const LOG_CAPACITY: usize = 100;
pub const EMPTY_PLACEHOLDER: &str = "No log messages";
pub const DISABLED_PLACEHOLDER: &str = "Logging disabled";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn label(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub level: LogLevel,
    pub message: String,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {}",
            self.timestamp.format("%H:%M:%S"),
            self.level,
            self.message
        )
    }
}

/// Fixed-capacity operational log shown in the log panel.
#[derive(Debug, Clone)]
pub struct LogRingBuffer {
    entries: VecDeque<LogEntry>,
    capacity: usize,
}

impl Default for LogRingBuffer {
    fn default() -> Self {
        LogRingBuffer::with_capacity(LOG_CAPACITY)
    }
}

impl LogRingBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        LogRingBuffer {
            entries: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn append(&mut self, level: LogLevel, message: impl Into<String>) {
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(LogEntry {
            timestamp: Local::now(),
            level,
            message: message.into(),
        });
    }

    pub fn snapshot(&self, enabled: bool) -> String {
        if self.entries.is_empty() {
            return EMPTY_PLACEHOLDER.to_string();
        }
        if !enabled {
            return DISABLED_PLACEHOLDER.to_string();
        }
        self.entries
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn entries(&self) -> impl DoubleEndedIterator<Item = &LogEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_beyond_capacity() {
        let mut log = LogRingBuffer::default();
        for i in 0..105 {
            log.append(LogLevel::Info, format!("msg {i}"));
        }
        assert_eq!(log.len(), LOG_CAPACITY);
        let messages = log.entries().map(|e| e.message.clone()).collect::<Vec<_>>();
        assert_eq!(messages.first().map(String::as_str), Some("msg 5"));
        assert_eq!(messages.last().map(String::as_str), Some("msg 104"));
        let expected = (5..105).map(|i| format!("msg {i}")).collect::<Vec<_>>();
        assert_eq!(messages, expected);
    }

    #[test]
    fn snapshot_placeholders_are_distinct() {
        let mut log = LogRingBuffer::default();
        assert_eq!(log.snapshot(true), EMPTY_PLACEHOLDER);
        assert_eq!(log.snapshot(false), EMPTY_PLACEHOLDER);

        log.append(LogLevel::Warn, "first");
        log.append(LogLevel::Error, "second");
        assert_eq!(log.snapshot(false), DISABLED_PLACEHOLDER);

        let text = log.snapshot(true);
        let lines = text.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("WARN first"));
        assert!(lines[1].ends_with("ERROR second"));
    }

    #[test]
    fn clear_empties_buffer() {
        let mut log = LogRingBuffer::with_capacity(3);
        log.append(LogLevel::Debug, "x");
        log.clear();
        assert!(log.is_empty());
        assert_eq!(log.snapshot(true), EMPTY_PLACEHOLDER);
    }
}
