use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, MutexGuard};

/// Number of entries retained before the oldest are evicted
pub const DEFAULT_LOG_CAPACITY: usize = 1000;

/// Severity of a security event
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Warning,
    Error,
    Critical,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
            LogLevel::Critical => "CRITICAL",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SecurityLogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    pub path: String,
}

/// Bounded, in-memory record of security-relevant rejections.
///
/// Appends and evictions happen under one lock, so concurrent writers never
/// observe the buffer above capacity. Share it between components with an
/// `Arc`; nothing in the crate keeps a process-wide instance.
#[derive(Debug)]
pub struct SecurityLog {
    entries: Mutex<VecDeque<SecurityLogEntry>>,
    capacity: usize,
}

impl SecurityLog {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_LOG_CAPACITY)
    }

    /// Create a log holding at most `capacity` entries (minimum 1)
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Append an entry, evicting the oldest one when full
    pub fn record(&self, level: LogLevel, message: impl Into<String>, path: impl Into<String>) {
        let entry = SecurityLogEntry {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            path: path.into(),
        };

        match level {
            LogLevel::Warning => {
                tracing::warn!(path = %entry.path, "security: {}", entry.message)
            }
            LogLevel::Error | LogLevel::Critical => {
                tracing::error!(level = %level, path = %entry.path, "security: {}", entry.message)
            }
        }

        let mut entries = self.lock();
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Copy of the current entries, oldest first
    pub fn snapshot(&self) -> Vec<SecurityLogEntry> {
        self.lock().iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    // A writer that panicked mid-append cannot leave the deque inconsistent,
    // so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, VecDeque<SecurityLogEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for SecurityLog {
    fn default() -> Self {
        Self::new()
    }
}
