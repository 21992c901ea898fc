use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

pub const LOG_CAPACITY: usize = 500;

/// Display hint for a console line. Never used for crash classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl Severity {
    pub fn of(line: &str) -> Self {
        let upper = line.to_uppercase();
        if upper.contains("ERROR")
            || upper.contains("FATAL")
            || upper.contains("SEVERE")
            || line.contains("Exception")
        {
            Severity::Error
        } else if upper.contains("WARN") {
            Severity::Warning
        } else {
            Severity::Info
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    pub text: String,
    pub stream: OutputStream,
    pub severity: Severity,
}

impl LogLine {
    pub fn new(text: impl Into<String>, stream: OutputStream) -> Self {
        let text = text.into();
        Self {
            severity: Severity::of(&text),
            text,
            stream,
        }
    }
}

/// Fixed-capacity ring of recent console lines. The oldest line is dropped first.
#[derive(Debug, Clone)]
pub struct LogBuffer {
    lines: VecDeque<LogLine>,
    capacity: usize,
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::with_capacity(LOG_CAPACITY)
    }
}

impl LogBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, line: LogLine) {
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn snapshot(&self) -> Vec<LogLine> {
        self.lines.iter().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogLine> {
        self.lines.iter()
    }
}
