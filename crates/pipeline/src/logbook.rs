use chrono::Utc;
use meetrec_protocol::{LogEntry, LogLevel};
use tracing::{error, info, warn};

/// Per-invocation log returned to the caller in `InvocationResult::logs`.
///
/// Every entry is also emitted through `tracing` with the session id attached.
#[derive(Debug, Clone)]
pub struct InvocationLog {
    session_id: String,
    entries: Vec<LogEntry>,
}

impl InvocationLog {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            entries: Vec::new(),
        }
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.push(LogLevel::Info, message.into());
    }

    pub fn success(&mut self, message: impl Into<String>) {
        self.push(LogLevel::Success, message.into());
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.push(LogLevel::Warn, message.into());
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.push(LogLevel::Error, message.into());
    }

    fn push(&mut self, level: LogLevel, message: String) {
        match level {
            LogLevel::Info | LogLevel::Success => info!(session = %self.session_id, "{message}"),
            LogLevel::Warn => warn!(session = %self.session_id, "{message}"),
            LogLevel::Error => error!(session = %self.session_id, "{message}"),
        }
        self.entries.push(LogEntry {
            level,
            message,
            timestamp: Utc::now(),
        });
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<LogEntry> {
        self.entries
    }
}
