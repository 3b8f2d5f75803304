use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{RemoteFile, SessionPhase};

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// Half-open range of fragment indices `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentRange {
    pub start: u32,
    pub end: u32,
}

impl FragmentRange {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// Iterates the indices in order.
    pub fn indices(&self) -> std::ops::Range<u32> {
        self.start..self.end
    }
}

/// One invocation issued by the external scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationRequest {
    pub session_id: String,
    pub range: FragmentRange,
    /// The lot that ends the recording; never interrupted by the time budget.
    #[serde(default)]
    pub is_final_lot: bool,
    /// Only used when the session is opened by this invocation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Meeting title, used to derive remote file names on session open.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

// ---------------------------------------------------------------------------
// Result
// ---------------------------------------------------------------------------

/// Cumulative bytes accepted by each target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BytesSent {
    pub primary: u64,
    pub secondary: u64,
}

/// Minimal state the scheduler needs to drive the next invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumptionDescriptor {
    pub session_id: String,
    pub next_fragment_index: u32,
    pub bytes_sent: BytesSent,
    pub finalized: bool,
}

/// Severity of an invocation log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogLevel {
    Info,
    Success,
    Warn,
    Error,
}

/// A log line returned to the caller alongside the result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Error taxonomy surfaced to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Size mismatch or any non-success from the primary target.
    FatalProtocol,
    /// Secondary target failure; the secondary is disabled and the primary continues.
    DegradedSecondary,
    /// A non-final primary packet whose length differs from the granularity.
    GranularityViolation,
    /// Status polling exhausted its attempts.
    Timeout,
    /// The primary target reported `FAILED` after finalize.
    ProcessingFailed,
    /// Fragment or checkpoint store failure, including missing fragments.
    Store,
    /// The request does not match the persisted session.
    InvalidRequest,
    /// Another invocation holds the session lease.
    LeaseHeld,
}

/// Byte offsets and packet counts for diagnosing where a transfer stopped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferStats {
    pub primary_bytes_sent: u64,
    pub secondary_bytes_sent: u64,
    /// Packets accepted by the primary target during this invocation.
    pub primary_packets: u32,
    /// Packets accepted by the secondary target during this invocation.
    pub secondary_packets: u32,
    pub secondary_enabled: bool,
    pub fragments_consumed: u32,
    /// Decoded bytes still buffered (carried in the checkpoint).
    pub buffered_bytes: u64,
    pub elapsed_ms: u64,
    /// The time budget (or a cancellation) cut the lot short.
    pub interrupted: bool,
}

/// Outcome of one invocation. Always produced, even on fatal errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationResult {
    pub success: bool,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<SessionPhase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resumption: Option<ResumptionDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<RemoteFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub stats: TransferStats,
    #[serde(default)]
    pub logs: Vec<LogEntry>,
}
