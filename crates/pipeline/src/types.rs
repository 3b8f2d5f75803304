//! Configuration and event types for the pipeline.

use std::time::Duration;

use meetrec_protocol::constants::{DEFAULT_GRANULARITY, DEFAULT_MIME_TYPE};
use meetrec_protocol::{FileState, RemoteFile};
use meetrec_transfer::TargetKind;

/// Default wall-clock budget for the transfer part of one invocation.
pub const DEFAULT_TIME_BUDGET: Duration = Duration::from_secs(240);

/// Default pause between status checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default number of status checks before giving up.
pub const DEFAULT_MAX_POLL_ATTEMPTS: u32 = 60;

/// Status polling schedule after finalize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_attempts: DEFAULT_MAX_POLL_ATTEMPTS,
        }
    }
}

impl WaitPolicy {
    /// Longest time a full wait can take.
    pub fn max_wait(&self) -> Duration {
        self.interval * self.max_attempts.saturating_sub(1)
    }
}

/// Settings passed to [`TransferPipeline`](crate::TransferPipeline) at construction.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Exact length of every non-final primary packet.
    pub granularity: usize,
    /// Elapsed time after which a non-final lot checkpoints and returns.
    pub time_budget: Duration,
    pub wait: WaitPolicy,
    /// How long a session lease stays valid without being released.
    pub lease_ttl: Duration,
    /// Lease holder name.
    pub worker_id: String,
    /// MIME type used when the request does not name one.
    pub default_mime_type: String,
    /// Destination folder on the secondary target. `None` leaves the
    /// secondary disabled.
    pub secondary_parent_id: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let wait = WaitPolicy::default();
        Self {
            granularity: DEFAULT_GRANULARITY,
            time_budget: DEFAULT_TIME_BUDGET,
            lease_ttl: DEFAULT_TIME_BUDGET + wait.max_wait() + Duration::from_secs(60),
            wait,
            worker_id: default_worker_id(),
            default_mime_type: DEFAULT_MIME_TYPE.to_string(),
            secondary_parent_id: None,
        }
    }
}

/// `<hostname>-<pid>`, or `worker-<pid>` when the hostname is unavailable.
pub fn default_worker_id() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "worker".into());
    format!("{host}-{}", std::process::id())
}

/// Progress event emitted while an invocation runs.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferEvent {
    /// Both targets were asked to open a session.
    SessionOpened {
        session_id: String,
        total_bytes: u64,
        secondary_enabled: bool,
    },
    /// A target accepted a packet.
    PacketAccepted {
        session_id: String,
        target: TargetKind,
        offset: u64,
        len: usize,
        is_final: bool,
    },
    /// The secondary target failed and is skipped from now on.
    SecondaryDisabled { session_id: String, reason: String },
    /// Progress was persisted and the invocation is returning early.
    Checkpointed {
        session_id: String,
        next_fragment_index: u32,
    },
    /// The final packet was accepted by the primary target.
    Finalized { session_id: String, file: RemoteFile },
    /// One status check after finalize.
    ProcessingState {
        session_id: String,
        state: FileState,
        attempt: u32,
    },
}
