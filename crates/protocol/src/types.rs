use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Session-level state machine.
///
/// ```text
/// INIT -> SESSION_OPEN -> TRANSFERRING <-> CHECKPOINTED
///                              |
///                              v
///                         FINALIZING -> PROCESSING -> ACTIVE | FAILED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionPhase {
    Init,
    SessionOpen,
    Transferring,
    Checkpointed,
    Finalizing,
    Processing,
    Active,
    Failed,
}

impl SessionPhase {
    /// Returns `true` if moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: SessionPhase) -> bool {
        use SessionPhase::*;
        matches!(
            (self, next),
            (Init, SessionOpen)
                | (SessionOpen, Transferring)
                | (Transferring, Checkpointed)
                | (Transferring, Finalizing)
                | (Checkpointed, Transferring)
                | (Finalizing, Processing)
                | (Processing, Active)
                | (Processing, Failed)
        )
    }

    /// `ACTIVE` and `FAILED` end the session.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionPhase::Active | SessionPhase::Failed)
    }

    /// Phases a fresh invocation may pick the transfer loop back up from.
    pub fn is_resumable(self) -> bool {
        matches!(self, SessionPhase::SessionOpen | SessionPhase::Checkpointed)
    }
}

/// Illegal phase transition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("illegal session transition {from:?} -> {to:?}")]
pub struct PhaseError {
    pub from: SessionPhase,
    pub to: SessionPhase,
}

/// Progress against the primary ingestion target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrimaryProgress {
    pub upload_url: String,
    pub bytes_sent: u64,
    #[serde(default)]
    pub packets_sent: u32,
}

impl PrimaryProgress {
    pub fn new(upload_url: impl Into<String>) -> Self {
        Self {
            upload_url: upload_url.into(),
            bytes_sent: 0,
            packets_sent: 0,
        }
    }
}

/// Progress against the best-effort secondary storage target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecondaryProgress {
    #[serde(default)]
    pub upload_url: String,
    #[serde(default)]
    pub bytes_sent: u64,
    #[serde(default)]
    pub packets_sent: u32,
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub disabled_reason: String,
}

impl SecondaryProgress {
    /// An enabled secondary target with a live upload location.
    pub fn new(upload_url: impl Into<String>) -> Self {
        Self {
            upload_url: upload_url.into(),
            bytes_sent: 0,
            packets_sent: 0,
            enabled: true,
            disabled_reason: String::new(),
        }
    }

    /// A secondary target that never opened.
    pub fn disabled(reason: impl Into<String>) -> Self {
        Self {
            upload_url: String::new(),
            bytes_sent: 0,
            packets_sent: 0,
            enabled: false,
            disabled_reason: reason.into(),
        }
    }

    /// Disables the target for the remainder of the session.
    pub fn disable(&mut self, reason: impl Into<String>) {
        self.enabled = false;
        self.disabled_reason = reason.into();
    }
}

/// Processing state of a file on the primary target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileState {
    StateUnspecified,
    Uploading,
    Processing,
    Active,
    Failed,
    #[serde(other)]
    Unknown,
}

impl FileState {
    pub fn is_terminal(self) -> bool {
        matches!(self, FileState::Active | FileState::Failed)
    }
}

/// Remote file handle returned by the primary target on finalize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFile {
    /// Resource name used for status polling (e.g. `files/abc123`).
    pub name: String,
    #[serde(default)]
    pub uri: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mime_type: String,
    #[serde(default = "default_file_state")]
    pub state: FileState,
}

fn default_file_state() -> FileState {
    FileState::StateUnspecified
}

/// The only state that survives between invocations.
///
/// `total_bytes` is fixed when the session is opened. `buffer_residual`
/// holds decoded bytes that were pushed but not yet sent as a packet; it is
/// only populated in a persisted checkpoint and is emptied again once the
/// transfer loop takes ownership of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSession {
    pub id: String,
    pub mime_type: String,
    pub display_name: String,
    pub total_bytes: u64,
    pub fragment_count: u32,
    pub primary: PrimaryProgress,
    pub secondary: SecondaryProgress,
    pub fragment_cursor: u32,
    #[serde(default, with = "base64_bytes")]
    pub buffer_residual: Vec<u8>,
    /// SHA-256 hex of `buffer_residual` (empty when there is no residual).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub residual_checksum: String,
    pub phase: SessionPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_file: Option<RemoteFile>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UploadSession {
    /// Moves the session to `next`, rejecting transitions the state machine forbids.
    pub fn advance(&mut self, next: SessionPhase) -> Result<(), PhaseError> {
        if !self.phase.can_transition_to(next) {
            return Err(PhaseError {
                from: self.phase,
                to: next,
            });
        }
        self.phase = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Number of fragments not yet consumed.
    pub fn fragments_remaining(&self) -> u32 {
        self.fragment_count.saturating_sub(self.fragment_cursor)
    }

    /// `true` once every fragment has been pushed into the accumulator.
    pub fn all_fragments_consumed(&self) -> bool {
        self.fragment_cursor >= self.fragment_count
    }
}

mod base64_bytes {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        STANDARD.encode(data).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}
