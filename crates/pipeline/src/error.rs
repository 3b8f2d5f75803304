//! Pipeline error types.

use chrono::{DateTime, Utc};
use meetrec_protocol::{ErrorKind, PhaseError};
use meetrec_remote::RemoteError;
use meetrec_transfer::{TargetKind, TransferError};

/// Errors produced by the fragment and checkpoint stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid session id: {0}")]
    InvalidKey(String),

    #[error("corrupt checkpoint for session {session}: {reason}")]
    Corrupt { session: String, reason: String },

    #[error("session {session} is leased by {holder} until {expires_at}")]
    LeaseHeld {
        session: String,
        holder: String,
        expires_at: DateTime<Utc>,
    },
}

/// Errors produced while running an invocation.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("invalid phase transition: {0}")]
    Phase(#[from] PhaseError),

    #[error("primary target error: {0}")]
    Primary(RemoteError),

    #[error("secondary target error: {0}")]
    Secondary(RemoteError),

    #[error("status check failed: {0}")]
    Status(RemoteError),

    #[error("size mismatch: declared {declared} bytes, stream holds {actual}")]
    SizeMismatch { declared: u64, actual: u64 },

    #[error("size mismatch: fragment {index} decodes to {actual} bytes, its size implies {expected}")]
    FragmentLength { index: u32, expected: u64, actual: u64 },

    #[error("non-final packet of {len} bytes, granularity is {granularity}")]
    GranularityViolation { len: usize, granularity: usize },

    #[error("{target} packet at offset {offset}, target expects {expected}")]
    OffsetMismatch {
        target: TargetKind,
        offset: u64,
        expected: u64,
    },

    #[error("fragment {index} of session {session} is missing")]
    MissingFragment { session: String, index: u32 },

    #[error("processing failed for {0}")]
    ProcessingFailed(String),

    #[error("{file} still processing after {attempts} status checks")]
    Timeout { file: String, attempts: u32 },

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl PipelineError {
    /// Classification reported to the caller.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Transfer(e) => match e {
                TransferError::InvalidSessionId(_) => ErrorKind::InvalidRequest,
                TransferError::InsufficientData { .. } => ErrorKind::FatalProtocol,
                TransferError::Decode { .. }
                | TransferError::NoFragments
                | TransferError::FragmentGap { .. }
                | TransferError::ChecksumMismatch => ErrorKind::Store,
            },
            PipelineError::Store(StoreError::LeaseHeld { .. }) => ErrorKind::LeaseHeld,
            PipelineError::Store(StoreError::InvalidKey(_)) => ErrorKind::InvalidRequest,
            PipelineError::Store(_) | PipelineError::MissingFragment { .. } => ErrorKind::Store,
            PipelineError::Phase(_) | PipelineError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            PipelineError::Primary(_)
            | PipelineError::Status(_)
            | PipelineError::SizeMismatch { .. }
            | PipelineError::FragmentLength { .. }
            | PipelineError::OffsetMismatch { .. } => ErrorKind::FatalProtocol,
            PipelineError::Secondary(_) => ErrorKind::DegradedSecondary,
            PipelineError::GranularityViolation { .. } => ErrorKind::GranularityViolation,
            PipelineError::ProcessingFailed(_) => ErrorKind::ProcessingFailed,
            PipelineError::Timeout { .. } => ErrorKind::Timeout,
        }
    }
}
