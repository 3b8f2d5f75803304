//! Wire and persistence types for the meetrec upload pipeline.
//!
//! Everything here is plain data: the persisted [`UploadSession`], the
//! invocation request/result exchanged with the external scheduler, and
//! the remote file metadata returned by the primary ingestion target.

pub mod constants;
pub mod invocation;
pub mod types;

pub use invocation::{
    BytesSent, ErrorKind, FragmentRange, InvocationRequest, InvocationResult, LogEntry, LogLevel,
    ResumptionDescriptor, TransferStats,
};
pub use types::{
    FileState, PhaseError, PrimaryProgress, RemoteFile, SecondaryProgress, SessionPhase,
    UploadSession,
};
