//! Fragment decoding, exact size estimation and bounded packet buffering.
//!
//! A recording arrives as many base64 fragments. This crate turns them back
//! into bytes ([`decode_fragment`]), computes the exact decoded size up front
//! ([`SizeEstimator`]), and re-slices the byte stream into fixed-size packets
//! without ever holding the whole recording ([`BufferAccumulator`]).

mod buffer;
mod codec;
mod size;
mod types;
mod validation;

pub use buffer::BufferAccumulator;
pub use codec::{checksum_bytes, decode_fragment, encode_fragment, verify_checksum};
pub use size::{SizeEstimator, unpadded_decoded_len};
pub use types::{FragmentInfo, Packet, TargetKind};
pub use validation::validate_session_id;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("fragment {index} is not valid base64: {source}")]
    Decode {
        index: u32,
        #[source]
        source: base64::DecodeError,
    },

    #[error("buffer holds {available} bytes, {requested} requested")]
    InsufficientData { requested: usize, available: usize },

    #[error("no fragments to size")]
    NoFragments,

    #[error("fragment indices are not contiguous: expected {expected}, found {found}")]
    FragmentGap { expected: u32, found: u32 },

    #[error("checksum mismatch")]
    ChecksumMismatch,

    #[error("invalid session id: {0}")]
    InvalidSessionId(String),
}
