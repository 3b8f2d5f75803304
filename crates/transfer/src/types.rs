use std::fmt;

use serde::{Deserialize, Serialize};

/// Destination of a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    /// Mandatory ingestion endpoint with the fixed-granularity protocol.
    Primary,
    /// Best-effort storage endpoint.
    Secondary,
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetKind::Primary => f.write_str("primary"),
            TargetKind::Secondary => f.write_str("secondary"),
        }
    }
}

/// A stored fragment as listed by the fragment store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentInfo {
    /// Sequence index within the recording (0-based).
    pub index: u32,
    /// Size of the base64 text in bytes.
    pub encoded_size: u64,
}

/// A contiguous byte range sent to one target in a single transfer call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Byte offset of `data[0]` within the recording.
    pub offset: u64,
    pub data: Vec<u8>,
    /// Last packet of the stream; carries the finalize command.
    pub is_final: bool,
}

impl Packet {
    pub fn new(offset: u64, data: Vec<u8>, is_final: bool) -> Self {
        Self {
            offset,
            data,
            is_final,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Offset one past the last byte.
    pub fn end(&self) -> u64 {
        self.offset + self.data.len() as u64
    }
}
