use serde::Serialize;

/// Parameters for opening a primary session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryStart {
    /// Exact decoded size of the recording.
    pub content_length: u64,
    pub mime_type: String,
    pub display_name: String,
}

/// Parameters for opening a secondary session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecondaryStart {
    /// File name including extension.
    pub name: String,
    /// Destination folder id.
    pub parent_id: String,
    pub mime_type: String,
    pub size: u64,
}

/// Command attached to a primary packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadCommand {
    /// More packets follow.
    Continue,
    /// Last packet; the target assembles the file.
    Finalize,
}

impl UploadCommand {
    pub fn header_value(self) -> &'static str {
        match self {
            UploadCommand::Continue => "upload",
            UploadCommand::Finalize => "upload, finalize",
        }
    }
}

/// Byte range of one secondary packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub offset: u64,
    pub len: u64,
    /// Total size of the recording.
    pub total: u64,
}

impl ByteRange {
    pub fn new(offset: u64, len: u64, total: u64) -> Self {
        Self { offset, len, total }
    }

    /// `Content-Range` header value. An empty range queries the target.
    pub fn content_range(&self) -> String {
        if self.len == 0 {
            format!("bytes */{}", self.total)
        } else {
            format!(
                "bytes {}-{}/{}",
                self.offset,
                self.offset + self.len - 1,
                self.total
            )
        }
    }

    /// `true` if the range ends at the last byte of the recording.
    pub fn reaches_end(&self) -> bool {
        self.offset + self.len == self.total
    }
}

/// Secondary target response to a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecondaryAck {
    /// More bytes are expected.
    Incomplete,
    /// The file is complete.
    Complete,
}
