//! Resumable upload protocols for the two remote targets.
//!
//! The pipeline talks to its destinations only through the traits defined
//! here, so tests can substitute in-memory targets. [`IngestClient`] and
//! [`StorageClient`] are the HTTP implementations.
//!
//! - **Primary** ([`PrimaryTarget`]): ingestion endpoint with a fixed packet
//!   granularity and an explicit finalize command.
//! - **Secondary** ([`SecondaryTarget`]): storage endpoint addressed by
//!   `Content-Range`, answering "incomplete" until the last byte arrives.
//! - **Status** ([`FileStatusSource`]): post-finalize processing state.

pub mod error;
pub mod ingest;
pub mod storage;
pub mod types;

use std::future::Future;
use std::pin::Pin;

use meetrec_protocol::RemoteFile;

pub use error::RemoteError;
pub use ingest::IngestClient;
pub use storage::StorageClient;
pub use types::{ByteRange, PrimaryStart, SecondaryAck, SecondaryStart, UploadCommand};

/// Boxed future returned by the target traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Mandatory ingestion target.
pub trait PrimaryTarget: Send + Sync {
    /// Opens a resumable session and returns its upload URL.
    fn start<'a>(&'a self, request: &'a PrimaryStart) -> BoxFuture<'a, Result<String, RemoteError>>;

    /// Sends `body` at `offset`. Returns the file metadata on finalize.
    fn transmit<'a>(
        &'a self,
        upload_url: &'a str,
        command: UploadCommand,
        offset: u64,
        body: &'a [u8],
    ) -> BoxFuture<'a, Result<Option<RemoteFile>, RemoteError>>;
}

/// Best-effort storage target.
pub trait SecondaryTarget: Send + Sync {
    /// Opens a resumable session and returns its upload location.
    fn start<'a>(
        &'a self,
        request: &'a SecondaryStart,
    ) -> BoxFuture<'a, Result<String, RemoteError>>;

    /// Sends `body` for `range`.
    fn transmit<'a>(
        &'a self,
        location: &'a str,
        range: ByteRange,
        body: &'a [u8],
    ) -> BoxFuture<'a, Result<SecondaryAck, RemoteError>>;
}

/// Processing state lookup on the primary target.
pub trait FileStatusSource: Send + Sync {
    /// Returns the current metadata (including state) of a finalized file.
    fn status<'a>(&'a self, file_name: &'a str) -> BoxFuture<'a, Result<RemoteFile, RemoteError>>;
}
