//! HTTP client for the primary ingestion target.
//!
//! A session is opened with a `start` command that returns an upload URL in
//! the `x-goog-upload-url` header. Packets are posted to that URL with an
//! explicit offset; the packet carrying `upload, finalize` returns the file
//! metadata. Processing state is read from the file resource afterwards.

use meetrec_protocol::RemoteFile;
use serde::Deserialize;
use tracing::debug;

use crate::error::RemoteError;
use crate::types::{PrimaryStart, UploadCommand};
use crate::{BoxFuture, FileStatusSource, PrimaryTarget};

const HEADER_PROTOCOL: &str = "X-Goog-Upload-Protocol";
const HEADER_COMMAND: &str = "X-Goog-Upload-Command";
const HEADER_OFFSET: &str = "X-Goog-Upload-Offset";
const HEADER_CONTENT_LENGTH: &str = "X-Goog-Upload-Header-Content-Length";
const HEADER_CONTENT_TYPE: &str = "X-Goog-Upload-Header-Content-Type";
const HEADER_UPLOAD_URL: &str = "x-goog-upload-url";

/// Default service root.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

#[derive(Debug, Deserialize)]
struct FileEnvelope {
    file: RemoteFile,
}

/// Primary target over HTTP, authenticated with an API key.
#[derive(Clone)]
pub struct IngestClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl IngestClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    fn start_url(&self) -> String {
        format!("{}/upload/v1beta/files", self.base_url)
    }

    fn file_url(&self, file_name: &str) -> String {
        format!("{}/v1beta/{}", self.base_url, file_name.trim_start_matches('/'))
    }

    async fn start_session(&self, request: &PrimaryStart) -> Result<String, RemoteError> {
        let body = serde_json::json!({ "file": { "display_name": request.display_name } });
        let response = self
            .http
            .post(self.start_url())
            .query(&[("key", self.api_key.as_str())])
            .header(HEADER_PROTOCOL, "resumable")
            .header(HEADER_COMMAND, "start")
            .header(HEADER_CONTENT_LENGTH, request.content_length.to_string())
            .header(HEADER_CONTENT_TYPE, request.mime_type.as_str())
            .json(&body)
            .send()
            .await
            .map_err(|e| RemoteError::Http(format!("primary start failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(RemoteError::status(status.as_u16(), &text));
        }

        let url = response
            .headers()
            .get(HEADER_UPLOAD_URL)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .ok_or(RemoteError::MissingHeader(HEADER_UPLOAD_URL))?
            .to_string();

        debug!(display_name = %request.display_name, size = request.content_length, "primary session opened");
        Ok(url)
    }

    async fn upload(
        &self,
        upload_url: &str,
        command: UploadCommand,
        offset: u64,
        body: &[u8],
    ) -> Result<Option<RemoteFile>, RemoteError> {
        let response = self
            .http
            .post(upload_url)
            .header(HEADER_COMMAND, command.header_value())
            .header(HEADER_OFFSET, offset.to_string())
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(body.to_vec())
            .send()
            .await
            .map_err(|e| RemoteError::Http(format!("primary packet at {offset} failed: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| RemoteError::Http(format!("failed to read primary response: {e}")))?;
        if !status.is_success() {
            return Err(RemoteError::status(status.as_u16(), &text));
        }

        match command {
            UploadCommand::Continue => Ok(None),
            UploadCommand::Finalize => parse_file_envelope(&text).map(Some),
        }
    }

    async fn file_status(&self, file_name: &str) -> Result<RemoteFile, RemoteError> {
        let response = self
            .http
            .get(self.file_url(file_name))
            .query(&[("key", self.api_key.as_str())])
            .send()
            .await
            .map_err(|e| RemoteError::Http(format!("status request for {file_name} failed: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| RemoteError::Http(format!("failed to read status response: {e}")))?;
        if !status.is_success() {
            return Err(RemoteError::status(status.as_u16(), &text));
        }
        serde_json::from_str(&text).map_err(|e| RemoteError::InvalidResponse(e.to_string()))
    }
}

/// Extracts the file metadata from a finalize response.
pub(crate) fn parse_file_envelope(text: &str) -> Result<RemoteFile, RemoteError> {
    let envelope: FileEnvelope = serde_json::from_str(text)
        .map_err(|e| RemoteError::InvalidResponse(format!("finalize response: {e}")))?;
    if envelope.file.name.is_empty() {
        return Err(RemoteError::InvalidResponse("finalize response without file name".into()));
    }
    Ok(envelope.file)
}

impl PrimaryTarget for IngestClient {
    fn start<'a>(&'a self, request: &'a PrimaryStart) -> BoxFuture<'a, Result<String, RemoteError>> {
        Box::pin(self.start_session(request))
    }

    fn transmit<'a>(
        &'a self,
        upload_url: &'a str,
        command: UploadCommand,
        offset: u64,
        body: &'a [u8],
    ) -> BoxFuture<'a, Result<Option<RemoteFile>, RemoteError>> {
        Box::pin(self.upload(upload_url, command, offset, body))
    }
}

impl FileStatusSource for IngestClient {
    fn status<'a>(&'a self, file_name: &'a str) -> BoxFuture<'a, Result<RemoteFile, RemoteError>> {
        Box::pin(self.file_status(file_name))
    }
}
