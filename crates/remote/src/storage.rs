//! HTTP client for the secondary storage target.
//!
//! Sessions are opened with `uploadType=resumable` and answered with a
//! `Location` header. Each packet is a `PUT` addressed by `Content-Range`;
//! the target replies `308` while bytes are still missing and `200`/`201`
//! once the file is complete.

use reqwest::StatusCode;
use reqwest::header::{CONTENT_RANGE, LOCATION};
use serde::Serialize;
use tracing::debug;

use crate::error::RemoteError;
use crate::types::{ByteRange, SecondaryAck, SecondaryStart};
use crate::{BoxFuture, SecondaryTarget};

const HEADER_UPLOAD_CONTENT_TYPE: &str = "X-Upload-Content-Type";
const HEADER_UPLOAD_CONTENT_LENGTH: &str = "X-Upload-Content-Length";

/// Default service root.
pub const DEFAULT_BASE_URL: &str = "https://www.googleapis.com";

#[derive(Serialize)]
struct FileMetadata<'a> {
    name: &'a str,
    parents: [&'a str; 1],
}

/// Secondary target over HTTP, authenticated with a bearer token.
///
/// The `308 Resume Incomplete` reply must reach this client unchanged, so the
/// underlying `reqwest::Client` must not follow redirects. Use
/// [`StorageClient::http_client`] to build a suitable one.
#[derive(Clone)]
pub struct StorageClient {
    http: reqwest::Client,
    base_url: String,
    access_token: String,
}

impl StorageClient {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token: access_token.into(),
        }
    }

    /// Builds an HTTP client that leaves redirects to the caller.
    pub fn http_client() -> Result<reqwest::Client, RemoteError> {
        reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| RemoteError::Http(format!("failed to build HTTP client: {e}")))
    }

    fn start_url(&self) -> String {
        format!("{}/upload/drive/v3/files", self.base_url)
    }

    async fn start_session(&self, request: &SecondaryStart) -> Result<String, RemoteError> {
        let metadata = FileMetadata {
            name: &request.name,
            parents: [&request.parent_id],
        };
        let response = self
            .http
            .post(self.start_url())
            .query(&[("uploadType", "resumable")])
            .bearer_auth(&self.access_token)
            .header(HEADER_UPLOAD_CONTENT_TYPE, request.mime_type.as_str())
            .header(HEADER_UPLOAD_CONTENT_LENGTH, request.size.to_string())
            .json(&metadata)
            .send()
            .await
            .map_err(|e| RemoteError::Http(format!("secondary start failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(RemoteError::status(status.as_u16(), &text));
        }

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .ok_or(RemoteError::MissingHeader("location"))?
            .to_string();

        debug!(name = %request.name, size = request.size, "secondary session opened");
        Ok(location)
    }

    async fn put_range(
        &self,
        location: &str,
        range: ByteRange,
        body: &[u8],
    ) -> Result<SecondaryAck, RemoteError> {
        let response = self
            .http
            .put(location)
            .bearer_auth(&self.access_token)
            .header(CONTENT_RANGE, range.content_range())
            .body(body.to_vec())
            .send()
            .await
            .map_err(|e| {
                RemoteError::Http(format!("secondary packet at {} failed: {e}", range.offset))
            })?;

        let status = response.status();
        match classify_ack(status) {
            Some(ack) => Ok(ack),
            None => {
                let text = response.text().await.unwrap_or_default();
                Err(RemoteError::status(status.as_u16(), &text))
            }
        }
    }
}

/// Maps a packet response status to an acknowledgement.
pub(crate) fn classify_ack(status: StatusCode) -> Option<SecondaryAck> {
    match status.as_u16() {
        308 => Some(SecondaryAck::Incomplete),
        200 | 201 => Some(SecondaryAck::Complete),
        _ => None,
    }
}

impl SecondaryTarget for StorageClient {
    fn start<'a>(
        &'a self,
        request: &'a SecondaryStart,
    ) -> BoxFuture<'a, Result<String, RemoteError>> {
        Box::pin(self.start_session(request))
    }

    fn transmit<'a>(
        &'a self,
        location: &'a str,
        range: ByteRange,
        body: &'a [u8],
    ) -> BoxFuture<'a, Result<SecondaryAck, RemoteError>> {
        Box::pin(self.put_range(location, range, body))
    }
}
