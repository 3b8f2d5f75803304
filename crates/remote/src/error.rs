//! Remote protocol errors.

/// Longest response body excerpt kept in an error.
const MAX_BODY_EXCERPT: usize = 200;

/// Errors produced while talking to a remote target.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// The request never produced a response (connect, TLS, timeout, body read).
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("response missing header {0}")]
    MissingHeader(&'static str),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl RemoteError {
    /// Builds a status error, keeping only the start of the body.
    pub fn status(status: u16, body: &str) -> Self {
        RemoteError::Status {
            status,
            body: excerpt(body),
        }
    }

    /// `true` for failures worth retrying: no response, throttling or 5xx.
    pub fn is_transient(&self) -> bool {
        match self {
            RemoteError::Http(_) => true,
            RemoteError::Status { status, .. } => *status == 429 || *status >= 500,
            RemoteError::MissingHeader(_) | RemoteError::InvalidResponse(_) => false,
        }
    }
}

fn excerpt(body: &str) -> String {
    if body.len() <= MAX_BODY_EXCERPT {
        return body.to_string();
    }
    let mut end = MAX_BODY_EXCERPT;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    body[..end].to_string()
}
