use crate::TransferError;

/// Longest accepted session id.
const MAX_SESSION_ID_LEN: usize = 128;

/// Validates a session id before it is used as a storage key or path component.
///
/// Accepts 1–128 characters from `[A-Za-z0-9_-]`, which rules out path
/// separators, `..` and absolute paths.
pub fn validate_session_id(session_id: &str) -> Result<(), TransferError> {
    if session_id.is_empty() {
        return Err(TransferError::InvalidSessionId("empty id".into()));
    }

    if session_id.len() > MAX_SESSION_ID_LEN {
        return Err(TransferError::InvalidSessionId(format!(
            "id longer than {MAX_SESSION_ID_LEN} characters"
        )));
    }

    if let Some(bad) = session_id
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
    {
        return Err(TransferError::InvalidSessionId(format!(
            "character {bad:?} not allowed in {session_id:?}"
        )));
    }

    Ok(())
}
