//! Session (de)serialization for the checkpoint store.
//!
//! The session is stored as JSON. The residual buffer travels base64-encoded
//! inside it together with its SHA-256, which is checked on load.

use meetrec_protocol::UploadSession;
use meetrec_transfer::{checksum_bytes, verify_checksum};
use tracing::debug;

use crate::error::StoreError;
use crate::store::CheckpointStore;

/// Serializes `session`, refreshing its residual checksum first.
pub fn encode_session(session: &mut UploadSession) -> Result<Vec<u8>, StoreError> {
    session.residual_checksum = if session.buffer_residual.is_empty() {
        String::new()
    } else {
        checksum_bytes(&session.buffer_residual)
    };
    Ok(serde_json::to_vec(session)?)
}

/// Parses a stored session and verifies it belongs to `session_id` and that
/// its residual is intact.
pub fn decode_session(session_id: &str, bytes: &[u8]) -> Result<UploadSession, StoreError> {
    let session: UploadSession = serde_json::from_slice(bytes)?;
    if session.id != session_id {
        return Err(StoreError::Corrupt {
            session: session_id.to_string(),
            reason: format!("checkpoint belongs to {}", session.id),
        });
    }
    verify_checksum(&session.buffer_residual, &session.residual_checksum).map_err(|_| {
        StoreError::Corrupt {
            session: session_id.to_string(),
            reason: "residual checksum mismatch".into(),
        }
    })?;
    if session.fragment_cursor > session.fragment_count {
        return Err(StoreError::Corrupt {
            session: session_id.to_string(),
            reason: format!(
                "cursor {} beyond {} fragments",
                session.fragment_cursor, session.fragment_count
            ),
        });
    }
    Ok(session)
}

/// Writes the session to the store.
pub async fn save_session(
    store: &dyn CheckpointStore,
    session: &mut UploadSession,
) -> Result<(), StoreError> {
    let bytes = encode_session(session)?;
    store.put(&session.id, &bytes).await?;
    debug!(
        session = %session.id,
        phase = ?session.phase,
        cursor = session.fragment_cursor,
        residual = session.buffer_residual.len(),
        "session saved"
    );
    Ok(())
}

/// Loads the session, if one was saved.
pub async fn load_session(
    store: &dyn CheckpointStore,
    session_id: &str,
) -> Result<Option<UploadSession>, StoreError> {
    match store.get(session_id).await? {
        Some(bytes) => decode_session(session_id, &bytes).map(Some),
        None => Ok(None),
    }
}
