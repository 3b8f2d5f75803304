use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sha2::{Digest, Sha256};

use crate::TransferError;

// ---------------------------------------------------------------------------
// Checksum helpers
// ---------------------------------------------------------------------------

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Verifies `data` against a hex SHA-256 digest.
///
/// An empty `expected` only matches empty data.
pub fn verify_checksum(data: &[u8], expected: &str) -> Result<(), TransferError> {
    if expected.is_empty() {
        return if data.is_empty() {
            Ok(())
        } else {
            Err(TransferError::ChecksumMismatch)
        };
    }
    if checksum_bytes(data) != expected {
        return Err(TransferError::ChecksumMismatch);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Fragment encoding
// ---------------------------------------------------------------------------

/// Decodes one stored fragment (standard base64 text) into raw bytes.
///
/// Surrounding ASCII whitespace, such as a trailing newline added by the
/// store, is ignored.
pub fn decode_fragment(index: u32, encoded: &[u8]) -> Result<Vec<u8>, TransferError> {
    STANDARD
        .decode(encoded.trim_ascii())
        .map_err(|source| TransferError::Decode { index, source })
}

/// Encodes raw bytes the way fragments are stored.
pub fn encode_fragment(data: &[u8]) -> Vec<u8> {
    STANDARD.encode(data).into_bytes()
}
