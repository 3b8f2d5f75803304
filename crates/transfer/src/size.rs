use crate::codec::decode_fragment;
use crate::types::FragmentInfo;
use crate::TransferError;

/// Decoded length of an unpadded base64 fragment, from its encoded size alone.
pub fn unpadded_decoded_len(encoded_size: u64) -> u64 {
    encoded_size * 3 / 4
}

/// Computes the exact decoded size of a recording split into base64 fragments.
///
/// Every fragment but the last is produced by cutting the base64 text of the
/// recording at multiples of four characters, so it carries no padding and its
/// decoded length follows from its size. The last fragment may be padded (or
/// carry trailing whitespace) and must be decoded to learn its true length.
#[derive(Debug, Clone)]
pub struct SizeEstimator {
    fragments: Vec<FragmentInfo>,
}

impl SizeEstimator {
    /// Builds an estimator from a fragment listing in any order.
    ///
    /// Indices must form the contiguous sequence `0..n`.
    pub fn new(mut fragments: Vec<FragmentInfo>) -> Result<Self, TransferError> {
        if fragments.is_empty() {
            return Err(TransferError::NoFragments);
        }
        fragments.sort_by_key(|f| f.index);
        for (expected, fragment) in fragments.iter().enumerate() {
            let expected = expected as u32;
            if fragment.index != expected {
                return Err(TransferError::FragmentGap {
                    expected,
                    found: fragment.index,
                });
            }
        }
        Ok(Self { fragments })
    }

    pub fn fragment_count(&self) -> u32 {
        self.fragments.len() as u32
    }

    /// Index of the fragment that must be decoded in full.
    pub fn last_index(&self) -> u32 {
        self.fragment_count() - 1
    }

    /// Decoded bytes of every fragment except the last.
    pub fn prefix_bytes(&self) -> u64 {
        let n = self.fragments.len() - 1;
        self.fragments[..n]
            .iter()
            .map(|f| unpadded_decoded_len(f.encoded_size))
            .sum()
    }

    /// Size-only estimate over all fragments, including the last.
    ///
    /// Only useful for diagnostics: it overshoots whenever the last fragment
    /// is padded.
    pub fn naive_total(&self) -> u64 {
        self.fragments
            .iter()
            .map(|f| unpadded_decoded_len(f.encoded_size))
            .sum()
    }

    /// Exact total, given the encoded content of the last fragment.
    pub fn total_bytes(&self, last_fragment: &[u8]) -> Result<u64, TransferError> {
        let last = decode_fragment(self.last_index(), last_fragment)?;
        Ok(self.prefix_bytes() + last.len() as u64)
    }
}
