use std::collections::VecDeque;

use crate::TransferError;

/// Bounded queue of decoded byte blocks.
///
/// The accumulator owns its blocks exclusively. Packets are cut from the
/// front: [`take_exact`](Self::take_exact) copies just enough of the leading
/// blocks to fill one packet and leaves the tail of a split block in place,
/// so memory use depends on the fragment size, never on the recording size.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BufferAccumulator {
    blocks: VecDeque<Vec<u8>>,
    len: usize,
}

impl BufferAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds an accumulator from a checkpointed residual.
    pub fn from_residual(residual: Vec<u8>) -> Self {
        let mut acc = Self::new();
        acc.push(residual);
        acc
    }

    /// Appends a decoded block. Empty blocks are dropped.
    pub fn push(&mut self, block: Vec<u8>) {
        if block.is_empty() {
            return;
        }
        self.len += block.len();
        self.blocks.push_back(block);
    }

    /// Removes and returns exactly `n` bytes from the front.
    ///
    /// Fails without touching the held state if fewer than `n` bytes are
    /// buffered.
    pub fn take_exact(&mut self, n: usize) -> Result<Vec<u8>, TransferError> {
        if n > self.len {
            return Err(TransferError::InsufficientData {
                requested: n,
                available: self.len,
            });
        }

        let mut out = Vec::with_capacity(n);
        while out.len() < n {
            let Some(mut block) = self.blocks.pop_front() else {
                break;
            };
            let need = n - out.len();
            if block.len() <= need {
                out.extend_from_slice(&block);
            } else {
                out.extend(block.drain(..need));
                self.blocks.push_front(block);
            }
        }

        self.len -= n;
        Ok(out)
    }

    /// Removes and returns everything held. Used for the final packet only.
    pub fn take_all(&mut self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len);
        for block in self.blocks.drain(..) {
            out.extend_from_slice(&block);
        }
        self.len = 0;
        out
    }

    /// Concatenated copy of the held bytes, for checkpointing.
    pub fn to_residual(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len);
        for block in &self.blocks {
            out.extend_from_slice(block);
        }
        out
    }

    /// Running total of held bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of blocks currently held.
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    #[cfg(test)]
    fn held_len(&self) -> usize {
        self.blocks.iter().map(Vec::len).sum()
    }
}
