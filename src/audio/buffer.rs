//! Growable PCM16 sample queue with chunk-sized dequeue.
//!
//! Each pump owns exactly one buffer and is the only task that appends to or
//! drains it, so no locking is needed. Backed by a `VecDeque` for O(1)
//! amortized append and front removal without reallocating on every chunk.

use std::collections::VecDeque;

/// FIFO queue of signed 16-bit samples.
#[derive(Debug, Default)]
pub struct SampleBuffer {
    samples: VecDeque<i16>,
}

impl SampleBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append samples in arrival order.
    pub fn extend(&mut self, samples: &[i16]) {
        self.samples.extend(samples.iter().copied());
    }

    /// Remove and return the oldest `chunk_len` samples, or `None` if fewer
    /// than a full chunk is buffered. A short final chunk is never produced;
    /// the remainder stays queued.
    pub fn pop_chunk(&mut self, chunk_len: usize) -> Option<Vec<i16>> {
        if chunk_len == 0 || self.samples.len() < chunk_len {
            return None;
        }
        Some(self.samples.drain(..chunk_len).collect())
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Discard everything queued. Used for barge-in, where buffered audio
    /// becomes stale the instant an interruption is observed.
    pub fn clear(&mut self) {
        self.samples.clear();
    }
}
