//! Sliding acknowledgement window over monotonically increasing sequences.
//!
//! The tracker answers "has `seq` been completed?" for an unbounded sequence
//! space using a fixed-size circular bitmap. Sequences that fall more than
//! `size` slots behind the highest completed sequence are compacted away and
//! reported as completed from then on, so the window must be sized well above
//! the expected out-of-order depth.
//!
//! ```text
//!            first                          last
//!              │                              │
//!   completed  ▼   window: bit[seq % size]    ▼   never seen
//!  ────────────┬──────────────────────────────┬─────────────
//!   ... 3 4 5  │ 6  7  8  9  ...              │ ...
//! ```
//!
//! Not thread-safe; callers that share a tracker wrap it in a lock.

use std::num::NonZeroUsize;

/// Bounded bitmap of completed sequence numbers.
#[derive(Debug, Clone)]
pub struct SequenceTracker {
    /// Lowest sequence not known to be completed.
    first: u64,
    /// One past the highest sequence ever completed.
    last: u64,
    /// Number of slots in the window.
    size: u64,
    /// Circular bitmap, slot `seq % size`.
    bits: Vec<u64>,
}

impl SequenceTracker {
    /// Create a tracker with `size` slots. Sequences start at 1.
    pub fn new(size: NonZeroUsize) -> Self {
        let size = size.get();
        Self {
            first: 1,
            last: 1,
            size: size as u64,
            bits: vec![0; size.div_ceil(64)],
        }
    }

    /// Number of slots in the window.
    pub fn size(&self) -> usize {
        self.size as usize
    }

    /// Whether `seq` is completed.
    ///
    /// Sequences below the window are reported completed; sequences at or
    /// above the highest completed one are not.
    pub fn completed(&self, seq: u64) -> bool {
        if seq >= self.last {
            return false;
        }
        if seq < self.first {
            return true;
        }
        self.bit(seq)
    }

    /// Mark `seq` completed, sliding the window forward if needed.
    pub fn set_completed(&mut self, seq: u64) {
        if seq < self.first {
            return;
        }
        if seq >= self.last {
            self.last = seq.saturating_add(1);
        }

        self.clear_and_set_first();
        self.set_bit(seq);
        self.clear_and_set_first();
    }

    /// Declare every sequence up to and including `seq` completed and forget
    /// per-sequence state.
    ///
    /// A bulk acknowledgement older than the current window is ignored.
    pub fn set_all_completed(&mut self, seq: u64) {
        let next = seq.saturating_add(1);
        if next < self.first {
            return;
        }
        self.bits.fill(0);
        self.first = next;
        self.last = next;
    }

    /// Lowest sequence not provably completed, the resume point for redelivery.
    pub fn uncompleted_from(&self) -> u64 {
        self.first
    }

    /// Advance `first` past contiguous completed slots.
    ///
    /// When `last` has run more than `size` ahead of `first`, everything
    /// before `last - size` is unrecoverable and is treated as completed.
    fn clear_and_set_first(&mut self) {
        let window_start = self.last.saturating_sub(self.size);
        if window_start > self.first {
            // Their slots alias sequences inside the new window.
            self.clear_range(self.first, window_start);
            self.first = window_start;
        }

        let mut seq = self.first;
        while seq < self.last && self.bit(seq) {
            seq += 1;
        }

        self.clear_range(self.first, seq);
        self.first = seq;
    }

    /// Clear the slots of `[from, to)`, at most one full window.
    fn clear_range(&mut self, from: u64, to: u64) {
        let count = (to - from).min(self.size);
        for s in from..from + count {
            self.clear_bit(s);
        }
    }

    fn slot(&self, seq: u64) -> (usize, u64) {
        let index = seq % self.size;
        ((index / 64) as usize, 1u64 << (index % 64))
    }

    fn bit(&self, seq: u64) -> bool {
        let (word, mask) = self.slot(seq);
        self.bits[word] & mask != 0
    }

    fn set_bit(&mut self, seq: u64) {
        let (word, mask) = self.slot(seq);
        self.bits[word] |= mask;
    }

    fn clear_bit(&mut self, seq: u64) {
        let (word, mask) = self.slot(seq);
        self.bits[word] &= !mask;
    }
}
