//! Per-slot build-row bookkeeping.
//!
//! The hash table hands out dense slots; the match helper maps each slot to
//! the [`RowRef`] it stands for and keeps one "matched" bit per slot for
//! outer joins that must emit never-matched build rows.

use vjoin_error::{JoinError, Result};

use crate::memory::AllocationScope;
use crate::row_ref::RowRef;

const WORD_BITS: usize = u64::BITS as usize;

#[derive(Debug, Default)]
pub struct MatchHelper {
    links: Vec<RowRef>,
    matched: Vec<u64>,
    matched_count: usize,
    reserved_bytes: usize,
}

impl MatchHelper {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of linked slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.links.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    #[must_use]
    pub const fn matched_count(&self) -> usize {
        self.matched_count
    }

    /// Record that `slot` addresses `row_ref`. Slots must arrive in order.
    pub fn link(&mut self, slot: u32, row_ref: RowRef, scope: &mut AllocationScope) -> Result<()> {
        if slot as usize != self.links.len() {
            return Err(JoinError::internal(format!(
                "match helper expected slot {}, got {slot}",
                self.links.len()
            )));
        }
        if self.links.len() == self.links.capacity() {
            let additional = self.links.capacity().max(WORD_BITS * 16);
            let bytes = additional * std::mem::size_of::<RowRef>()
                + additional.div_ceil(WORD_BITS) * std::mem::size_of::<u64>();
            scope
                .try_reserve(bytes)
                .map_err(|error| error.into_join_error("match helper link"))?;
            self.links.reserve_exact(additional);
            self.matched.reserve_exact(additional.div_ceil(WORD_BITS));
            self.reserved_bytes += bytes;
        }
        self.links.push(row_ref);
        if self.links.len() > self.matched.len() * WORD_BITS {
            self.matched.push(0);
        }
        Ok(())
    }

    #[must_use]
    pub fn row_ref(&self, slot: u32) -> Option<RowRef> {
        self.links.get(slot as usize).copied()
    }

    /// Set the matched bit; returns true when it was previously unset.
    pub fn mark_matched(&mut self, slot: u32) -> bool {
        let slot = slot as usize;
        if slot >= self.links.len() {
            return false;
        }
        let word = &mut self.matched[slot / WORD_BITS];
        let bit = 1_u64 << (slot % WORD_BITS);
        let fresh = *word & bit == 0;
        *word |= bit;
        if fresh {
            self.matched_count += 1;
        }
        fresh
    }

    #[must_use]
    pub fn is_matched(&self, slot: u32) -> bool {
        let slot = slot as usize;
        slot < self.links.len() && self.matched[slot / WORD_BITS] & (1_u64 << (slot % WORD_BITS)) != 0
    }

    /// First unmatched slot at or after `from`.
    #[must_use]
    pub fn next_unmatched(&self, from: u32) -> Option<u32> {
        let len = self.links.len();
        let mut slot = from as usize;
        while slot < len {
            let word_idx = slot / WORD_BITS;
            let unmatched = !self.matched[word_idx] >> (slot % WORD_BITS);
            if unmatched == 0 {
                slot = (word_idx + 1) * WORD_BITS;
                continue;
            }
            let candidate = slot + unmatched.trailing_zeros() as usize;
            return (candidate < len).then_some(candidate as u32);
        }
        None
    }

    pub fn clear(&mut self, scope: &mut AllocationScope) {
        scope.release(self.reserved_bytes);
        self.reserved_bytes = 0;
        self.links = Vec::new();
        self.matched = Vec::new();
        self.matched_count = 0;
    }
}
