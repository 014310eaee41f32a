//! Addresses of rows inside the accumulated build side.

use std::fmt;

/// Largest build batch the accumulator accepts; row indices must fit a `u16`.
pub const MAX_ROWS_PER_BATCH: usize = 1 << 16;

/// Location of one build row: which absorbed batch, and which row inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowRef {
    pub batch_index: u32,
    pub row_index: u16,
}

impl RowRef {
    #[must_use]
    pub const fn new(batch_index: u32, row_index: u16) -> Self {
        Self {
            batch_index,
            row_index,
        }
    }

    /// Returns `None` when `row_index` exceeds the per-batch row limit.
    #[must_use]
    pub fn try_new(batch_index: u32, row_index: usize) -> Option<Self> {
        u16::try_from(row_index)
            .ok()
            .map(|row_index| Self::new(batch_index, row_index))
    }

    #[must_use]
    pub const fn row(self) -> usize {
        self.row_index as usize
    }
}

impl fmt::Display for RowRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.batch_index, self.row_index)
    }
}
