//! Per-operator memory accounting.
//!
//! An [`AllocationScope`] is a byte budget owned by exactly one operator
//! instance. Components reserve before they grow and release when they are
//! cleared; a refused reservation is terminal for the operator.

use thiserror::Error;
use tracing::trace;
use vjoin_error::JoinError;

/// Default upper bound for a hash-join operator's allocations.
pub const DEFAULT_MEMORY_LIMIT_BYTES: u64 = 20_000_000_000;

/// A reservation exceeded the scope's remaining budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("reservation of {requested_bytes} bytes exceeds {available_bytes} available")]
pub struct ReservationError {
    pub requested_bytes: u64,
    pub available_bytes: u64,
}

impl ReservationError {
    /// Attribute the refusal to `operation`.
    #[must_use]
    pub const fn into_join_error(self, operation: &'static str) -> JoinError {
        JoinError::out_of_memory(operation, self.requested_bytes, self.available_bytes)
    }
}

/// Byte budget for one operator instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationScope {
    limit: u64,
    reserved: u64,
    peak: u64,
}

impl AllocationScope {
    #[must_use]
    pub const fn new(limit: u64) -> Self {
        Self {
            limit,
            reserved: 0,
            peak: 0,
        }
    }

    #[must_use]
    pub const fn limit(&self) -> u64 {
        self.limit
    }

    #[must_use]
    pub const fn reserved(&self) -> u64 {
        self.reserved
    }

    #[must_use]
    pub const fn peak(&self) -> u64 {
        self.peak
    }

    #[must_use]
    pub const fn available(&self) -> u64 {
        self.limit.saturating_sub(self.reserved)
    }

    /// Reserve `bytes` or refuse without changing state.
    pub fn try_reserve(&mut self, bytes: usize) -> Result<(), ReservationError> {
        let requested = bytes as u64;
        if requested > self.available() {
            return Err(ReservationError {
                requested_bytes: requested,
                available_bytes: self.available(),
            });
        }
        self.reserved += requested;
        self.peak = self.peak.max(self.reserved);
        trace!(requested, reserved = self.reserved, "allocation scope reserve");
        Ok(())
    }

    /// Return `bytes` to the budget.
    pub fn release(&mut self, bytes: usize) {
        self.reserved = self.reserved.saturating_sub(bytes as u64);
    }

    /// Return everything still reserved; yields the amount released.
    pub fn release_all(&mut self) -> u64 {
        std::mem::take(&mut self.reserved)
    }
}

impl Default for AllocationScope {
    fn default() -> Self {
        Self::new(DEFAULT_MEMORY_LIMIT_BYTES)
    }
}
