//! Chained hash table over build-row slots.
//!
//! Entries live in one arena indexed by slot number; each bucket stores the
//! head and tail slot of its chain, and each entry stores the next slot.
//! New entries are appended at the chain tail, so a chain yields slots in
//! insertion order. Slots are dense (`0..len`) and never move, which lets
//! the match helper index per-row state by slot.

use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::debug;

use crate::memory::{AllocationScope, ReservationError};

/// Sentinel for "no slot" in bucket heads, tails, and chain links.
const EMPTY: u32 = u32::MAX;
/// Smallest arena growth step, in entries.
const MIN_ARENA_CHUNK: usize = 1_024;

#[derive(Debug, Clone, Copy)]
struct Entry {
    hash: u32,
    next: u32,
}

/// Shape counters surfaced through operator metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HashTableStats {
    pub num_buckets: usize,
    pub num_entries: usize,
    pub num_resizing: u64,
    pub resizing_time: Duration,
}

/// Failure of [`HashTable::insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PutError {
    /// Growth needs memory the allocation scope refuses; the caller would
    /// have to spill before retrying.
    #[error("retry after spill: requested {requested_bytes} bytes, {available_bytes} available")]
    RetryAfterSpill {
        requested_bytes: u64,
        available_bytes: u64,
    },
    /// Slot numbers are `u32`; the arena is full.
    #[error("hash table slot space exhausted at {0} entries")]
    SlotsExhausted(usize),
}

impl From<ReservationError> for PutError {
    fn from(error: ReservationError) -> Self {
        Self::RetryAfterSpill {
            requested_bytes: error.requested_bytes,
            available_bytes: error.available_bytes,
        }
    }
}

/// Chained hash table mapping reduced key hashes to build slots.
#[derive(Debug)]
pub struct HashTable {
    heads: Vec<u32>,
    tails: Vec<u32>,
    entries: Vec<Entry>,
    load_factor: f64,
    num_resizing: u64,
    resizing_time: Duration,
    reserved_bytes: usize,
}

fn bucket_bytes(buckets: usize) -> Option<usize> {
    buckets.checked_mul(2 * std::mem::size_of::<u32>())
}

/// Reserve bucket arrays for `buckets`. A count whose byte size does not fit
/// in `usize` can never be granted and is refused like any other request.
fn reserve_buckets(buckets: usize, scope: &mut AllocationScope) -> Result<usize, PutError> {
    let bytes = bucket_bytes(buckets).ok_or_else(|| PutError::RetryAfterSpill {
        requested_bytes: u64::MAX,
        available_bytes: scope.available(),
    })?;
    scope.try_reserve(bytes)?;
    Ok(bytes)
}

impl HashTable {
    /// Allocate `min_buckets` buckets, rounded up to a power of two.
    pub fn try_new(
        min_buckets: usize,
        load_factor: f64,
        scope: &mut AllocationScope,
    ) -> Result<Self, PutError> {
        let buckets = min_buckets
            .max(1)
            .checked_next_power_of_two()
            .ok_or_else(|| PutError::RetryAfterSpill {
                requested_bytes: u64::MAX,
                available_bytes: scope.available(),
            })?;
        let bytes = reserve_buckets(buckets, scope)?;
        Ok(Self {
            heads: vec![EMPTY; buckets],
            tails: vec![EMPTY; buckets],
            entries: Vec::new(),
            load_factor,
            num_resizing: 0,
            resizing_time: Duration::ZERO,
            reserved_bytes: bytes,
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn bucket_count(&self) -> usize {
        self.heads.len()
    }

    #[must_use]
    pub const fn reserved_bytes(&self) -> usize {
        self.reserved_bytes
    }

    #[must_use]
    pub fn stats(&self) -> HashTableStats {
        HashTableStats {
            num_buckets: self.bucket_count(),
            num_entries: self.len(),
            num_resizing: self.num_resizing,
            resizing_time: self.resizing_time,
        }
    }

    fn bucket_of(hash: u32, buckets: usize) -> usize {
        hash as usize & (buckets - 1)
    }

    fn exceeds_load_factor(&self, entries: usize) -> bool {
        entries as f64 > self.heads.len() as f64 * self.load_factor
    }

    /// Append an entry for `hash` and return its slot.
    ///
    /// Resizes first when the new entry would push the table past its load
    /// factor, so the table never holds more than `buckets * load_factor`
    /// entries. On error nothing has been inserted.
    pub fn insert(&mut self, hash: u32, scope: &mut AllocationScope) -> Result<u32, PutError> {
        let slot = u32::try_from(self.entries.len())
            .ok()
            .filter(|&slot| slot != EMPTY)
            .ok_or(PutError::SlotsExhausted(self.entries.len()))?;
        while self.exceeds_load_factor(self.entries.len() + 1) {
            self.resize(scope)?;
        }
        self.ensure_arena_capacity(scope)?;

        self.entries.push(Entry { hash, next: EMPTY });
        let bucket = Self::bucket_of(hash, self.heads.len());
        match self.tails[bucket] {
            EMPTY => self.heads[bucket] = slot,
            tail => self.entries[tail as usize].next = slot,
        }
        self.tails[bucket] = slot;
        Ok(slot)
    }

    fn ensure_arena_capacity(&mut self, scope: &mut AllocationScope) -> Result<(), PutError> {
        if self.entries.len() < self.entries.capacity() {
            return Ok(());
        }
        let additional = self.entries.capacity().max(MIN_ARENA_CHUNK);
        let bytes = additional * std::mem::size_of::<Entry>();
        scope.try_reserve(bytes)?;
        self.entries.reserve_exact(additional);
        self.reserved_bytes += bytes;
        Ok(())
    }

    /// Double the bucket count and relink every entry in slot order.
    fn resize(&mut self, scope: &mut AllocationScope) -> Result<(), PutError> {
        let started = Instant::now();
        let old_buckets = self.heads.len();
        let new_buckets = old_buckets
            .checked_mul(2)
            .ok_or(PutError::SlotsExhausted(self.entries.len()))?;
        let new_bytes = reserve_buckets(new_buckets, scope)?;

        let mut heads = vec![EMPTY; new_buckets];
        let mut tails = vec![EMPTY; new_buckets];
        for slot in 0..self.entries.len() {
            self.entries[slot].next = EMPTY;
            let bucket = Self::bucket_of(self.entries[slot].hash, new_buckets);
            // slot < entries.len() <= u32::MAX - 1
            let slot_id = slot as u32;
            match tails[bucket] {
                EMPTY => heads[bucket] = slot_id,
                tail => self.entries[tail as usize].next = slot_id,
            }
            tails[bucket] = slot_id;
        }
        self.heads = heads;
        self.tails = tails;

        // Granted once already, so it fits.
        let old_bytes = bucket_bytes(old_buckets).unwrap_or(0);
        scope.release(old_bytes);
        self.reserved_bytes = self.reserved_bytes - old_bytes + new_bytes;

        let elapsed = started.elapsed();
        self.num_resizing += 1;
        self.resizing_time += elapsed;
        debug!(
            old_buckets,
            new_buckets,
            entries = self.entries.len(),
            elapsed_us = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX),
            "hash table resized"
        );
        Ok(())
    }

    fn scan(&self, mut slot: u32, hash: u32) -> Option<u32> {
        while slot != EMPTY {
            let entry = self.entries[slot as usize];
            if entry.hash == hash {
                return Some(slot);
            }
            slot = entry.next;
        }
        None
    }

    /// First slot in `hash`'s chain whose stored hash equals `hash`.
    #[must_use]
    pub fn first_candidate(&self, hash: u32) -> Option<u32> {
        self.scan(self.heads[Self::bucket_of(hash, self.heads.len())], hash)
    }

    /// Next slot after `slot` in the same chain whose stored hash equals `hash`.
    #[must_use]
    pub fn next_candidate(&self, slot: u32, hash: u32) -> Option<u32> {
        self.entries
            .get(slot as usize)
            .and_then(|entry| self.scan(entry.next, hash))
    }

    /// Iterate candidate slots for `hash` in insertion order. Callers must
    /// still compare the full key; equal hashes may come from unequal keys.
    #[must_use]
    pub fn probe(&self, hash: u32) -> Candidates<'_> {
        Candidates {
            table: self,
            hash,
            next: self.first_candidate(hash),
        }
    }

    /// Drop every entry and return all reserved memory to `scope`.
    pub fn clear(&mut self, scope: &mut AllocationScope) {
        scope.release(self.reserved_bytes);
        self.reserved_bytes = 0;
        self.heads = Vec::new();
        self.tails = Vec::new();
        self.entries = Vec::new();
    }
}

/// Iterator over the candidate slots of one probe hash.
#[derive(Debug)]
pub struct Candidates<'a> {
    table: &'a HashTable,
    hash: u32,
    next: Option<u32>,
}

impl Iterator for Candidates<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        let slot = self.next?;
        self.next = self.table.next_candidate(slot, self.hash);
        Some(slot)
    }
}
