//! Operator-owned counters exported for observability.

use std::time::Duration;

use serde::Serialize;

use crate::hash_table::HashTableStats;

/// Counters for one hash-join operator instance.
///
/// The table-shape fields (`num_buckets`, `num_entries`, `num_resizing`,
/// `resizing_time_us`) are copied from the hash table once the build phase
/// completes. The row counters advance as batches flow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HashJoinMetrics {
    pub num_buckets: u64,
    pub num_entries: u64,
    pub num_resizing: u64,
    pub resizing_time_us: u64,
    pub build_batches: u64,
    pub build_rows: u64,
    pub probe_batches: u64,
    pub probe_rows: u64,
    pub output_batches: u64,
    pub output_rows: u64,
    pub peak_memory_bytes: u64,
}

impl HashJoinMetrics {
    pub fn record_table_stats(&mut self, stats: &HashTableStats) {
        self.num_buckets = stats.num_buckets as u64;
        self.num_entries = stats.num_entries as u64;
        self.num_resizing = stats.num_resizing;
        self.resizing_time_us = duration_us(stats.resizing_time);
    }

    pub fn record_build_batch(&mut self, rows: usize) {
        self.build_batches = self.build_batches.saturating_add(1);
        self.build_rows = self.build_rows.saturating_add(rows as u64);
    }

    pub fn record_probe_batch(&mut self, rows: usize) {
        self.probe_batches = self.probe_batches.saturating_add(1);
        self.probe_rows = self.probe_rows.saturating_add(rows as u64);
    }

    pub fn record_output_batch(&mut self, rows: usize) {
        self.output_batches = self.output_batches.saturating_add(1);
        self.output_rows = self.output_rows.saturating_add(rows as u64);
    }

    #[must_use]
    pub const fn resizing_time(&self) -> Duration {
        Duration::from_micros(self.resizing_time_us)
    }
}

fn duration_us(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}
