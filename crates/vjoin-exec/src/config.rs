//! Hash-join configuration as supplied by the planner.
//!
//! Tuning fields fall back to their defaults when absent, so a minimal TOML
//! document only names the join type and its conditions:
//!
//! ```toml
//! join_type = "left"
//!
//! [[conditions]]
//! probe = "customer_id"
//! build = "id"
//! comparator = "equals"
//! ```

use serde::{Deserialize, Serialize};
use vjoin_error::{JoinError, Result};

use crate::memory::DEFAULT_MEMORY_LIMIT_BYTES;
use crate::row_ref::MAX_ROWS_PER_BATCH;

/// Initial bucket count of the hash table.
pub const DEFAULT_MIN_HASH_TABLE_SIZE: usize = 1 << 16;
/// Largest accepted initial bucket count. Slot numbers are `u32`, so a
/// larger table could never fill.
pub const MAX_MIN_HASH_TABLE_SIZE: usize = 1 << 30;
/// Entries-per-bucket ratio that triggers a resize.
pub const DEFAULT_LOAD_FACTOR: f64 = 0.75;
/// Maximum rows per output batch.
pub const DEFAULT_OUTPUT_BATCH_SIZE: usize = 4_000;

/// Relational join flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinType {
    /// Inner join: emit only matching pairs.
    #[serde(alias = "INNER")]
    Inner,
    /// Left outer join: also emit probe rows without a match.
    #[serde(alias = "LEFT")]
    Left,
    /// Right outer join: also emit build rows that never matched.
    #[serde(alias = "RIGHT")]
    Right,
    /// Full outer join: unmatched rows from both sides.
    #[serde(alias = "FULL")]
    Full,
}

impl JoinType {
    /// Probe rows without a match are emitted with NULL build columns.
    #[must_use]
    pub const fn emits_unmatched_probe(self) -> bool {
        matches!(self, Self::Left | Self::Full)
    }

    /// Build rows never matched are emitted after the probe side is exhausted.
    #[must_use]
    pub const fn emits_unmatched_build(self) -> bool {
        matches!(self, Self::Right | Self::Full)
    }
}

/// Equality rule applied to one key column pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparatorKind {
    /// SQL `=`: a NULL key never matches.
    #[default]
    #[serde(alias = "EQUALS")]
    Equals,
    /// `IS NOT DISTINCT FROM`: two NULL keys match.
    #[serde(alias = "IS_NOT_DISTINCT_FROM")]
    IsNotDistinctFrom,
}

impl ComparatorKind {
    #[must_use]
    pub const fn nulls_equal(self) -> bool {
        matches!(self, Self::IsNotDistinctFrom)
    }
}

/// One key pair of the composite join key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JoinCondition {
    /// Probe-side (left input) column name.
    #[serde(alias = "left")]
    pub probe: String,
    /// Build-side (right input) column name.
    #[serde(alias = "right")]
    pub build: String,
    #[serde(default)]
    pub comparator: ComparatorKind,
}

impl JoinCondition {
    #[must_use]
    pub fn new(
        probe: impl Into<String>,
        build: impl Into<String>,
        comparator: ComparatorKind,
    ) -> Self {
        Self {
            probe: probe.into(),
            build: build.into(),
            comparator,
        }
    }

    #[must_use]
    pub fn equals(probe: impl Into<String>, build: impl Into<String>) -> Self {
        Self::new(probe, build, ComparatorKind::Equals)
    }

    #[must_use]
    pub fn is_not_distinct_from(probe: impl Into<String>, build: impl Into<String>) -> Self {
        Self::new(probe, build, ComparatorKind::IsNotDistinctFrom)
    }
}

/// Full configuration of one hash-join operator instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HashJoinConfig {
    pub join_type: JoinType,
    pub conditions: Vec<JoinCondition>,
    #[serde(default = "default_min_hash_table_size")]
    pub min_hash_table_size: usize,
    #[serde(default = "default_load_factor")]
    pub load_factor: f64,
    #[serde(default = "default_output_batch_size")]
    pub output_batch_size: usize,
    #[serde(default = "default_memory_limit_bytes")]
    pub memory_limit_bytes: u64,
}

const fn default_min_hash_table_size() -> usize {
    DEFAULT_MIN_HASH_TABLE_SIZE
}

const fn default_load_factor() -> f64 {
    DEFAULT_LOAD_FACTOR
}

const fn default_output_batch_size() -> usize {
    DEFAULT_OUTPUT_BATCH_SIZE
}

const fn default_memory_limit_bytes() -> u64 {
    DEFAULT_MEMORY_LIMIT_BYTES
}

impl HashJoinConfig {
    #[must_use]
    pub const fn new(join_type: JoinType, conditions: Vec<JoinCondition>) -> Self {
        Self {
            join_type,
            conditions,
            min_hash_table_size: DEFAULT_MIN_HASH_TABLE_SIZE,
            load_factor: DEFAULT_LOAD_FACTOR,
            output_batch_size: DEFAULT_OUTPUT_BATCH_SIZE,
            memory_limit_bytes: DEFAULT_MEMORY_LIMIT_BYTES,
        }
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source)
            .map_err(|error| JoinError::invalid_config(error.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    #[must_use]
    pub fn with_condition(mut self, condition: JoinCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    #[must_use]
    pub const fn with_min_hash_table_size(mut self, buckets: usize) -> Self {
        self.min_hash_table_size = buckets;
        self
    }

    #[must_use]
    pub const fn with_load_factor(mut self, load_factor: f64) -> Self {
        self.load_factor = load_factor;
        self
    }

    #[must_use]
    pub const fn with_output_batch_size(mut self, rows: usize) -> Self {
        self.output_batch_size = rows;
        self
    }

    #[must_use]
    pub const fn with_memory_limit_bytes(mut self, bytes: u64) -> Self {
        self.memory_limit_bytes = bytes;
        self
    }

    /// Reject configurations the operator cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.conditions.is_empty() {
            return Err(JoinError::invalid_config(
                "hash join requires at least one join condition",
            ));
        }
        if let Some(condition) = self
            .conditions
            .iter()
            .find(|condition| condition.probe.is_empty() || condition.build.is_empty())
        {
            return Err(JoinError::invalid_config(format!(
                "join condition has an empty column name: probe={:?} build={:?}",
                condition.probe, condition.build
            )));
        }
        if !(self.load_factor > 0.0 && self.load_factor <= 1.0) {
            return Err(JoinError::invalid_config(format!(
                "load_factor must be in (0, 1], got {}",
                self.load_factor
            )));
        }
        if self.min_hash_table_size == 0 || self.min_hash_table_size > MAX_MIN_HASH_TABLE_SIZE {
            return Err(JoinError::invalid_config(format!(
                "min_hash_table_size must be in 1..={MAX_MIN_HASH_TABLE_SIZE}, got {}",
                self.min_hash_table_size
            )));
        }
        if self.output_batch_size == 0 || self.output_batch_size > MAX_ROWS_PER_BATCH {
            return Err(JoinError::invalid_config(format!(
                "output_batch_size must be in 1..={MAX_ROWS_PER_BATCH}, got {}",
                self.output_batch_size
            )));
        }
        Ok(())
    }
}
