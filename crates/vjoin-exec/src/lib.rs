//! Vectorized hash-join operator.
//!
//! Two-phase equi-join over columnar batches: the build input is drained into
//! a chained hash table, then the probe input streams through it and produces
//! output batches of bounded size. Inner, left outer, right outer, and full
//! outer joins are supported. Every batch exchange follows the pull-based
//! [`BatchSource`] protocol, and the operator itself is a `BatchSource`.

pub mod config;
pub mod hash_join;
pub mod hash_table;
pub mod hyper_container;
pub mod kernels;
pub mod match_helper;
pub mod memory;
pub mod metrics;
pub mod output_schema;
pub mod probe;
pub mod protocol;
pub mod row_ref;
pub mod source;

pub use config::{
    ComparatorKind, DEFAULT_LOAD_FACTOR, DEFAULT_MIN_HASH_TABLE_SIZE, DEFAULT_OUTPUT_BATCH_SIZE,
    HashJoinConfig, JoinCondition, JoinType, MAX_MIN_HASH_TABLE_SIZE,
};
pub use hash_join::{HashJoinOperator, JoinState};
pub use hash_table::{HashTable, HashTableStats, PutError};
pub use hyper_container::HyperContainer;
pub use kernels::{ColumnWriter, KeyColumn, KeyComparator, KeyFamily, hash_key};
pub use match_helper::MatchHelper;
pub use memory::{AllocationScope, DEFAULT_MEMORY_LIMIT_BYTES, ReservationError};
pub use metrics::HashJoinMetrics;
pub use output_schema::{OutputSchema, build_output_schema};
pub use probe::{BuildSide, ChainPosition, ProbeCursor, ProbeEngine, ProbePhase};
pub use protocol::{BatchSource, IterOutcome, pull_batch};
pub use row_ref::{MAX_ROWS_PER_BATCH, RowRef};
pub use source::{KillLog, ScriptStep, ScriptedSource};
pub use vjoin_error::{JoinError, JoinSide, Result};
