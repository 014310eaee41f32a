//! Hash-join operator.
//!
//! Two-phase equi-join over a pull-based iterator protocol. The first pull
//! prefetches one batch from each input, drains the build input into the hash
//! table and accumulator, and fixes the output schema; every pull after that
//! returns at most one output batch from the resumable probe engine.
//!
//! State machine: `Unstarted -> Building -> Probing -> Done`, with `Failed`
//! reachable from every state. Reaching `Done` or `Failed` releases all owned
//! memory and kills both inputs exactly once, probe side first.

use tracing::{debug, debug_span, error, warn};
use vjoin_error::{JoinError, JoinSide, Result};
use vjoin_types::{Batch, Schema};

use crate::config::{HashJoinConfig, JoinType};
use crate::hash_table::{HashTable, PutError};
use crate::hyper_container::HyperContainer;
use crate::kernels::KeyComparator;
use crate::match_helper::MatchHelper;
use crate::memory::AllocationScope;
use crate::metrics::HashJoinMetrics;
use crate::output_schema::build_output_schema;
use crate::probe::{BuildSide, ProbeEngine};
use crate::protocol::{BatchSource, IterOutcome, pull_batch};
use crate::row_ref::RowRef;

// ── Operator State ─────────────────────────────────────────────────────────

/// Lifecycle of a [`HashJoinOperator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinState {
    /// Nothing pulled yet.
    Unstarted,
    /// Draining the build input into the hash table.
    Building,
    /// Streaming probe rows through the table.
    Probing,
    /// End of stream reported; resources released.
    Done,
    /// A fatal error or cancellation; absorbing.
    Failed,
}

impl JoinState {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

fn put_failure(error: PutError) -> JoinError {
    match error {
        PutError::RetryAfterSpill {
            requested_bytes,
            available_bytes,
        } => JoinError::out_of_memory("hash table put", requested_bytes, available_bytes),
        PutError::SlotsExhausted(entries) => JoinError::unsupported(
            JoinSide::Build,
            format!("build side exceeds hash table capacity at {entries} entries"),
        ),
    }
}

// ── Operator ───────────────────────────────────────────────────────────────

/// Hash join of a probe input (left) against a build input (right).
///
/// Output rows carry the build columns first, then the probe columns.
#[derive(Debug)]
pub struct HashJoinOperator<P: BatchSource, B: BatchSource> {
    config: HashJoinConfig,
    probe: P,
    build: B,
    state: JoinState,
    scope: AllocationScope,
    table: Option<HashTable>,
    helper: MatchHelper,
    container: HyperContainer,
    engine: Option<ProbeEngine>,
    output_schema: Option<Schema>,
    current: Option<Batch>,
    failure: Option<JoinError>,
    metrics: HashJoinMetrics,
    schema_announced: bool,
    upstream_killed: bool,
    released: bool,
}

impl<P: BatchSource, B: BatchSource> HashJoinOperator<P, B> {
    /// Create an operator; nothing is pulled until the first `next`.
    pub fn new(config: HashJoinConfig, probe: P, build: B) -> Result<Self> {
        config.validate()?;
        let scope = AllocationScope::new(config.memory_limit_bytes);
        Ok(Self {
            config,
            probe,
            build,
            state: JoinState::Unstarted,
            scope,
            table: None,
            helper: MatchHelper::new(),
            container: HyperContainer::new(),
            engine: None,
            output_schema: None,
            current: None,
            failure: None,
            metrics: HashJoinMetrics::default(),
            schema_announced: false,
            upstream_killed: false,
            released: false,
        })
    }

    #[must_use]
    pub const fn state(&self) -> JoinState {
        self.state
    }

    #[must_use]
    pub const fn config(&self) -> &HashJoinConfig {
        &self.config
    }

    #[must_use]
    pub const fn metrics(&self) -> &HashJoinMetrics {
        &self.metrics
    }

    #[must_use]
    pub const fn scope(&self) -> &AllocationScope {
        &self.scope
    }

    #[must_use]
    pub const fn failure(&self) -> Option<&JoinError> {
        self.failure.as_ref()
    }

    #[must_use]
    pub const fn probe_source(&self) -> &P {
        &self.probe
    }

    #[must_use]
    pub const fn build_source(&self) -> &B {
        &self.build
    }

    /// Release everything and kill both inputs, unless already done.
    /// Idempotent; also runs on drop.
    pub fn close(&mut self) {
        if !self.state.is_terminal() {
            self.state = JoinState::Done;
        }
        self.teardown();
    }

    // ── Build phase ────────────────────────────────────────────────────────

    fn start(&mut self) -> Result<()> {
        let join_type = self.config.join_type;
        self.state = JoinState::Building;

        let probe_first = pull_batch(&mut self.probe, JoinSide::Probe)?;
        let probe_exhausted = probe_first.is_none();
        let probe_schema = probe_first
            .as_ref()
            .map(Batch::schema)
            .or_else(|| self.probe.schema().cloned());
        let build_first = pull_batch(&mut self.build, JoinSide::Build)?;

        let keys = self.run_build_phase(build_first, probe_schema.as_ref())?;
        if let Some(table) = &self.table {
            self.metrics.record_table_stats(&table.stats());
        }
        self.metrics.peak_memory_bytes = self.scope.peak();

        let output = build_output_schema(self.container.schema(), probe_schema.as_ref(), join_type);
        self.output_schema = Some(output.schema().clone());

        if self.container.row_count() == 0 && join_type == JoinType::Inner {
            debug!("build side empty for inner join; draining probe side");
            drop(probe_first);
            if !probe_exhausted {
                while pull_batch(&mut self.probe, JoinSide::Probe)?.is_some() {}
            }
            self.finish();
            return Ok(());
        }

        self.engine = Some(ProbeEngine::new(
            join_type,
            keys,
            output,
            self.config.output_batch_size,
            probe_schema,
            probe_first,
            probe_exhausted,
        ));
        self.state = JoinState::Probing;
        Ok(())
    }

    /// Drain the build input into the hash table, match helper, and
    /// accumulator. Returns the join keys resolved against the final schemas.
    fn run_build_phase(
        &mut self,
        first: Option<Batch>,
        probe_schema: Option<&Schema>,
    ) -> Result<KeyComparator> {
        let _span = debug_span!(
            "hash_join_build",
            join_type = ?self.config.join_type,
            min_buckets = self.config.min_hash_table_size,
        )
        .entered();

        let mut keys: Option<KeyComparator> = None;
        let mut pending = first;
        loop {
            let batch = match pending.take() {
                Some(batch) => batch,
                None => match pull_batch(&mut self.build, JoinSide::Build)? {
                    Some(batch) => batch,
                    None => break,
                },
            };
            if self.container.schema().is_none() {
                self.container.capture_schema(batch.schema())?;
            }
            if batch.row_count() == 0 {
                continue;
            }
            if self.container.num_batches() == 0
                && self
                    .container
                    .schema()
                    .is_some_and(|schema| !batch.matches_schema(schema))
            {
                // Only a leading empty batch can have set a different schema.
                self.container.capture_schema(batch.schema())?;
            }
            self.container.check_admissible(&batch)?;

            if self.table.is_none() {
                keys = Some(KeyComparator::resolve(
                    &self.config.conditions,
                    self.container.schema(),
                    probe_schema,
                )?);
                self.table = Some(
                    HashTable::try_new(
                        self.config.min_hash_table_size,
                        self.config.load_factor,
                        &mut self.scope,
                    )
                    .map_err(|error| match error {
                        PutError::RetryAfterSpill {
                            requested_bytes,
                            available_bytes,
                        } => JoinError::out_of_memory(
                            "hash table allocation",
                            requested_bytes,
                            available_bytes,
                        ),
                        other => put_failure(other),
                    })?,
                );
            }
            let resolved = keys
                .as_ref()
                .ok_or_else(|| JoinError::internal("join keys unresolved after table creation"))?;
            self.insert_build_batch(batch, resolved)?;
        }

        if self.container.schema().is_none() {
            if let Some(declared) = self.build.schema().cloned() {
                self.container.capture_schema(declared)?;
            }
        }

        debug!(
            build_batches = self.metrics.build_batches,
            build_rows = self.metrics.build_rows,
            buckets = self.table.as_ref().map_or(0, HashTable::bucket_count),
            resizes = self.table.as_ref().map_or(0, |table| table.stats().num_resizing),
            reserved_bytes = self.scope.reserved(),
            "build phase complete"
        );
        match keys {
            Some(keys) => Ok(keys),
            None => KeyComparator::resolve(
                &self.config.conditions,
                self.container.schema(),
                probe_schema,
            ),
        }
    }

    fn insert_build_batch(&mut self, batch: Batch, keys: &KeyComparator) -> Result<()> {
        let table = self
            .table
            .as_mut()
            .ok_or_else(|| JoinError::internal("build batch without a hash table"))?;
        let batch_index = self.container.next_batch_index();
        let rows = batch.row_count();
        for row in 0..rows {
            let slot = table
                .insert(keys.hash_build(&batch, row), &mut self.scope)
                .map_err(put_failure)?;
            let row_ref = RowRef::try_new(batch_index, row).ok_or_else(|| {
                JoinError::unsupported(JoinSide::Build, format!("row {row} is not addressable"))
            })?;
            self.helper.link(slot, row_ref, &mut self.scope)?;
        }
        self.container.absorb(batch, &mut self.scope)?;
        self.metrics.record_build_batch(rows);
        debug!(batch_index, rows, entries = table.len(), "build batch inserted");
        Ok(())
    }

    // ── Probe phase ────────────────────────────────────────────────────────

    fn pull_output(&mut self) -> IterOutcome {
        let Some(engine) = self.engine.as_mut() else {
            return self.fail(JoinError::internal("probing without a probe engine"));
        };
        let result = engine.probe_and_project(
            &mut self.probe,
            BuildSide {
                table: self.table.as_ref(),
                helper: &mut self.helper,
                container: &self.container,
            },
            &mut self.metrics,
        );
        match result {
            Ok(Some(batch)) => {
                self.metrics.record_output_batch(batch.row_count());
                self.current = Some(batch);
                if self.schema_announced {
                    IterOutcome::Ok
                } else {
                    self.schema_announced = true;
                    IterOutcome::OkNewSchema
                }
            }
            Ok(None) => {
                self.finish();
                IterOutcome::None
            }
            Err(error) => self.fail(error),
        }
    }

    // ── Teardown ───────────────────────────────────────────────────────────

    fn finish(&mut self) {
        self.state = JoinState::Done;
        self.teardown();
        debug!(
            probe_rows = self.metrics.probe_rows,
            output_batches = self.metrics.output_batches,
            output_rows = self.metrics.output_rows,
            peak_memory_bytes = self.metrics.peak_memory_bytes,
            "hash join complete"
        );
    }

    fn fail(&mut self, failure: JoinError) -> IterOutcome {
        error!(error = %failure, state = ?self.state, "hash join failed");
        self.failure = Some(failure);
        self.state = JoinState::Failed;
        self.teardown();
        IterOutcome::Failed
    }

    /// Release owned memory once and kill the inputs once, probe side first.
    fn teardown(&mut self) {
        if !self.released {
            self.released = true;
            if let Some(mut table) = self.table.take() {
                table.clear(&mut self.scope);
            }
            self.helper.clear(&mut self.scope);
            self.container.clear(&mut self.scope);
            self.engine = None;
            self.current = None;
            let leaked = self.scope.release_all();
            if leaked != 0 {
                warn!(leaked, "allocation scope not empty after teardown");
            }
            self.metrics.peak_memory_bytes = self.scope.peak();
        }
        if !self.upstream_killed {
            self.upstream_killed = true;
            self.probe.kill(true);
            self.build.kill(true);
        }
    }
}

impl<P: BatchSource, B: BatchSource> BatchSource for HashJoinOperator<P, B> {
    fn schema(&self) -> Option<&Schema> {
        self.output_schema.as_ref()
    }

    fn next(&mut self) -> IterOutcome {
        match self.state {
            JoinState::Unstarted => {
                if let Err(error) = self.start() {
                    return self.fail(error);
                }
                if self.state == JoinState::Done {
                    return IterOutcome::None;
                }
                self.pull_output()
            }
            JoinState::Probing => {
                self.current = None;
                self.pull_output()
            }
            JoinState::Building => {
                self.fail(JoinError::internal("pulled while the build phase was running"))
            }
            JoinState::Done => IterOutcome::None,
            JoinState::Failed => IterOutcome::Failed,
        }
    }

    fn record_count(&self) -> usize {
        self.current.as_ref().map_or(0, Batch::row_count)
    }

    fn batch(&self) -> Option<&Batch> {
        self.current.as_ref()
    }

    fn take_batch(&mut self) -> Option<Batch> {
        self.current.take()
    }

    /// Cancel the join. The next pull reports `Failed` with
    /// [`JoinError::Cancelled`]. Without `propagate_upstream` the inputs are
    /// left for the caller to stop.
    fn kill(&mut self, propagate_upstream: bool) {
        if !self.state.is_terminal() {
            debug!(state = ?self.state, "hash join killed");
            self.failure = Some(JoinError::Cancelled);
            self.state = JoinState::Failed;
        }
        if !propagate_upstream {
            self.upstream_killed = true;
        }
        self.teardown();
    }

    fn take_failure(&mut self) -> Option<JoinError> {
        self.failure.take()
    }
}

impl<P: BatchSource, B: BatchSource> Drop for HashJoinOperator<P, B> {
    fn drop(&mut self) {
        self.close();
    }
}
