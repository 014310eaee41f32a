//! Resumable probe/project engine.
//!
//! Each call to [`ProbeEngine::probe_and_project`] fills at most one output
//! batch. When the batch fills mid-chain the [`ProbeCursor`] records where the
//! engine stopped (probe batch, probe row, chain slot, whether the row has
//! matched) and the next call continues from exactly that point, so a probe
//! row that fans out to many build rows can span several output batches.
//!
//! After the probe input ends, RIGHT and FULL joins walk the match helper
//! and emit every build row whose matched bit is still clear, once.

use tracing::{debug, trace};
use vjoin_error::{JoinError, JoinSide, Result};
use vjoin_types::{Batch, Schema};

use crate::config::JoinType;
use crate::hash_table::HashTable;
use crate::hyper_container::HyperContainer;
use crate::kernels::{ColumnWriter, KeyComparator};
use crate::match_helper::MatchHelper;
use crate::metrics::HashJoinMetrics;
use crate::output_schema::OutputSchema;
use crate::protocol::{BatchSource, pull_batch};

/// Position inside the candidate chain of the current probe row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChainPosition {
    /// The row has not been looked up yet.
    #[default]
    Start,
    /// Next candidate slot to examine.
    At(u32),
    /// Every candidate has been examined.
    Exhausted,
}

/// Stage of the probe/project engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProbePhase {
    /// Walking probe rows and their candidate chains.
    #[default]
    Probing,
    /// Emitting never-matched build rows, starting at `next_slot`.
    Unmatched { next_slot: u32 },
    /// Every output row has been emitted.
    Done,
}

/// Resume point of the probe/project engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProbeCursor {
    probe_batch_seq: u64,
    row: usize,
    hash: u32,
    chain: ChainPosition,
    row_matched: bool,
    phase: ProbePhase,
}

impl ProbeCursor {
    /// Sequence number of the current probe batch (1-based; 0 before any).
    #[must_use]
    pub const fn probe_batch_seq(&self) -> u64 {
        self.probe_batch_seq
    }

    #[must_use]
    pub const fn row(&self) -> usize {
        self.row
    }

    #[must_use]
    pub const fn chain(&self) -> ChainPosition {
        self.chain
    }

    #[must_use]
    pub const fn phase(&self) -> ProbePhase {
        self.phase
    }

    fn enter_batch(&mut self) {
        self.probe_batch_seq += 1;
        self.row = 0;
        self.reset_row();
    }

    fn advance_row(&mut self) {
        self.row += 1;
        self.reset_row();
    }

    fn reset_row(&mut self) {
        self.hash = 0;
        self.chain = ChainPosition::Start;
        self.row_matched = false;
    }
}

/// Build-side state visible to the probe phase.
#[derive(Debug)]
pub struct BuildSide<'a> {
    /// `None` when the build input produced no rows.
    pub table: Option<&'a HashTable>,
    pub helper: &'a mut MatchHelper,
    pub container: &'a HyperContainer,
}

#[derive(Debug)]
pub struct ProbeEngine {
    join_type: JoinType,
    keys: KeyComparator,
    output: OutputSchema,
    output_batch_size: usize,
    probe_schema: Option<Schema>,
    pending: Option<Batch>,
    current: Option<Batch>,
    probe_exhausted: bool,
    cursor: ProbeCursor,
}

impl ProbeEngine {
    /// `prefetched` is the first probe batch, pulled before the build phase;
    /// pass `None` with `probe_exhausted` when the probe input already ended.
    #[must_use]
    pub fn new(
        join_type: JoinType,
        keys: KeyComparator,
        output: OutputSchema,
        output_batch_size: usize,
        probe_schema: Option<Schema>,
        prefetched: Option<Batch>,
        probe_exhausted: bool,
    ) -> Self {
        Self {
            join_type,
            keys,
            output,
            output_batch_size,
            probe_schema,
            pending: prefetched,
            current: None,
            probe_exhausted,
            cursor: ProbeCursor::default(),
        }
    }

    #[must_use]
    pub const fn cursor(&self) -> &ProbeCursor {
        &self.cursor
    }

    #[must_use]
    pub const fn output(&self) -> &OutputSchema {
        &self.output
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.cursor.phase == ProbePhase::Done
    }

    /// Produce the next output batch, or `None` once every output row has been
    /// emitted.
    pub fn probe_and_project<S: BatchSource + ?Sized>(
        &mut self,
        probe: &mut S,
        mut build: BuildSide<'_>,
        metrics: &mut HashJoinMetrics,
    ) -> Result<Option<Batch>> {
        let cap = self.output_batch_size;
        let mut writer = ColumnWriter::new(&self.output, cap);
        trace!(cursor = ?self.cursor, "probe resume");
        while writer.len() < cap {
            match self.cursor.phase {
                ProbePhase::Probing => {
                    let needs_batch = self
                        .current
                        .as_ref()
                        .is_none_or(|batch| self.cursor.row >= batch.row_count());
                    if needs_batch {
                        self.current = self.next_probe_batch(probe, metrics)?;
                        if self.current.is_some() {
                            self.cursor.enter_batch();
                        } else {
                            self.finish_probing(&build);
                        }
                        continue;
                    }
                    self.probe_current_row(&mut writer, &mut build, cap)?;
                }
                ProbePhase::Unmatched { next_slot } => {
                    if let Some(slot) = build.helper.next_unmatched(next_slot) {
                        let row_ref = build.helper.row_ref(slot).ok_or_else(|| {
                            JoinError::internal(format!("unlinked build slot {slot}"))
                        })?;
                        let (batch, row) = build.container.row(row_ref)?;
                        writer.append(Some((batch, row)), None)?;
                        self.cursor.phase = ProbePhase::Unmatched {
                            next_slot: slot + 1,
                        };
                    } else {
                        self.cursor.phase = ProbePhase::Done;
                    }
                }
                ProbePhase::Done => break,
            }
        }
        if writer.is_empty() {
            return Ok(None);
        }
        Ok(Some(writer.finish()?))
    }

    fn finish_probing(&mut self, build: &BuildSide<'_>) {
        self.cursor.phase = if self.join_type.emits_unmatched_build() {
            ProbePhase::Unmatched { next_slot: 0 }
        } else {
            ProbePhase::Done
        };
        debug!(
            probe_batches = self.cursor.probe_batch_seq,
            build_rows = build.helper.len(),
            unmatched_build_rows = build.helper.len() - build.helper.matched_count(),
            emit_unmatched = self.join_type.emits_unmatched_build(),
            "probe side exhausted"
        );
    }

    fn probe_current_row(
        &mut self,
        writer: &mut ColumnWriter,
        build: &mut BuildSide<'_>,
        cap: usize,
    ) -> Result<()> {
        let Some(batch) = self.current.as_ref() else {
            return Err(JoinError::internal("probe row requested without a probe batch"));
        };
        let cursor = &mut self.cursor;
        let row = cursor.row;

        if cursor.chain == ChainPosition::Start {
            cursor.chain = match build.table {
                Some(table) if self.keys.probe_can_match(batch, row) => {
                    cursor.hash = self.keys.hash_probe(batch, row);
                    table
                        .first_candidate(cursor.hash)
                        .map_or(ChainPosition::Exhausted, ChainPosition::At)
                }
                _ => ChainPosition::Exhausted,
            };
        }

        while let ChainPosition::At(slot) = cursor.chain {
            if writer.len() >= cap {
                return Ok(());
            }
            let table = build
                .table
                .ok_or_else(|| JoinError::internal("probe chain without a hash table"))?;
            let row_ref = build
                .helper
                .row_ref(slot)
                .ok_or_else(|| JoinError::internal(format!("unlinked build slot {slot}")))?;
            let (build_batch, build_row) = build.container.row(row_ref)?;
            if self.keys.keys_equal(batch, row, build_batch, build_row) {
                writer.append(Some((build_batch, build_row)), Some((batch, row)))?;
                build.helper.mark_matched(slot);
                cursor.row_matched = true;
            }
            cursor.chain = table
                .next_candidate(slot, cursor.hash)
                .map_or(ChainPosition::Exhausted, ChainPosition::At);
        }

        if !cursor.row_matched && self.join_type.emits_unmatched_probe() {
            if writer.len() >= cap {
                return Ok(());
            }
            writer.append(None, Some((batch, row)))?;
        }
        cursor.advance_row();
        Ok(())
    }

    fn next_probe_batch<S: BatchSource + ?Sized>(
        &mut self,
        probe: &mut S,
        metrics: &mut HashJoinMetrics,
    ) -> Result<Option<Batch>> {
        loop {
            let batch = match self.pending.take() {
                Some(batch) => batch,
                None if self.probe_exhausted => return Ok(None),
                None => {
                    if let Some(batch) = pull_batch(probe, JoinSide::Probe)? {
                        batch
                    } else {
                        self.probe_exhausted = true;
                        return Ok(None);
                    }
                }
            };
            if batch.row_count() == 0 {
                continue;
            }
            self.admit(&batch)?;
            metrics.record_probe_batch(batch.row_count());
            return Ok(Some(batch));
        }
    }

    fn admit(&mut self, batch: &Batch) -> Result<()> {
        if !batch.is_dense() {
            return Err(JoinError::unsupported(
                JoinSide::Probe,
                "batches with a selection vector are not supported",
            ));
        }
        match &self.probe_schema {
            Some(expected) if !batch.matches_schema(expected) => Err(JoinError::schema_changed(
                JoinSide::Probe,
                expected,
                &batch.schema(),
            )),
            Some(_) => Ok(()),
            None => {
                self.probe_schema = Some(batch.schema());
                Ok(())
            }
        }
    }
}
