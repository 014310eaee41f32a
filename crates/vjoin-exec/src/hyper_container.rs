//! Accumulated build-side batches.
//!
//! The container owns every absorbed build batch for the lifetime of the
//! probe phase and resolves [`RowRef`]s back to `(batch, row)` pairs.
//! Absorption moves the batch in; column buffers are never copied.

use tracing::trace;
use vjoin_error::{JoinError, JoinSide, Result};
use vjoin_types::{Batch, Schema};

use crate::memory::AllocationScope;
use crate::row_ref::{MAX_ROWS_PER_BATCH, RowRef};

#[derive(Debug, Default)]
pub struct HyperContainer {
    schema: Option<Schema>,
    batches: Vec<Batch>,
    row_count: usize,
    reserved_bytes: usize,
}

impl HyperContainer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build schema, once one has been captured.
    #[must_use]
    pub const fn schema(&self) -> Option<&Schema> {
        self.schema.as_ref()
    }

    /// Capture `schema` as the build schema.
    ///
    /// Replacing an earlier schema is only allowed while no batch has been
    /// absorbed; a leading empty batch may carry a schema that a later
    /// non-empty batch supersedes.
    pub fn capture_schema(&mut self, schema: Schema) -> Result<()> {
        if !self.batches.is_empty() {
            return Err(JoinError::internal(
                "build schema cannot change after batches were absorbed",
            ));
        }
        self.schema = Some(schema);
        Ok(())
    }

    /// Check that `batch` may be absorbed without violating container
    /// invariants.
    pub fn check_admissible(&self, batch: &Batch) -> Result<()> {
        if !batch.is_dense() {
            return Err(JoinError::unsupported(
                JoinSide::Build,
                "batches with a selection vector are not supported",
            ));
        }
        if batch.row_count() > MAX_ROWS_PER_BATCH {
            return Err(JoinError::unsupported(
                JoinSide::Build,
                format!(
                    "build batch has {} rows, limit is {MAX_ROWS_PER_BATCH}",
                    batch.row_count()
                ),
            ));
        }
        match &self.schema {
            Some(expected) if !batch.matches_schema(expected) => Err(JoinError::schema_changed(
                JoinSide::Build,
                expected,
                &batch.schema(),
            )),
            _ => Ok(()),
        }
    }

    /// Index the next absorbed batch will receive.
    #[must_use]
    pub fn next_batch_index(&self) -> u32 {
        // Bounded by absorb.
        self.batches.len() as u32
    }

    /// Take ownership of `batch`; returns its batch index.
    pub fn absorb(&mut self, batch: Batch, scope: &mut AllocationScope) -> Result<u32> {
        self.check_admissible(&batch)?;
        let index = u32::try_from(self.batches.len()).map_err(|_| {
            JoinError::unsupported(JoinSide::Build, "too many build batches for row addressing")
        })?;
        let bytes = batch.memory_size();
        scope
            .try_reserve(bytes)
            .map_err(|error| error.into_join_error("build batch absorb"))?;
        if self.schema.is_none() {
            self.schema = Some(batch.schema());
        }
        self.reserved_bytes += bytes;
        self.row_count += batch.row_count();
        trace!(batch_index = index, rows = batch.row_count(), bytes, "build batch absorbed");
        self.batches.push(batch);
        Ok(index)
    }

    #[must_use]
    pub fn num_batches(&self) -> usize {
        self.batches.len()
    }

    #[must_use]
    pub const fn row_count(&self) -> usize {
        self.row_count
    }

    #[must_use]
    pub fn batch(&self, index: u32) -> Option<&Batch> {
        self.batches.get(index as usize)
    }

    /// Resolve `row_ref` to its batch and in-batch row.
    pub fn row(&self, row_ref: RowRef) -> Result<(&Batch, usize)> {
        self.batch(row_ref.batch_index)
            .filter(|batch| row_ref.row() < batch.row_count())
            .map(|batch| (batch, row_ref.row()))
            .ok_or_else(|| JoinError::internal(format!("dangling build row reference {row_ref}")))
    }

    /// Drop every batch and return the accounted memory.
    pub fn clear(&mut self, scope: &mut AllocationScope) {
        scope.release(self.reserved_bytes);
        self.reserved_bytes = 0;
        self.row_count = 0;
        self.batches = Vec::new();
    }
}
