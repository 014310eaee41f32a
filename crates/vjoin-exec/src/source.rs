//! In-memory scripted [`BatchSource`].
//!
//! Replays a fixed sequence of batches, `NotYet` stalls, and failures. Used as
//! the upstream of the hash join in tests and benchmarks.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use vjoin_error::JoinError;
use vjoin_types::{Batch, Schema};

use crate::protocol::{BatchSource, IterOutcome};

/// One scripted outcome.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Batch(Batch),
    NotYet,
    Fail(JoinError),
}

/// Shared record of kill signals, in arrival order, labelled by source.
pub type KillLog = Arc<Mutex<Vec<String>>>;

#[derive(Debug)]
pub struct ScriptedSource {
    label: String,
    steps: VecDeque<ScriptStep>,
    schema: Option<Schema>,
    current: Option<Batch>,
    failure: Option<JoinError>,
    killed: bool,
    kill_count: usize,
    kill_log: Option<KillLog>,
    pulls: usize,
}

impl ScriptedSource {
    #[must_use]
    pub fn new(label: impl Into<String>, steps: Vec<ScriptStep>) -> Self {
        Self {
            label: label.into(),
            steps: steps.into(),
            schema: None,
            current: None,
            failure: None,
            killed: false,
            kill_count: 0,
            kill_log: None,
            pulls: 0,
        }
    }

    /// Source that yields `batches` in order and then ends.
    #[must_use]
    pub fn from_batches(label: impl Into<String>, batches: Vec<Batch>) -> Self {
        Self::new(label, batches.into_iter().map(ScriptStep::Batch).collect())
    }

    /// Declare a schema before any batch is produced, like an upstream whose
    /// output shape is known at plan time.
    #[must_use]
    pub fn with_schema(mut self, schema: Schema) -> Self {
        self.schema = Some(schema);
        self
    }

    #[must_use]
    pub fn with_kill_log(mut self, log: KillLog) -> Self {
        self.kill_log = Some(log);
        self
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[must_use]
    pub const fn kill_count(&self) -> usize {
        self.kill_count
    }

    #[must_use]
    pub const fn is_killed(&self) -> bool {
        self.killed
    }

    /// Every scripted step has been consumed.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.steps.is_empty()
    }

    /// Number of `next` calls observed.
    #[must_use]
    pub const fn pulls(&self) -> usize {
        self.pulls
    }
}

impl BatchSource for ScriptedSource {
    fn schema(&self) -> Option<&Schema> {
        self.schema.as_ref()
    }

    fn next(&mut self) -> IterOutcome {
        self.pulls += 1;
        self.current = None;
        if self.killed {
            return IterOutcome::None;
        }
        match self.steps.pop_front() {
            Some(ScriptStep::Batch(batch)) => {
                let new_schema = !self
                    .schema
                    .as_ref()
                    .is_some_and(|schema| batch.matches_schema(schema));
                if new_schema {
                    self.schema = Some(batch.schema());
                }
                self.current = Some(batch);
                if new_schema {
                    IterOutcome::OkNewSchema
                } else {
                    IterOutcome::Ok
                }
            }
            Some(ScriptStep::NotYet) => IterOutcome::NotYet,
            Some(ScriptStep::Fail(error)) => {
                self.failure = Some(error);
                IterOutcome::Failed
            }
            None => IterOutcome::None,
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

    fn kill(&mut self, _propagate_upstream: bool) {
        self.killed = true;
        self.kill_count += 1;
        self.current = None;
        if let Some(log) = &self.kill_log {
            log.lock().push(self.label.clone());
        }
    }

    fn take_failure(&mut self) -> Option<JoinError> {
        self.failure.take()
    }
}
