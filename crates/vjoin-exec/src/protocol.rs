//! Pull-based iterator protocol shared by operators.

use vjoin_error::{JoinError, JoinSide, Result};
use vjoin_types::{Batch, Schema};

/// Outcome of one [`BatchSource::next`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IterOutcome {
    /// A batch with the previously announced schema is available.
    Ok,
    /// A batch is available and its schema is new to the consumer.
    OkNewSchema,
    /// End of stream.
    None,
    /// Nothing available yet; pull again.
    NotYet,
    /// The source failed; see [`BatchSource::take_failure`].
    Failed,
}

impl IterOutcome {
    #[must_use]
    pub const fn has_batch(self) -> bool {
        matches!(self, Self::Ok | Self::OkNewSchema)
    }
}

/// A producer of batches driven by its consumer.
///
/// A source is pulled from one thread at a time. After [`IterOutcome::Ok`] or
/// [`IterOutcome::OkNewSchema`] the current batch is available through
/// [`batch`](Self::batch) or can be moved out with
/// [`take_batch`](Self::take_batch).
pub trait BatchSource {
    /// Schema of the batches produced so far, if any.
    fn schema(&self) -> Option<&Schema>;

    fn next(&mut self) -> IterOutcome;

    /// Rows in the current batch; zero when there is none.
    fn record_count(&self) -> usize;

    fn batch(&self) -> Option<&Batch>;

    fn take_batch(&mut self) -> Option<Batch>;

    /// Stop producing. With `propagate_upstream`, forward the kill to this
    /// source's own inputs.
    fn kill(&mut self, propagate_upstream: bool);

    /// Structured cause of the last [`IterOutcome::Failed`].
    fn take_failure(&mut self) -> Option<JoinError> {
        None
    }
}

impl<S: BatchSource + ?Sized> BatchSource for Box<S> {
    fn schema(&self) -> Option<&Schema> {
        (**self).schema()
    }

    fn next(&mut self) -> IterOutcome {
        (**self).next()
    }

    fn record_count(&self) -> usize {
        (**self).record_count()
    }

    fn batch(&self) -> Option<&Batch> {
        (**self).batch()
    }

    fn take_batch(&mut self) -> Option<Batch> {
        (**self).take_batch()
    }

    fn kill(&mut self, propagate_upstream: bool) {
        (**self).kill(propagate_upstream);
    }

    fn take_failure(&mut self) -> Option<JoinError> {
        (**self).take_failure()
    }
}

/// Pull `source` until it yields a batch, ends, or fails.
///
/// `NotYet` is retried immediately. Empty batches are returned as-is; the
/// caller decides whether to skip them.
pub fn pull_batch<S: BatchSource + ?Sized>(source: &mut S, side: JoinSide) -> Result<Option<Batch>> {
    loop {
        match source.next() {
            IterOutcome::Ok | IterOutcome::OkNewSchema => {
                return source.take_batch().map(Some).ok_or_else(|| {
                    JoinError::internal(format!("{side} source reported a batch but had none"))
                });
            }
            IterOutcome::NotYet => {}
            IterOutcome::None => return Ok(None),
            IterOutcome::Failed => {
                return Err(source
                    .take_failure()
                    .unwrap_or_else(|| JoinError::upstream(side, "upstream reported failure")));
            }
        }
    }
}
