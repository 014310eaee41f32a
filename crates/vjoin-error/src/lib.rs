//! Structured error taxonomy for the hash-join operator.
//!
//! Every variant is terminal at the operator layer: once an operator surfaces
//! a [`JoinError`] it transitions to its failed state, tears down owned memory,
//! and kills its upstream sources. Nothing here is retried locally.

use std::fmt;

use thiserror::Error;
use vjoin_types::BatchFormatError;

/// Which input of a binary operator an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinSide {
    Build,
    Probe,
}

impl fmt::Display for JoinSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Build => "build",
            Self::Probe => "probe",
        })
    }
}

/// Error surfaced by the hash-join operator and its components.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JoinError {
    /// An input produced a batch whose schema differs from the one captured
    /// from its first batch.
    #[error("{side} side schema changed: expected {expected}, got {actual}")]
    SchemaChanged {
        side: JoinSide,
        expected: String,
        actual: String,
    },

    /// An input batch uses a layout this operator cannot consume, such as a
    /// selection vector, an oversized build batch, or incomparable key types.
    #[error("unsupported {side} input: {detail}")]
    UnsupportedInput { side: JoinSide, detail: String },

    /// The allocation scope refused a reservation.
    ///
    /// Lower-layer "retry after spill" signals are reported here as well;
    /// spilling is not implemented.
    #[error(
        "out of memory during {operation}: requested {requested_bytes} bytes, {available_bytes} available"
    )]
    OutOfMemory {
        operation: &'static str,
        requested_bytes: u64,
        available_bytes: u64,
    },

    /// The operator was killed and pulled again.
    #[error("operation cancelled")]
    Cancelled,

    /// An upstream source reported failure.
    #[error("{side} source failed: {detail}")]
    UpstreamFailed { side: JoinSide, detail: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("batch format error: {0}")]
    Batch(#[from] BatchFormatError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl JoinError {
    #[must_use]
    pub fn internal(detail: impl Into<String>) -> Self {
        Self::Internal(detail.into())
    }

    #[must_use]
    pub fn invalid_config(detail: impl Into<String>) -> Self {
        Self::InvalidConfig(detail.into())
    }

    #[must_use]
    pub fn schema_changed(
        side: JoinSide,
        expected: &impl fmt::Display,
        actual: &impl fmt::Display,
    ) -> Self {
        Self::SchemaChanged {
            side,
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    #[must_use]
    pub fn unsupported(side: JoinSide, detail: impl Into<String>) -> Self {
        Self::UnsupportedInput {
            side,
            detail: detail.into(),
        }
    }

    #[must_use]
    pub const fn out_of_memory(
        operation: &'static str,
        requested_bytes: u64,
        available_bytes: u64,
    ) -> Self {
        Self::OutOfMemory {
            operation,
            requested_bytes,
            available_bytes,
        }
    }

    #[must_use]
    pub fn upstream(side: JoinSide, detail: impl Into<String>) -> Self {
        Self::UpstreamFailed {
            side,
            detail: detail.into(),
        }
    }

    /// All join errors are terminal; the operator never retries.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        true
    }

    /// Input side this error is attributed to, when there is one.
    #[must_use]
    pub const fn side(&self) -> Option<JoinSide> {
        match self {
            Self::SchemaChanged { side, .. }
            | Self::UnsupportedInput { side, .. }
            | Self::UpstreamFailed { side, .. } => Some(*side),
            _ => None,
        }
    }
}

/// Result alias used throughout the join crates.
pub type Result<T> = std::result::Result<T, JoinError>;
