//! Columnar batch model for vectorized operators.
//!
//! A [`Batch`] is an ordered set of typed column vectors that share one record
//! count. Batches are exchanged between operators by value: handing a batch to
//! a downstream consumer moves the `Arc`-backed buffers without copying them.

pub mod batch;
pub mod builder;
pub mod schema;
pub mod value;

pub use batch::{
    AlignedValues, Batch, BatchFormatError, Column, ColumnData, DEFAULT_BATCH_ROW_CAPACITY,
    DEFAULT_SIMD_ALIGNMENT_BYTES, NullBitmap, SelectionVector,
};
pub use builder::{ColumnBuilder, NullBitmapBuilder};
pub use schema::{ColumnSpec, ColumnVectorType, Schema};
pub use value::Value;
