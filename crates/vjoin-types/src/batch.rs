//! Columnar batch container exchanged between operators.
//!
//! The batch model is:
//! - columnar data buffers (one per column),
//! - validity bitmap (1 bit per row),
//! - an optional selection vector marking active rows of a filtered batch.
//!
//! Buffers are `Arc`-backed so cloning or moving a batch between operators
//! never copies column data.

use std::fmt;
use std::sync::Arc;

use crate::builder::ColumnBuilder;
use crate::schema::{ColumnSpec, Schema};
use crate::value::Value;

/// Default number of rows in a vectorized batch.
pub const DEFAULT_BATCH_ROW_CAPACITY: usize = 1_024;
/// Default SIMD alignment target for fixed-width value buffers.
pub const DEFAULT_SIMD_ALIGNMENT_BYTES: usize = 32;

/// Error type for batch construction and conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFormatError {
    message: String,
}

impl BatchFormatError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for BatchFormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for BatchFormatError {}

/// Fixed-width typed data with explicit alignment metadata.
#[derive(Clone)]
pub struct AlignedValues<T> {
    values: Arc<[T]>,
    alignment: usize,
}

impl<T> fmt::Debug for AlignedValues<T>
where
    T: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlignedValues")
            .field("len", &self.values.len())
            .field("alignment", &self.alignment)
            .field("values", &self.values)
            .finish()
    }
}

impl<T> PartialEq for AlignedValues<T>
where
    T: PartialEq,
{
    fn eq(&self, other: &Self) -> bool {
        self.alignment == other.alignment && self.as_slice() == other.as_slice()
    }
}

impl<T> AlignedValues<T> {
    /// Create aligned values from a typed vector.
    pub fn from_vec(values: Vec<T>, alignment: usize) -> Result<Self, BatchFormatError> {
        let required_alignment = alignment.max(std::mem::align_of::<T>());
        if !required_alignment.is_power_of_two() {
            return Err(BatchFormatError::new(format!(
                "alignment must be power-of-two, got {required_alignment}"
            )));
        }

        Ok(Self {
            values: Arc::from(values),
            alignment: required_alignment,
        })
    }

    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        &self.values
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Declared alignment contract for this buffer.
    #[must_use]
    pub const fn alignment(&self) -> usize {
        self.alignment
    }

    /// Returns true when both handles share the same backing storage.
    #[must_use]
    pub fn shares_storage(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.values, &other.values)
    }

    fn byte_size(&self) -> usize {
        std::mem::size_of_val(self.as_slice())
    }
}

/// Packed null-validity bitmap (1 bit per row, 1 means value present).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NullBitmap {
    bytes: Arc<[u8]>,
    len: usize,
}

impl NullBitmap {
    /// Create an all-valid bitmap.
    #[must_use]
    pub fn all_valid(len: usize) -> Self {
        let byte_len = len.div_ceil(8);
        Self {
            bytes: Arc::from(vec![0xFF; byte_len]),
            len,
        }
    }

    /// Create from raw bitmap bytes.
    pub fn from_bytes(bytes: Arc<[u8]>, len: usize) -> Result<Self, BatchFormatError> {
        let expected = len.div_ceil(8);
        if bytes.len() < expected {
            return Err(BatchFormatError::new(format!(
                "validity bitmap too short: expected at least {expected} bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Self { bytes, len })
    }

    pub(crate) fn from_packed(bytes: Vec<u8>, len: usize) -> Self {
        debug_assert!(bytes.len() >= len.div_ceil(8));
        Self {
            bytes: Arc::from(bytes),
            len,
        }
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Returns true when row is valid (non-NULL).
    #[must_use]
    pub fn is_valid(&self, row_idx: usize) -> bool {
        if row_idx >= self.len {
            return false;
        }
        let byte = self.bytes[row_idx / 8];
        let bit = row_idx % 8;
        ((byte >> bit) & 1) == 1
    }

    /// Number of NULL rows.
    #[must_use]
    pub fn null_count(&self) -> usize {
        (0..self.len).filter(|&row| !self.is_valid(row)).count()
    }
}

/// Active row mask for predicate pushdown without copying rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionVector {
    indices: Arc<[u16]>,
}

impl SelectionVector {
    /// Identity selection: every row is active in row order.
    pub fn identity(row_count: usize) -> Result<Self, BatchFormatError> {
        let mut values = Vec::with_capacity(row_count);
        for idx in 0..row_count {
            let converted = u16::try_from(idx).map_err(|_| {
                BatchFormatError::new(format!(
                    "row index {idx} does not fit into selection vector entry"
                ))
            })?;
            values.push(converted);
        }
        Ok(Self {
            indices: Arc::from(values),
        })
    }

    /// Create from explicit row indices.
    #[must_use]
    pub fn from_indices(indices: Vec<u16>) -> Self {
        Self {
            indices: Arc::from(indices),
        }
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u16] {
        &self.indices
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Column payload in columnar form.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Int8(AlignedValues<i8>),
    Int16(AlignedValues<i16>),
    Int32(AlignedValues<i32>),
    Int64(AlignedValues<i64>),
    Float32(AlignedValues<f32>),
    Float64(AlignedValues<f64>),
    Binary {
        offsets: Arc<[u32]>,
        data: Arc<[u8]>,
    },
    Text {
        offsets: Arc<[u32]>,
        data: Arc<[u8]>,
    },
    Struct {
        len: usize,
        children: Vec<Column>,
    },
}

impl ColumnData {
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Int8(values) => values.len(),
            Self::Int16(values) => values.len(),
            Self::Int32(values) => values.len(),
            Self::Int64(values) => values.len(),
            Self::Float32(values) => values.len(),
            Self::Float64(values) => values.len(),
            Self::Binary { offsets, .. } | Self::Text { offsets, .. } => {
                offsets.len().saturating_sub(1)
            }
            Self::Struct { len, .. } => *len,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes held by the value buffers (validity excluded).
    #[must_use]
    pub fn byte_size(&self) -> usize {
        match self {
            Self::Int8(values) => values.byte_size(),
            Self::Int16(values) => values.byte_size(),
            Self::Int32(values) => values.byte_size(),
            Self::Int64(values) => values.byte_size(),
            Self::Float32(values) => values.byte_size(),
            Self::Float64(values) => values.byte_size(),
            Self::Binary { offsets, data } | Self::Text { offsets, data } => {
                offsets.len() * std::mem::size_of::<u32>() + data.len()
            }
            Self::Struct { children, .. } => children.iter().map(Column::memory_size).sum(),
        }
    }
}

/// Borrow the variable-width payload of row `row_idx`.
pub(crate) fn var_slice<'a>(offsets: &[u32], data: &'a [u8], row_idx: usize) -> &'a [u8] {
    let start = offsets[row_idx] as usize;
    let end = offsets[row_idx + 1] as usize;
    &data[start..end]
}

/// A typed column with validity bitmap.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub spec: ColumnSpec,
    pub data: ColumnData,
    pub validity: NullBitmap,
}

impl Column {
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn is_valid(&self, row_idx: usize) -> bool {
        self.validity.is_valid(row_idx)
    }

    /// Buffer bytes owned by this column, including the validity bitmap.
    #[must_use]
    pub fn memory_size(&self) -> usize {
        self.data.byte_size() + self.validity.as_bytes().len()
    }

    /// Materialize one cell as a row-oriented value.
    #[must_use]
    pub fn value_at(&self, row_idx: usize) -> Value {
        if !self.validity.is_valid(row_idx) {
            return Value::Null;
        }
        match &self.data {
            ColumnData::Int8(values) => Value::Integer(i64::from(values.as_slice()[row_idx])),
            ColumnData::Int16(values) => Value::Integer(i64::from(values.as_slice()[row_idx])),
            ColumnData::Int32(values) => Value::Integer(i64::from(values.as_slice()[row_idx])),
            ColumnData::Int64(values) => Value::Integer(values.as_slice()[row_idx]),
            ColumnData::Float32(values) => Value::Float(f64::from(values.as_slice()[row_idx])),
            ColumnData::Float64(values) => Value::Float(values.as_slice()[row_idx]),
            ColumnData::Binary { offsets, data } => {
                Value::Blob(var_slice(offsets, data, row_idx).to_vec())
            }
            ColumnData::Text { offsets, data } => Value::Text(
                String::from_utf8_lossy(var_slice(offsets, data, row_idx)).into_owned(),
            ),
            ColumnData::Struct { children, .. } => Value::Struct(
                children
                    .iter()
                    .map(|child| child.value_at(row_idx))
                    .collect(),
            ),
        }
    }
}

/// Vectorized batch container exchanged between operators.
///
/// A batch without a selection vector is *dense*: every physical row is
/// active. Operators that cannot honor indirection reject non-dense batches.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    row_count: usize,
    capacity: usize,
    columns: Vec<Column>,
    selection: Option<SelectionVector>,
}

impl Batch {
    /// Build a columnar batch from row-oriented values.
    ///
    /// # Errors
    ///
    /// Returns an error when row width mismatches schema, when values fail type
    /// coercion/range/nullability checks, or when row count exceeds capacity.
    pub fn from_rows(
        rows: &[Vec<Value>],
        specs: &[ColumnSpec],
        capacity: usize,
    ) -> Result<Self, BatchFormatError> {
        if rows.len() > capacity {
            return Err(BatchFormatError::new(format!(
                "row count {} exceeds capacity {capacity}",
                rows.len()
            )));
        }

        let mut builders: Vec<ColumnBuilder> = specs
            .iter()
            .map(|spec| ColumnBuilder::new(spec, rows.len()))
            .collect();
        for (row_idx, row) in rows.iter().enumerate() {
            if row.len() != specs.len() {
                return Err(BatchFormatError::new(format!(
                    "row {row_idx} width {} does not match schema width {}",
                    row.len(),
                    specs.len()
                )));
            }
            for (builder, value) in builders.iter_mut().zip(row) {
                builder.push_value(value, row_idx)?;
            }
        }

        let columns = builders
            .into_iter()
            .map(|builder| builder.finish(DEFAULT_SIMD_ALIGNMENT_BYTES))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            row_count: rows.len(),
            capacity,
            columns,
            selection: None,
        })
    }

    /// Assemble a dense batch from finished columns.
    ///
    /// # Errors
    ///
    /// Returns an error when the columns disagree on length.
    pub fn from_columns(columns: Vec<Column>) -> Result<Self, BatchFormatError> {
        let row_count = columns.first().map_or(0, Column::len);
        for column in &columns {
            if column.len() != row_count || column.validity.len() != row_count {
                return Err(BatchFormatError::new(format!(
                    "column {} has length {} but batch has {row_count} rows",
                    column.spec.name,
                    column.len()
                )));
            }
        }
        Ok(Self {
            row_count,
            capacity: row_count,
            columns,
            selection: None,
        })
    }

    /// Zero-row batch carrying only a schema.
    ///
    /// # Errors
    ///
    /// Propagates builder finalization errors.
    pub fn empty(specs: &[ColumnSpec]) -> Result<Self, BatchFormatError> {
        Self::from_rows(&[], specs, 0)
    }

    /// Attach a selection vector, making the batch non-dense.
    ///
    /// # Errors
    ///
    /// Returns an error when a selected index is out of range.
    pub fn with_selection(mut self, selection: SelectionVector) -> Result<Self, BatchFormatError> {
        if let Some(bad) = selection
            .as_slice()
            .iter()
            .find(|&&idx| usize::from(idx) >= self.row_count)
        {
            return Err(BatchFormatError::new(format!(
                "selection index {bad} out of range for {} rows",
                self.row_count
            )));
        }
        self.selection = Some(selection);
        Ok(self)
    }

    /// Number of physical rows in this batch.
    #[must_use]
    pub const fn row_count(&self) -> usize {
        self.row_count
    }

    /// Number of active rows, honoring the selection vector.
    #[must_use]
    pub fn active_row_count(&self) -> usize {
        self.selection
            .as_ref()
            .map_or(self.row_count, SelectionVector::len)
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    #[must_use]
    pub fn column(&self, idx: usize) -> Option<&Column> {
        self.columns.get(idx)
    }

    #[must_use]
    pub const fn selection(&self) -> Option<&SelectionVector> {
        self.selection.as_ref()
    }

    #[must_use]
    pub const fn is_dense(&self) -> bool {
        self.selection.is_none()
    }

    #[must_use]
    pub fn schema(&self) -> Schema {
        Schema::new(self.columns.iter().map(|column| column.spec.clone()).collect())
    }

    /// Whether this batch's column layout equals `schema` without cloning specs.
    #[must_use]
    pub fn matches_schema(&self, schema: &Schema) -> bool {
        self.columns.len() == schema.len()
            && self
                .columns
                .iter()
                .zip(schema.fields())
                .all(|(column, spec)| &column.spec == spec)
    }

    /// Total buffer bytes referenced by this batch.
    #[must_use]
    pub fn memory_size(&self) -> usize {
        self.columns.iter().map(Column::memory_size).sum::<usize>()
            + self
                .selection
                .as_ref()
                .map_or(0, |selection| selection.len() * std::mem::size_of::<u16>())
    }

    /// Materialize the active rows as row-oriented values.
    #[must_use]
    pub fn to_rows(&self) -> Vec<Vec<Value>> {
        let materialize = |row_idx: usize| {
            self.columns
                .iter()
                .map(|column| column.value_at(row_idx))
                .collect::<Vec<_>>()
        };
        match &self.selection {
            Some(selection) => selection
                .as_slice()
                .iter()
                .map(|&idx| materialize(usize::from(idx)))
                .collect(),
            None => (0..self.row_count).map(materialize).collect(),
        }
    }
}
