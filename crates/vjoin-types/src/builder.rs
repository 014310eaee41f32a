//! Typed column builders.
//!
//! One builder variant exists per physical column type, so per-row appends
//! dispatch through a single `match` instead of dynamic trait objects.

use std::sync::Arc;

use crate::batch::{AlignedValues, BatchFormatError, Column, ColumnData, NullBitmap, var_slice};
use crate::schema::{ColumnSpec, ColumnVectorType};
use crate::value::Value;

/// Growable validity bitmap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NullBitmapBuilder {
    bytes: Vec<u8>,
    len: usize,
}

impl NullBitmapBuilder {
    #[must_use]
    pub fn with_capacity(len: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(len.div_ceil(8)),
            len: 0,
        }
    }

    pub fn push(&mut self, is_valid: bool) {
        let row_idx = self.len;
        let byte_idx = row_idx / 8;
        if byte_idx == self.bytes.len() {
            self.bytes.push(0);
        }
        if is_valid {
            self.bytes[byte_idx] |= 1_u8 << (row_idx % 8);
        }
        self.len += 1;
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
    pub fn finish(self) -> NullBitmap {
        NullBitmap::from_packed(self.bytes, self.len)
    }
}

/// Column under construction.
#[derive(Debug)]
pub enum ColumnBuilder {
    Int8(ColumnSpec, Vec<i8>, NullBitmapBuilder),
    Int16(ColumnSpec, Vec<i16>, NullBitmapBuilder),
    Int32(ColumnSpec, Vec<i32>, NullBitmapBuilder),
    Int64(ColumnSpec, Vec<i64>, NullBitmapBuilder),
    Float32(ColumnSpec, Vec<f32>, NullBitmapBuilder),
    Float64(ColumnSpec, Vec<f64>, NullBitmapBuilder),
    Binary(ColumnSpec, Vec<u32>, Vec<u8>, NullBitmapBuilder),
    Text(ColumnSpec, Vec<u32>, Vec<u8>, NullBitmapBuilder),
    Struct(ColumnSpec, Vec<ColumnBuilder>, NullBitmapBuilder),
}

macro_rules! copy_fixed {
    ($values:expr, $validity:expr, $src:expr, $row:expr, $valid:expr) => {{
        $values.push($src.as_slice()[$row]);
        $validity.push($valid);
    }};
}

impl ColumnBuilder {
    /// Create an empty builder for `spec`, reserving room for `row_capacity` rows.
    #[must_use]
    pub fn new(spec: &ColumnSpec, row_capacity: usize) -> Self {
        let spec = spec.clone();
        let validity = NullBitmapBuilder::with_capacity(row_capacity);
        match spec.vector_type {
            ColumnVectorType::Int8 => Self::Int8(spec, Vec::with_capacity(row_capacity), validity),
            ColumnVectorType::Int16 => {
                Self::Int16(spec, Vec::with_capacity(row_capacity), validity)
            }
            ColumnVectorType::Int32 => {
                Self::Int32(spec, Vec::with_capacity(row_capacity), validity)
            }
            ColumnVectorType::Int64 => {
                Self::Int64(spec, Vec::with_capacity(row_capacity), validity)
            }
            ColumnVectorType::Float32 => {
                Self::Float32(spec, Vec::with_capacity(row_capacity), validity)
            }
            ColumnVectorType::Float64 => {
                Self::Float64(spec, Vec::with_capacity(row_capacity), validity)
            }
            ColumnVectorType::Binary => Self::Binary(spec, vec![0_u32], Vec::new(), validity),
            ColumnVectorType::Text => Self::Text(spec, vec![0_u32], Vec::new(), validity),
            ColumnVectorType::Struct => {
                let children = spec
                    .children
                    .iter()
                    .map(|child| Self::new(child, row_capacity))
                    .collect();
                Self::Struct(spec, children, validity)
            }
        }
    }

    #[must_use]
    pub const fn spec(&self) -> &ColumnSpec {
        match self {
            Self::Int8(spec, ..)
            | Self::Int16(spec, ..)
            | Self::Int32(spec, ..)
            | Self::Int64(spec, ..)
            | Self::Float32(spec, ..)
            | Self::Float64(spec, ..)
            | Self::Binary(spec, ..)
            | Self::Text(spec, ..)
            | Self::Struct(spec, ..) => spec,
        }
    }

    const fn validity(&self) -> &NullBitmapBuilder {
        match self {
            Self::Int8(_, _, validity)
            | Self::Int16(_, _, validity)
            | Self::Int32(_, _, validity)
            | Self::Int64(_, _, validity)
            | Self::Float32(_, _, validity)
            | Self::Float64(_, _, validity)
            | Self::Binary(_, _, _, validity)
            | Self::Text(_, _, _, validity)
            | Self::Struct(_, _, validity) => validity,
        }
    }

    /// Rows appended so far.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.validity().len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append a NULL.
    ///
    /// # Errors
    ///
    /// Returns an error when the column is declared non-nullable.
    pub fn push_null(&mut self) -> Result<(), BatchFormatError> {
        if !self.spec().nullable {
            return Err(BatchFormatError::new(format!(
                "column {} is not nullable",
                self.spec().name
            )));
        }
        self.push_default(false);
        Ok(())
    }

    /// Append a placeholder for a row that has no source value.
    ///
    /// Nullable columns receive NULL. A non-nullable struct receives a present
    /// record whose children are themselves absent; a non-nullable scalar
    /// receives its zero value.
    pub fn push_absent(&mut self) {
        let valid = !self.spec().nullable;
        self.push_default(valid);
    }

    fn push_default(&mut self, valid: bool) {
        match self {
            Self::Int8(_, values, validity) => {
                values.push(0);
                validity.push(valid);
            }
            Self::Int16(_, values, validity) => {
                values.push(0);
                validity.push(valid);
            }
            Self::Int32(_, values, validity) => {
                values.push(0);
                validity.push(valid);
            }
            Self::Int64(_, values, validity) => {
                values.push(0);
                validity.push(valid);
            }
            Self::Float32(_, values, validity) => {
                values.push(0.0);
                validity.push(valid);
            }
            Self::Float64(_, values, validity) => {
                values.push(0.0);
                validity.push(valid);
            }
            Self::Binary(_, offsets, _, validity) | Self::Text(_, offsets, _, validity) => {
                offsets.push(*offsets.last().unwrap_or(&0));
                validity.push(valid);
            }
            Self::Struct(_, children, validity) => {
                for child in children {
                    child.push_absent();
                }
                validity.push(valid);
            }
        }
    }

    /// Append a row-oriented value, coercing it to the column's physical type.
    ///
    /// # Errors
    ///
    /// Returns an error on type mismatch, integer overflow, payload overflow,
    /// or NULL in a non-nullable column.
    pub fn push_value(&mut self, value: &Value, row_idx: usize) -> Result<(), BatchFormatError> {
        if value.is_null() {
            return self.push_null();
        }
        let spec_name = self.spec().name.clone();
        match (self, value) {
            (Self::Int8(_, values, validity), Value::Integer(i)) => {
                values.push(cast_integer::<i8>(*i, &spec_name, row_idx)?);
                validity.push(true);
            }
            (Self::Int16(_, values, validity), Value::Integer(i)) => {
                values.push(cast_integer::<i16>(*i, &spec_name, row_idx)?);
                validity.push(true);
            }
            (Self::Int32(_, values, validity), Value::Integer(i)) => {
                values.push(cast_integer::<i32>(*i, &spec_name, row_idx)?);
                validity.push(true);
            }
            (Self::Int64(_, values, validity), Value::Integer(i)) => {
                values.push(*i);
                validity.push(true);
            }
            (Self::Float32(_, values, validity), Value::Integer(i)) => {
                values.push(*i as f32);
                validity.push(true);
            }
            (Self::Float32(_, values, validity), Value::Float(v)) => {
                values.push(*v as f32);
                validity.push(true);
            }
            (Self::Float64(_, values, validity), Value::Integer(i)) => {
                values.push(*i as f64);
                validity.push(true);
            }
            (Self::Float64(_, values, validity), Value::Float(v)) => {
                values.push(*v);
                validity.push(true);
            }
            (Self::Binary(_, offsets, data, validity), Value::Blob(bytes)) => {
                push_var(offsets, data, bytes, &spec_name)?;
                validity.push(true);
            }
            (Self::Text(_, offsets, data, validity), Value::Text(text)) => {
                push_var(offsets, data, text.as_bytes(), &spec_name)?;
                validity.push(true);
            }
            (Self::Struct(_, children, validity), Value::Struct(fields)) => {
                if fields.len() != children.len() {
                    return Err(BatchFormatError::new(format!(
                        "struct width mismatch at row {row_idx}, column {spec_name} (expected {}, got {})",
                        children.len(),
                        fields.len()
                    )));
                }
                for (child, field) in children.iter_mut().zip(fields) {
                    child.push_value(field, row_idx)?;
                }
                validity.push(true);
            }
            (builder, _) => {
                return Err(BatchFormatError::new(format!(
                    "type mismatch at row {row_idx}, column {spec_name} (expected {:?}, got {})",
                    builder.spec().vector_type,
                    value.type_name()
                )));
            }
        }
        Ok(())
    }

    /// Copy row `row_idx` of `source` into this builder.
    ///
    /// The source must have the same physical type; nullability may differ as
    /// long as a NULL never lands in a non-nullable column.
    ///
    /// # Errors
    ///
    /// Returns an error on physical type mismatch or a NULL written into a
    /// non-nullable column.
    pub fn push_from(&mut self, source: &Column, row_idx: usize) -> Result<(), BatchFormatError> {
        let valid = source.validity.is_valid(row_idx);
        if !valid && !self.spec().nullable {
            return Err(BatchFormatError::new(format!(
                "column {} is not nullable but source {} row {row_idx} is NULL",
                self.spec().name,
                source.spec.name
            )));
        }
        match (self, &source.data) {
            (Self::Int8(_, values, validity), ColumnData::Int8(src)) => {
                copy_fixed!(values, validity, src, row_idx, valid);
            }
            (Self::Int16(_, values, validity), ColumnData::Int16(src)) => {
                copy_fixed!(values, validity, src, row_idx, valid);
            }
            (Self::Int32(_, values, validity), ColumnData::Int32(src)) => {
                copy_fixed!(values, validity, src, row_idx, valid);
            }
            (Self::Int64(_, values, validity), ColumnData::Int64(src)) => {
                copy_fixed!(values, validity, src, row_idx, valid);
            }
            (Self::Float32(_, values, validity), ColumnData::Float32(src)) => {
                copy_fixed!(values, validity, src, row_idx, valid);
            }
            (Self::Float64(_, values, validity), ColumnData::Float64(src)) => {
                copy_fixed!(values, validity, src, row_idx, valid);
            }
            (
                Self::Binary(spec, offsets, data, validity),
                ColumnData::Binary {
                    offsets: src_offsets,
                    data: src_data,
                },
            )
            | (
                Self::Text(spec, offsets, data, validity),
                ColumnData::Text {
                    offsets: src_offsets,
                    data: src_data,
                },
            ) => {
                push_var(
                    offsets,
                    data,
                    var_slice(src_offsets, src_data, row_idx),
                    &spec.name,
                )?;
                validity.push(valid);
            }
            (Self::Struct(spec, children, validity), ColumnData::Struct { children: src, .. }) => {
                if children.len() != src.len() {
                    return Err(BatchFormatError::new(format!(
                        "struct column {} has {} children, source has {}",
                        spec.name,
                        children.len(),
                        src.len()
                    )));
                }
                for (child, src_child) in children.iter_mut().zip(src) {
                    child.push_from(src_child, row_idx)?;
                }
                validity.push(valid);
            }
            (builder, _) => {
                return Err(BatchFormatError::new(format!(
                    "cannot copy column {} ({:?}) into column {} ({:?})",
                    source.spec.name,
                    source.spec.vector_type,
                    builder.spec().name,
                    builder.spec().vector_type
                )));
            }
        }
        Ok(())
    }

    /// Seal the builder into an immutable column.
    ///
    /// # Errors
    ///
    /// Returns an error when `alignment` is not a power of two.
    pub fn finish(self, alignment: usize) -> Result<Column, BatchFormatError> {
        let column = match self {
            Self::Int8(spec, values, validity) => Column {
                spec,
                data: ColumnData::Int8(AlignedValues::from_vec(values, alignment)?),
                validity: validity.finish(),
            },
            Self::Int16(spec, values, validity) => Column {
                spec,
                data: ColumnData::Int16(AlignedValues::from_vec(values, alignment)?),
                validity: validity.finish(),
            },
            Self::Int32(spec, values, validity) => Column {
                spec,
                data: ColumnData::Int32(AlignedValues::from_vec(values, alignment)?),
                validity: validity.finish(),
            },
            Self::Int64(spec, values, validity) => Column {
                spec,
                data: ColumnData::Int64(AlignedValues::from_vec(values, alignment)?),
                validity: validity.finish(),
            },
            Self::Float32(spec, values, validity) => Column {
                spec,
                data: ColumnData::Float32(AlignedValues::from_vec(values, alignment)?),
                validity: validity.finish(),
            },
            Self::Float64(spec, values, validity) => Column {
                spec,
                data: ColumnData::Float64(AlignedValues::from_vec(values, alignment)?),
                validity: validity.finish(),
            },
            Self::Binary(spec, offsets, data, validity) => Column {
                spec,
                data: ColumnData::Binary {
                    offsets: Arc::from(offsets),
                    data: Arc::from(data),
                },
                validity: validity.finish(),
            },
            Self::Text(spec, offsets, data, validity) => Column {
                spec,
                data: ColumnData::Text {
                    offsets: Arc::from(offsets),
                    data: Arc::from(data),
                },
                validity: validity.finish(),
            },
            Self::Struct(spec, children, validity) => {
                let len = validity.len();
                let children = children
                    .into_iter()
                    .map(|child| child.finish(alignment))
                    .collect::<Result<Vec<_>, _>>()?;
                Column {
                    spec,
                    data: ColumnData::Struct { len, children },
                    validity: validity.finish(),
                }
            }
        };
        Ok(column)
    }
}

fn push_var(
    offsets: &mut Vec<u32>,
    data: &mut Vec<u8>,
    bytes: &[u8],
    column: &str,
) -> Result<(), BatchFormatError> {
    data.extend_from_slice(bytes);
    let next_offset = u32::try_from(data.len()).map_err(|_| {
        BatchFormatError::new(format!("column {column} exceeds 4 GiB payload"))
    })?;
    offsets.push(next_offset);
    Ok(())
}

fn cast_integer<T>(value: i64, column: &str, row_idx: usize) -> Result<T, BatchFormatError>
where
    T: TryFrom<i64>,
{
    T::try_from(value).map_err(|_| {
        BatchFormatError::new(format!(
            "integer out of range at row {row_idx}, column {column} value={value}"
        ))
    })
}
