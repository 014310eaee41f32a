//! Statically dispatched key and projection kernels.
//!
//! Key columns are grouped into a closed set of [`KeyFamily`] variants when
//! the join keys are resolved; each row is then hashed and compared through a
//! single `match` per key column. Output rows are written through one typed
//! [`ColumnBuilder`] per output column.

use smallvec::SmallVec;
use vjoin_error::{JoinError, JoinSide, Result};
use vjoin_types::{
    Batch, BatchFormatError, Column, ColumnBuilder, ColumnData, ColumnSpec, ColumnVectorType,
    DEFAULT_SIMD_ALIGNMENT_BYTES, Schema,
};
use xxhash_rust::xxh3::xxh3_64_with_seed;

use crate::config::{ComparatorKind, JoinCondition};
use crate::output_schema::OutputSchema;

const HASH_SEED: u64 = 0x9E37_79B9_7F4A_7C15;
const TAG_NULL: u64 = 0x01;
const TAG_INTEGER: u64 = 0x02;
const TAG_FLOAT: u64 = 0x03;
const TAG_BYTES: u64 = 0x04;

/// Comparable key type families. Columns of the same family join regardless
/// of physical width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyFamily {
    Integer,
    Float,
    Text,
    Binary,
}

impl KeyFamily {
    /// Family of `spec`, or `None` for types that cannot serve as join keys.
    #[must_use]
    pub const fn of(spec: &ColumnSpec) -> Option<Self> {
        match spec.vector_type {
            ColumnVectorType::Int8
            | ColumnVectorType::Int16
            | ColumnVectorType::Int32
            | ColumnVectorType::Int64 => Some(Self::Integer),
            ColumnVectorType::Float32 | ColumnVectorType::Float64 => Some(Self::Float),
            ColumnVectorType::Text => Some(Self::Text),
            ColumnVectorType::Binary => Some(Self::Binary),
            ColumnVectorType::Struct => None,
        }
    }
}

/// One resolved key column on one side of the join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyColumn {
    pub index: usize,
    pub family: KeyFamily,
}

/// Normalized key cell. Integers widen to `i64`; floats widen to `f64` and
/// fold `-0.0` onto `0.0` and every NaN onto one canonical NaN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyScalar<'a> {
    Null,
    Integer(i64),
    Float(u64),
    Bytes(&'a [u8]),
}

fn normalize_float(value: f64) -> u64 {
    if value.is_nan() {
        f64::NAN.to_bits()
    } else if value == 0.0 {
        0.0_f64.to_bits()
    } else {
        value.to_bits()
    }
}

fn key_scalar(column: &Column, row: usize) -> KeyScalar<'_> {
    if !column.validity.is_valid(row) {
        return KeyScalar::Null;
    }
    match &column.data {
        ColumnData::Int8(values) => KeyScalar::Integer(i64::from(values.as_slice()[row])),
        ColumnData::Int16(values) => KeyScalar::Integer(i64::from(values.as_slice()[row])),
        ColumnData::Int32(values) => KeyScalar::Integer(i64::from(values.as_slice()[row])),
        ColumnData::Int64(values) => KeyScalar::Integer(values.as_slice()[row]),
        ColumnData::Float32(values) => {
            KeyScalar::Float(normalize_float(f64::from(values.as_slice()[row])))
        }
        ColumnData::Float64(values) => KeyScalar::Float(normalize_float(values.as_slice()[row])),
        ColumnData::Binary { offsets, data } | ColumnData::Text { offsets, data } => {
            let start = offsets[row] as usize;
            let end = offsets[row + 1] as usize;
            KeyScalar::Bytes(&data[start..end])
        }
        // Rejected when keys are resolved.
        ColumnData::Struct { .. } => KeyScalar::Null,
    }
}

/// Hash the key tuple of `row`. Column order is significant.
#[must_use]
pub fn hash_key(columns: &[KeyColumn], batch: &Batch, row: usize) -> u32 {
    let mut acc = HASH_SEED;
    for key in columns {
        acc = match key_scalar(&batch.columns()[key.index], row) {
            KeyScalar::Null => xxh3_64_with_seed(&[], acc ^ TAG_NULL),
            KeyScalar::Integer(value) => xxh3_64_with_seed(&value.to_le_bytes(), acc ^ TAG_INTEGER),
            KeyScalar::Float(bits) => xxh3_64_with_seed(&bits.to_le_bytes(), acc ^ TAG_FLOAT),
            KeyScalar::Bytes(bytes) => xxh3_64_with_seed(bytes, acc ^ TAG_BYTES),
        };
    }
    (acc ^ (acc >> 32)) as u32
}

/// Resolved composite join key: one column per condition on each side plus
/// the comparator that decides equality for that pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyComparator {
    kinds: SmallVec<[ComparatorKind; 4]>,
    build: SmallVec<[KeyColumn; 4]>,
    probe: SmallVec<[KeyColumn; 4]>,
}

impl KeyComparator {
    /// Resolve `conditions` against whichever input schemas are known.
    ///
    /// A side without a schema has produced no batches and therefore never
    /// needs its key columns; its column list stays empty.
    pub fn resolve(
        conditions: &[JoinCondition],
        build: Option<&Schema>,
        probe: Option<&Schema>,
    ) -> Result<Self> {
        let kinds = conditions
            .iter()
            .map(|condition| condition.comparator)
            .collect();
        let build_keys = match build {
            Some(schema) => resolve_side(conditions, schema, JoinSide::Build)?,
            None => SmallVec::new(),
        };
        let probe_keys = match probe {
            Some(schema) => resolve_side(conditions, schema, JoinSide::Probe)?,
            None => SmallVec::new(),
        };
        if !build_keys.is_empty() && !probe_keys.is_empty() {
            for ((condition, build_key), probe_key) in
                conditions.iter().zip(&build_keys).zip(&probe_keys)
            {
                if build_key.family != probe_key.family {
                    return Err(JoinError::unsupported(
                        JoinSide::Probe,
                        format!(
                            "join key {} ({:?}) is not comparable with build key {} ({:?})",
                            condition.probe, probe_key.family, condition.build, build_key.family
                        ),
                    ));
                }
            }
        }
        Ok(Self {
            kinds,
            build: build_keys,
            probe: probe_keys,
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    #[must_use]
    pub fn build_columns(&self) -> &[KeyColumn] {
        &self.build
    }

    #[must_use]
    pub fn probe_columns(&self) -> &[KeyColumn] {
        &self.probe
    }

    #[must_use]
    pub fn hash_build(&self, batch: &Batch, row: usize) -> u32 {
        hash_key(&self.build, batch, row)
    }

    #[must_use]
    pub fn hash_probe(&self, batch: &Batch, row: usize) -> u32 {
        hash_key(&self.probe, batch, row)
    }

    /// False when some key of the probe row is NULL under a comparator that
    /// treats NULL as unequal to everything; such a row cannot match.
    #[must_use]
    pub fn probe_can_match(&self, batch: &Batch, row: usize) -> bool {
        self.probe.iter().zip(&self.kinds).all(|(key, kind)| {
            kind.nulls_equal() || batch.columns()[key.index].validity.is_valid(row)
        })
    }

    /// Exact key comparison between a probe row and a build row.
    #[must_use]
    pub fn keys_equal(
        &self,
        probe_batch: &Batch,
        probe_row: usize,
        build_batch: &Batch,
        build_row: usize,
    ) -> bool {
        self.probe
            .iter()
            .zip(&self.build)
            .zip(&self.kinds)
            .all(|((probe_key, build_key), kind)| {
                let left = key_scalar(&probe_batch.columns()[probe_key.index], probe_row);
                let right = key_scalar(&build_batch.columns()[build_key.index], build_row);
                match (left, right) {
                    (KeyScalar::Null, KeyScalar::Null) => kind.nulls_equal(),
                    (KeyScalar::Null, _) | (_, KeyScalar::Null) => false,
                    (left, right) => left == right,
                }
            })
    }
}

fn resolve_side(
    conditions: &[JoinCondition],
    schema: &Schema,
    side: JoinSide,
) -> Result<SmallVec<[KeyColumn; 4]>> {
    conditions
        .iter()
        .map(|condition| {
            let name = match side {
                JoinSide::Build => condition.build.as_str(),
                JoinSide::Probe => condition.probe.as_str(),
            };
            let index = schema.index_of(name).ok_or_else(|| {
                JoinError::unsupported(
                    side,
                    format!("join key column {name} not found in schema {schema}"),
                )
            })?;
            let spec = &schema.fields()[index];
            let family = KeyFamily::of(spec).ok_or_else(|| {
                JoinError::unsupported(
                    side,
                    format!("join key column {spec} has a type that cannot be compared"),
                )
            })?;
            Ok(KeyColumn { index, family })
        })
        .collect()
}

/// Writes joined rows (build columns then probe columns) into an output batch.
#[derive(Debug)]
pub struct ColumnWriter {
    builders: Vec<ColumnBuilder>,
    build_width: usize,
    rows: usize,
}

impl ColumnWriter {
    #[must_use]
    pub fn new(output: &OutputSchema, capacity: usize) -> Self {
        Self {
            builders: output
                .schema()
                .fields()
                .iter()
                .map(|spec| ColumnBuilder::new(spec, capacity))
                .collect(),
            build_width: output.build_width(),
            rows: 0,
        }
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.rows
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// Append one joined row. A missing side is written as absent values.
    pub fn append(
        &mut self,
        build: Option<(&Batch, usize)>,
        probe: Option<(&Batch, usize)>,
    ) -> std::result::Result<(), BatchFormatError> {
        let (build_builders, probe_builders) = self.builders.split_at_mut(self.build_width);
        write_side(build_builders, build)?;
        write_side(probe_builders, probe)?;
        self.rows += 1;
        Ok(())
    }

    /// Seal the written rows into a dense batch.
    pub fn finish(self) -> std::result::Result<Batch, BatchFormatError> {
        let columns = self
            .builders
            .into_iter()
            .map(|builder| builder.finish(DEFAULT_SIMD_ALIGNMENT_BYTES))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Batch::from_columns(columns)
    }
}

fn write_side(
    builders: &mut [ColumnBuilder],
    source: Option<(&Batch, usize)>,
) -> std::result::Result<(), BatchFormatError> {
    match source {
        Some((batch, row)) => {
            for (builder, column) in builders.iter_mut().zip(batch.columns()) {
                builder.push_from(column, row)?;
            }
        }
        None => builders.iter_mut().for_each(ColumnBuilder::push_absent),
    }
    Ok(())
}
