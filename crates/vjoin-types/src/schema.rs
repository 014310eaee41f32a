//! Column specifications and batch schemas.

use std::fmt;

/// Physical storage type for a vectorized column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnVectorType {
    Int8,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    Binary,
    Text,
    /// Composite record; the field layout lives in [`ColumnSpec::children`].
    Struct,
}

impl ColumnVectorType {
    #[must_use]
    pub const fn is_integer(self) -> bool {
        matches!(self, Self::Int8 | Self::Int16 | Self::Int32 | Self::Int64)
    }

    #[must_use]
    pub const fn is_float(self) -> bool {
        matches!(self, Self::Float32 | Self::Float64)
    }
}

/// Batch schema entry for a single column.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnSpec {
    pub name: String,
    pub vector_type: ColumnVectorType,
    pub nullable: bool,
    /// Child fields, non-empty only for [`ColumnVectorType::Struct`].
    pub children: Vec<ColumnSpec>,
}

impl ColumnSpec {
    /// Create a nullable column specification.
    #[must_use]
    pub fn new(name: impl Into<String>, vector_type: ColumnVectorType) -> Self {
        Self {
            name: name.into(),
            vector_type,
            nullable: true,
            children: Vec::new(),
        }
    }

    /// Create a column specification that rejects NULL values.
    #[must_use]
    pub fn required(name: impl Into<String>, vector_type: ColumnVectorType) -> Self {
        Self::new(name, vector_type).with_nullable(false)
    }

    /// Create a non-nullable composite column with the given child fields.
    #[must_use]
    pub fn structure(name: impl Into<String>, children: Vec<Self>) -> Self {
        Self {
            name: name.into(),
            vector_type: ColumnVectorType::Struct,
            nullable: false,
            children,
        }
    }

    #[must_use]
    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    #[must_use]
    pub const fn is_composite(&self) -> bool {
        matches!(self.vector_type, ColumnVectorType::Struct)
    }
}

impl fmt::Display for ColumnSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:?}", self.name, self.vector_type)?;
        if self.is_composite() {
            f.write_str("<")?;
            for (idx, child) in self.children.iter().enumerate() {
                if idx > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{child}")?;
            }
            f.write_str(">")?;
        }
        if !self.nullable {
            f.write_str(" NOT NULL")?;
        }
        Ok(())
    }
}

/// Ordered list of column specifications describing a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Schema {
    fields: Vec<ColumnSpec>,
}

impl Schema {
    #[must_use]
    pub const fn new(fields: Vec<ColumnSpec>) -> Self {
        Self { fields }
    }

    #[must_use]
    pub fn fields(&self) -> &[ColumnSpec] {
        &self.fields
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Position of the first field named `name`.
    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|field| field.name == name)
    }

    #[must_use]
    pub fn field(&self, idx: usize) -> Option<&ColumnSpec> {
        self.fields.get(idx)
    }

    #[must_use]
    pub fn into_fields(self) -> Vec<ColumnSpec> {
        self.fields
    }
}

impl From<Vec<ColumnSpec>> for Schema {
    fn from(fields: Vec<ColumnSpec>) -> Self {
        Self::new(fields)
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (idx, field) in self.fields.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{field}")?;
        }
        f.write_str("]")
    }
}
