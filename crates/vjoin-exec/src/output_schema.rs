//! Output schema construction with outer-join nullability promotion.

use vjoin_types::{ColumnSpec, Schema};

use crate::config::JoinType;

/// Joined schema: build columns first, then probe columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSchema {
    schema: Schema,
    build_width: usize,
}

impl OutputSchema {
    #[must_use]
    pub const fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Number of leading columns that come from the build side.
    #[must_use]
    pub const fn build_width(&self) -> usize {
        self.build_width
    }

    #[must_use]
    pub fn probe_width(&self) -> usize {
        self.schema.len() - self.build_width
    }

    #[must_use]
    pub fn into_schema(self) -> Schema {
        self.schema
    }
}

/// Widen `spec` to nullable when `outer` is set. Composite columns keep their
/// declared nullability.
#[must_use]
pub fn promote(spec: &ColumnSpec, outer: bool) -> ColumnSpec {
    if outer && !spec.is_composite() {
        spec.clone().with_nullable(true)
    } else {
        spec.clone()
    }
}

/// Combine the input schemas for `join_type`.
///
/// LEFT and FULL may emit probe rows without a build match, so build columns
/// become nullable; RIGHT and FULL symmetrically promote probe columns. A side
/// that never produced a schema contributes no columns.
#[must_use]
pub fn build_output_schema(
    build: Option<&Schema>,
    probe: Option<&Schema>,
    join_type: JoinType,
) -> OutputSchema {
    let build_fields: Vec<ColumnSpec> = build
        .map(|schema| {
            schema
                .fields()
                .iter()
                .map(|spec| promote(spec, join_type.emits_unmatched_probe()))
                .collect()
        })
        .unwrap_or_default();
    let build_width = build_fields.len();
    let mut fields = build_fields;
    if let Some(schema) = probe {
        fields.extend(
            schema
                .fields()
                .iter()
                .map(|spec| promote(spec, join_type.emits_unmatched_build())),
        );
    }
    OutputSchema {
        schema: Schema::new(fields),
        build_width,
    }
}
