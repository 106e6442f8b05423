//! Coverage features
//!
//! A pseudo-count worth one read (default 100 bp) is added to every selected
//! sample value, scaled by the inverse of the contig's composition length
//! proxy, before the natural log is taken.

use std::ops::Range;

use serde::Serialize;

use crate::error::{BinningError, Result, Stage};
use crate::features::composition::CompositionData;
use crate::features::table::FeatureTable;

/// Inclusive range of coverage columns, named by header labels
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoverageRange {
    pub first: String,
    pub last: String,
}

impl CoverageRange {
    pub fn new(first: impl Into<String>, last: impl Into<String>) -> Self {
        Self {
            first: first.into(),
            last: last.into(),
        }
    }

    /// Column positions of the range in `table`
    pub fn resolve(&self, table: &FeatureTable) -> Result<Range<usize>> {
        let find = |name: &str| {
            table
                .columns()
                .iter()
                .position(|c| c.name == name)
                .ok_or_else(|| {
                    BinningError::Config(format!("coverage column '{}' not found in coverage header", name))
                })
        };
        let start = find(&self.first)?;
        let end = find(&self.last)?;
        if start > end {
            return Err(BinningError::Config(format!(
                "coverage column '{}' comes after '{}'",
                self.first, self.last
            )));
        }
        Ok(start..end + 1)
    }
}

/// Selected columns of the raw coverage table; `None` keeps every column
pub fn select_coverage(table: &FeatureTable, range: Option<&CoverageRange>) -> Result<FeatureTable> {
    match range {
        Some(r) => Ok(table.select_columns(r.resolve(table)?)),
        None => Ok(table.clone()),
    }
}

/// Log coverage with length-scaled pseudo-counts.
///
/// Every row of `coverage` must have a length proxy in `composition`; align
/// the tables before calling.
pub fn log_coverage(coverage: &FeatureTable, composition: &CompositionData, read_length: f64) -> Result<FeatureTable> {
    let mut values = coverage.values().clone();
    for (id, mut row) in coverage.ids().iter().zip(values.rows_mut()) {
        let length = composition.length_of(id).ok_or_else(|| {
            BinningError::format(
                Stage::Join,
                "coverage table",
                format!("contig '{}' has no composition length; align coverage before transforming", id),
            )
        })?;
        let pseudo = read_length / length;
        row.mapv_inplace(|v| (v + pseudo).ln());
    }
    coverage.with_values(values)
}
