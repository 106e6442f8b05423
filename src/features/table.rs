//! Immutable per-contig feature tables
//!
//! A table is a dense matrix with one row per contig and one column per
//! feature. Every transform returns a new table. Columns carry their modality
//! as a field, so tables from different modalities can be put side by side
//! without renaming anything.

use ahash::AHashMap;
use ndarray::{concatenate, s, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{BinningError, Result, Stage};

/// Feature signal a column belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Modality {
    Composition,
    Coverage,
    /// Components of a PCA fitted on both modalities together
    Joint,
}

impl Modality {
    /// Short prefix used for component column headers
    pub fn prefix(&self) -> &'static str {
        match self {
            Modality::Composition => "comp",
            Modality::Coverage => "cov",
            Modality::Joint => "PC",
        }
    }
}

/// A named, modality-tagged column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub modality: Modality,
    pub name: String,
}

impl Column {
    pub fn new(modality: Modality, name: impl Into<String>) -> Self {
        Self {
            modality,
            name: name.into(),
        }
    }

    /// Column for the `i`-th principal component of a modality
    pub fn component(modality: Modality, i: usize) -> Self {
        Self::new(modality, format!("{}_{}", modality.prefix(), i))
    }
}

#[derive(Debug, Clone)]
pub struct FeatureTable {
    ids: Vec<String>,
    index: AHashMap<String, usize>,
    columns: Vec<Column>,
    values: Array2<f64>,
}

impl FeatureTable {
    /// Build a table, checking the shape and that contig identifiers are unique
    pub fn new(ids: Vec<String>, columns: Vec<Column>, values: Array2<f64>) -> Result<Self> {
        if values.nrows() != ids.len() || values.ncols() != columns.len() {
            return Err(BinningError::dimensionality(
                Stage::FeatureLoading,
                format!(
                    "table shape {}x{} does not match {} identifiers and {} columns",
                    values.nrows(),
                    values.ncols(),
                    ids.len(),
                    columns.len()
                ),
            ));
        }

        let mut index = AHashMap::with_capacity(ids.len());
        for (i, id) in ids.iter().enumerate() {
            if index.insert(id.clone(), i).is_some() {
                return Err(BinningError::format(
                    Stage::FeatureLoading,
                    "feature table",
                    format!("duplicate contig identifier '{}'", id),
                ));
            }
        }

        Ok(Self {
            ids,
            index,
            columns,
            values,
        })
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn n_rows(&self) -> usize {
        self.ids.len()
    }

    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Row position of a contig
    pub fn position(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn row(&self, id: &str) -> Option<ArrayView1<'_, f64>> {
        self.position(id).map(|i| self.values.row(i))
    }

    /// Same rows and columns, new values
    pub fn with_values(&self, values: Array2<f64>) -> Result<Self> {
        Self::new(self.ids.clone(), self.columns.clone(), values)
    }

    /// Same rows, new columns and values
    pub fn with_columns(&self, columns: Vec<Column>, values: Array2<f64>) -> Result<Self> {
        Self::new(self.ids.clone(), columns, values)
    }

    /// Rows whose mask entry is true, order preserved
    pub fn filter_rows(&self, mask: &[bool]) -> Self {
        let keep: Vec<usize> = mask
            .iter()
            .enumerate()
            .filter_map(|(i, &m)| m.then_some(i))
            .collect();
        self.take_rows(&keep)
    }

    /// Rows at the given positions, in that order
    fn take_rows(&self, positions: &[usize]) -> Self {
        let ids: Vec<String> = positions.iter().map(|&i| self.ids[i].clone()).collect();
        let index = ids.iter().enumerate().map(|(i, id)| (id.clone(), i)).collect();
        Self {
            ids,
            index,
            columns: self.columns.clone(),
            values: self.values.select(Axis(0), positions),
        }
    }

    /// Columns in `range` (half-open)
    pub fn select_columns(&self, range: std::ops::Range<usize>) -> Self {
        Self {
            ids: self.ids.clone(),
            index: self.index.clone(),
            columns: self.columns[range.clone()].to_vec(),
            values: self.values.slice(s![.., range]).to_owned(),
        }
    }

    /// Rows of `self` whose identifiers also occur in `other`, in `self` order
    pub fn restrict_to(&self, other: &FeatureTable) -> Self {
        let keep: Vec<usize> = self
            .ids
            .iter()
            .enumerate()
            .filter_map(|(i, id)| other.contains(id).then_some(i))
            .collect();
        self.take_rows(&keep)
    }

    /// Rows for exactly `ids`, in that order; `None` if any is missing
    pub fn reindex(&self, ids: &[String]) -> Option<Self> {
        let positions: Option<Vec<usize>> = ids.iter().map(|id| self.position(id)).collect();
        positions.map(|p| self.take_rows(&p))
    }

    /// Inner join on contig identifier. Rows follow `self` order and the
    /// columns of `other` are appended after those of `self`.
    pub fn inner_join(&self, other: &FeatureTable) -> Result<Self> {
        let left = self.restrict_to(other);
        let right = other.reindex(left.ids()).ok_or_else(|| {
            BinningError::dimensionality(Stage::Join, "join lost track of a shared identifier")
        })?;
        left.hstack(&right)
    }

    /// Side-by-side concatenation of two tables over identical rows
    pub fn hstack(&self, other: &FeatureTable) -> Result<Self> {
        if self.ids != other.ids {
            return Err(BinningError::dimensionality(
                Stage::Join,
                "tables must list the same contigs in the same order to be stacked",
            ));
        }
        let values = concatenate(Axis(1), &[self.values.view(), other.values.view()]).map_err(|e| {
            BinningError::dimensionality(Stage::Join, format!("cannot stack tables: {}", e))
        })?;
        let mut columns = self.columns.clone();
        columns.extend(other.columns.iter().cloned());
        Ok(Self {
            ids: self.ids.clone(),
            index: self.index.clone(),
            columns,
            values,
        })
    }

    /// Per-row sums
    pub fn row_sums(&self) -> ndarray::Array1<f64> {
        self.values.sum_axis(Axis(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use std::collections::HashSet;

    fn table(ids: &[&str], modality: Modality, values: Array2<f64>) -> FeatureTable {
        let columns = (0..values.ncols())
            .map(|i| Column::new(modality, format!("f{}", i)))
            .collect();
        FeatureTable::new(ids.iter().map(|s| s.to_string()).collect(), columns, values).unwrap()
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let columns = vec![Column::new(Modality::Coverage, "s1")];
        let err = FeatureTable::new(
            vec!["a".into(), "a".into()],
            columns,
            array![[1.0], [2.0]],
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_inner_join_is_intersection_in_either_order() {
        let a = table(&["c1", "c2", "c3"], Modality::Composition, array![[1.0], [2.0], [3.0]]);
        let b = table(&["c3", "c4", "c1"], Modality::Coverage, array![[30.0], [40.0], [10.0]]);

        let ab = a.inner_join(&b).unwrap();
        let ba = b.inner_join(&a).unwrap();
        let ab_ids: HashSet<_> = ab.ids().iter().cloned().collect();
        let ba_ids: HashSet<_> = ba.ids().iter().cloned().collect();
        assert_eq!(ab_ids, ba_ids);
        assert_eq!(ab_ids, ["c1", "c3"].iter().map(|s| s.to_string()).collect());

        assert_eq!(ab.ids(), &["c1".to_string(), "c3".to_string()]);
        assert_eq!(ab.row("c3").unwrap().to_vec(), vec![3.0, 30.0]);
        assert_eq!(ab.columns()[1].modality, Modality::Coverage);

        // Idempotent on the identifier set
        let again = ab.restrict_to(&b);
        assert_eq!(again.ids(), ab.ids());
    }

    #[test]
    fn test_filter_and_select() {
        let t = table(&["x", "y", "z"], Modality::Coverage, array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]]);
        let f = t.filter_rows(&[true, false, true]);
        assert_eq!(f.ids(), &["x".to_string(), "z".to_string()]);
        assert_eq!(f.position("z"), Some(1));
        let c = t.select_columns(1..2);
        assert_eq!(c.values(), &array![[2.0], [4.0], [6.0]]);
        assert_eq!(t.row_sums().to_vec(), vec![3.0, 7.0, 11.0]);
    }

    #[test]
    fn test_component_columns_do_not_collide() {
        let comp = Column::component(Modality::Composition, 0);
        let cov = Column::component(Modality::Coverage, 0);
        assert_ne!(comp, cov);
        assert_eq!(comp.name, "comp_0");
        assert_eq!(cov.name, "cov_0");
    }
}
