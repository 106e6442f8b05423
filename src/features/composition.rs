//! K-mer composition features
//!
//! Counts start at one (pseudo-count) so every row sum is positive and the
//! log-ratio transform is always defined.

use ndarray::{Array1, Array2, Axis};
use rayon::prelude::*;
use tracing::{debug, info};

use crate::error::{BinningError, Result, Stage};
use crate::features::table::{Column, FeatureTable, Modality};
use crate::io::fasta::{for_each_batch, ContigRecord};
use crate::kmer::{AlphabetPolicy, KmerIndex};

const BATCH_SIZE: usize = 4096;
const PSEUDO_COUNT: f64 = 1.0;

/// Composition features of every contig in the sequence file
#[derive(Debug, Clone)]
pub struct CompositionData {
    /// Pseudo-counted k-mer counts, one row per contig in file order
    pub pseudo_counts: FeatureTable,
    /// Row sums of `pseudo_counts`, used as a length proxy
    pub lengths: Array1<f64>,
    /// Natural log of each row divided by its sum
    pub log_ratios: FeatureTable,
}

impl CompositionData {
    /// Build from pseudo-counted counts
    pub fn from_counts(pseudo_counts: FeatureTable) -> Result<Self> {
        let lengths = pseudo_counts.row_sums();
        let log_ratios = log_ratio(&pseudo_counts)?;
        Ok(Self {
            pseudo_counts,
            lengths,
            log_ratios,
        })
    }

    /// Length proxy of a contig
    pub fn length_of(&self, id: &str) -> Option<f64> {
        self.pseudo_counts.position(id).map(|i| self.lengths[i])
    }

    /// Threshold filter: strictly greater than `threshold`
    pub fn threshold_mask(&self, threshold: f64) -> Vec<bool> {
        self.lengths.iter().map(|&l| l > threshold).collect()
    }

    pub fn n_contigs(&self) -> usize {
        self.pseudo_counts.n_rows()
    }
}

/// Column labels for a k-mer index: one representative per class plus the spacer
pub fn composition_columns(index: &KmerIndex) -> Vec<Column> {
    let mut columns: Vec<Column> = index
        .representatives()
        .into_iter()
        .map(|kmer| Column::new(Modality::Composition, kmer))
        .collect();
    columns.push(Column::new(Modality::Composition, "spacer"));
    columns
}

/// Pseudo-counted count row of a single contig
fn count_row(index: &KmerIndex, record: &ContigRecord, policy: AlphabetPolicy) -> Result<Vec<f64>> {
    let mut row = vec![PSEUDO_COUNT; index.dimensions()];
    index.accumulate(&record.id, &record.seq, policy, &mut row)?;
    Ok(row)
}

/// Pseudo-counted count table for in-memory records
pub fn count_table(records: &[ContigRecord], index: &KmerIndex, policy: AlphabetPolicy) -> Result<FeatureTable> {
    let rows: Vec<Vec<f64>> = records
        .par_iter()
        .map(|r| count_row(index, r, policy))
        .collect::<Result<_>>()?;
    let ids = records.iter().map(|r| r.id.clone()).collect();
    assemble(ids, rows, index)
}

fn assemble(ids: Vec<String>, rows: Vec<Vec<f64>>, index: &KmerIndex) -> Result<FeatureTable> {
    let n = rows.len();
    let flat: Vec<f64> = rows.into_iter().flatten().collect();
    let values = Array2::from_shape_vec((n, index.dimensions()), flat)
        .map_err(|e| BinningError::dimensionality(Stage::FeatureLoading, e.to_string()))?;
    FeatureTable::new(ids, composition_columns(index), values)
}

/// Log-ratio transform: each row divided by its own sum, then natural log
pub fn log_ratio(table: &FeatureTable) -> Result<FeatureTable> {
    let sums = table.row_sums();
    if let Some(i) = sums.iter().position(|&s| !(s > 0.0)) {
        return Err(BinningError::numerical(
            Stage::FeatureLoading,
            format!("contig '{}' has a non-positive k-mer total", table.ids()[i]),
        ));
    }
    let mut values = table.values().clone();
    for (mut row, &sum) in values.axis_iter_mut(Axis(0)).zip(sums.iter()) {
        row.mapv_inplace(|v| (v / sum).ln());
    }
    table.with_values(values)
}

/// Stream a FASTA file into composition features
pub fn load_composition(path: &str, kmer_len: usize, policy: AlphabetPolicy) -> Result<CompositionData> {
    let index = KmerIndex::new(kmer_len)?;
    info!(
        "Counting {}-mers into {} canonical classes from {}",
        index.k(),
        index.n_classes(),
        path
    );

    let mut ids = Vec::new();
    let mut rows = Vec::new();
    let total = for_each_batch(path, BATCH_SIZE, |batch| {
        let batch_rows: Vec<Vec<f64>> = batch
            .par_iter()
            .map(|r| count_row(&index, r, policy))
            .collect::<Result<_>>()?;
        ids.extend(batch.into_iter().map(|r| r.id));
        rows.extend(batch_rows);
        debug!("Counted {} contigs so far", ids.len());
        Ok(())
    })?;

    let counts = assemble(ids, rows, &index).map_err(|e| match e {
        BinningError::InputFormat { stage, msg, .. } => BinningError::InputFormat {
            stage,
            path: path.to_string(),
            msg,
        },
        other => other,
    })?;
    let data = CompositionData::from_counts(counts)?;
    info!(
        "Successfully loaded composition data: {} contigs x {} features",
        total,
        index.dimensions()
    );
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records(pairs: &[(&str, &str)]) -> Vec<ContigRecord> {
        pairs
            .iter()
            .map(|(id, seq)| ContigRecord {
                id: id.to_string(),
                seq: seq.as_bytes().to_vec(),
            })
            .collect()
    }

    #[test]
    fn test_pseudo_count_floor() {
        let index = KmerIndex::new(2).unwrap();
        let recs = records(&[("a", "ACGTACGT"), ("b", ""), ("c", "GGGGGGGGGGGG")]);
        let table = count_table(&recs, &index, AlphabetPolicy::Strict).unwrap();
        assert_eq!(table.n_cols(), index.dimensions());
        assert!(table.values().iter().all(|&v| v >= 1.0));

        let data = CompositionData::from_counts(table).unwrap();
        assert!(data.lengths.iter().all(|&l| l > 0.0));
        // 11 pseudo-counts + 7 windows
        assert_eq!(data.length_of("a"), Some(18.0));
        assert_eq!(data.length_of("b"), Some(11.0));
        assert!(data.log_ratios.values().iter().all(|v| v.is_finite() && *v < 0.0));
    }

    #[test]
    fn test_log_ratio_rows_sum_to_one() {
        let index = KmerIndex::new(3).unwrap();
        let recs = records(&[("a", "ACGTTTGACCA"), ("b", "TTTTTTTT")]);
        let data = CompositionData::from_counts(count_table(&recs, &index, AlphabetPolicy::Strict).unwrap()).unwrap();
        for row in data.log_ratios.values().rows() {
            let total: f64 = row.iter().map(|v| v.exp()).sum();
            assert!((total - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_threshold_is_strict() {
        let index = KmerIndex::new(4).unwrap();
        // 137 pseudo-counts; "AAAAAA" adds 3 windows -> 140, "AAAAAAA" -> 141
        let recs = records(&[("at", "AAAAAA"), ("above", "AAAAAAA")]);
        let data = CompositionData::from_counts(count_table(&recs, &index, AlphabetPolicy::Strict).unwrap()).unwrap();
        assert_eq!(data.length_of("at"), Some(140.0));
        assert_eq!(data.threshold_mask(140.0), vec![false, true]);
    }

    #[test]
    fn test_alphabet_error_names_contig() {
        let index = KmerIndex::new(3).unwrap();
        let recs = records(&[("ok", "ACGT"), ("bad", "ACRT")]);
        let err = count_table(&recs, &index, AlphabetPolicy::Strict).unwrap_err();
        assert!(err.to_string().contains("'bad'"));
        assert!(count_table(&recs, &index, AlphabetPolicy::Skip).is_ok());
    }
}
