use std::fs::File;
use std::io::{BufRead, BufReader};

use ahash::AHashSet;
use ndarray::Array2;
use tracing::info;

use crate::error::{BinningError, Result, Stage};
use crate::features::table::{Column, FeatureTable, Modality};

/// Read a tab-separated coverage table.
///
/// The header names the sample columns (its first field labels the identifier
/// column and is ignored); every following line holds a contig identifier and
/// one numeric value per sample.
pub fn read_coverage_table(path: &str) -> Result<FeatureTable> {
    let file = File::open(path).map_err(|e| BinningError::io(Stage::FeatureLoading, path, e))?;
    let reader = BufReader::new(file);
    let mut lines = reader.lines();

    let header = match lines.next() {
        Some(line) => line.map_err(|e| BinningError::io(Stage::FeatureLoading, path, e))?,
        None => return Err(BinningError::format(Stage::FeatureLoading, path, "empty coverage file")),
    };
    let samples: Vec<&str> = header.trim_end().split('\t').skip(1).collect();
    if samples.is_empty() {
        return Err(BinningError::format(
            Stage::FeatureLoading,
            path,
            "header has no sample columns (expected tab-separated fields)",
        ));
    }
    let columns: Vec<Column> = samples
        .iter()
        .map(|s| Column::new(Modality::Coverage, *s))
        .collect();

    let mut ids = Vec::new();
    let mut seen = AHashSet::new();
    let mut flat = Vec::new();

    for (line_no, line) in lines.enumerate() {
        let line = line.map_err(|e| BinningError::io(Stage::FeatureLoading, path, e))?;
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        // Header is line 1
        let line_no = line_no + 2;

        let mut fields = line.split('\t');
        let id = fields.next().unwrap_or_default().to_string();
        if id.is_empty() {
            return Err(BinningError::format(
                Stage::FeatureLoading,
                path,
                format!("line {}: missing contig identifier", line_no),
            ));
        }
        if !seen.insert(id.clone()) {
            return Err(BinningError::format(
                Stage::FeatureLoading,
                path,
                format!("line {}: duplicate contig identifier '{}'", line_no, id),
            ));
        }

        let before = flat.len();
        for field in fields {
            let value = field.trim().parse::<f64>().map_err(|_| {
                BinningError::format(
                    Stage::FeatureLoading,
                    path,
                    format!("line {}: '{}' is not a number", line_no, field),
                )
            })?;
            flat.push(value);
        }
        let n_values = flat.len() - before;
        if n_values != columns.len() {
            return Err(BinningError::format(
                Stage::FeatureLoading,
                path,
                format!(
                    "line {}: expected {} values, found {}",
                    line_no,
                    columns.len(),
                    n_values
                ),
            ));
        }
        ids.push(id);
    }

    if ids.is_empty() {
        return Err(BinningError::format(Stage::FeatureLoading, path, "no coverage rows found"));
    }

    let values = Array2::from_shape_vec((ids.len(), columns.len()), flat)
        .map_err(|e| BinningError::format(Stage::FeatureLoading, path, e.to_string()))?;
    info!(
        "Read coverage for {} contigs across {} samples from {}",
        ids.len(),
        columns.len(),
        path
    );
    FeatureTable::new(ids, columns, values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_read_coverage_table() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "contig\tsample_1\tsample_2").unwrap();
        writeln!(file, "c1\t1.5\t0").unwrap();
        writeln!(file, "c2\t2\t3.25").unwrap();

        let table = read_coverage_table(file.path().to_str().unwrap()).unwrap();
        assert_eq!(table.n_rows(), 2);
        assert_eq!(table.columns()[1].name, "sample_2");
        assert_eq!(table.row("c2").unwrap().to_vec(), vec![2.0, 3.25]);
    }

    #[test]
    fn test_malformed_rows() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "contig\ts1\ts2").unwrap();
        writeln!(file, "c1\t1.0").unwrap();
        let err = read_coverage_table(file.path().to_str().unwrap()).unwrap_err();
        assert!(err.to_string().contains("expected 2 values"));

        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "contig\ts1").unwrap();
        writeln!(file, "c1\tabc").unwrap();
        let err = read_coverage_table(file.path().to_str().unwrap()).unwrap_err();
        assert!(matches!(err, BinningError::InputFormat { .. }));

        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "contig\ts1").unwrap();
        writeln!(file, "c1\t1").unwrap();
        writeln!(file, "c1\t2").unwrap();
        let err = read_coverage_table(file.path().to_str().unwrap()).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }
}
