//! Writing run results
//!
//! `CsvReporter` writes comma-separated tables into the output directory.
//! File names carry the length threshold, e.g. `clustering_gt1000.csv`.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use ndarray::{Array2, ArrayView1};
use tracing::{debug, info};

use crate::error::{BinningError, Result, Stage};
use crate::features::table::{Column, FeatureTable, Modality};
use crate::pipeline::cluster::{ClusterAssignment, ClusterConfig};
use crate::pipeline::search::CandidateResult;

/// Receives every artefact of a run
pub trait ClusterReporter {
    fn write_args(&mut self, config: &ClusterConfig) -> Result<()>;

    /// Pseudo-counted composition and raw coverage of the filtered contigs
    fn write_original_data(&mut self, table: &FeatureTable) -> Result<()>;

    /// Component table the mixtures are fitted on
    fn write_pca(&mut self, table: &FeatureTable) -> Result<()>;

    fn write_bic(&mut self, results: &[CandidateResult]) -> Result<()>;

    fn write_clustering(&mut self, assignment: &ClusterAssignment) -> Result<()>;

    fn write_cluster_pca_means(&mut self, means: &Array2<f64>, components: &[Column]) -> Result<()>;

    /// Cluster means mapped back to feature space
    fn write_cluster_means(&mut self, means: &Array2<f64>, features: &[Column]) -> Result<()>;

    fn write_cluster_pca_variance(&mut self, cluster: usize, cov: &Array2<f64>, components: &[Column]) -> Result<()>;

    /// Covariance rows of one cluster mapped back to feature space
    fn write_cluster_variance(
        &mut self,
        cluster: usize,
        cov: &Array2<f64>,
        components: &[Column],
        features: &[Column],
    ) -> Result<()>;

    fn write_responsibilities(&mut self, assignment: &ClusterAssignment) -> Result<()>;

    /// Joined table written by the `features` command
    fn write_joined_features(&mut self, table: &FeatureTable) -> Result<()>;
}

/// Writes CSV files into a directory
pub struct CsvReporter {
    dir: PathBuf,
    threshold: f64,
    pipe: bool,
}

impl CsvReporter {
    /// Creates the output directory if needed. With `pipe` the clustering
    /// goes to stdout instead of a file.
    pub fn new(dir: impl Into<PathBuf>, threshold: f64, pipe: bool) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| BinningError::io(Stage::FinalReport, dir.display().to_string(), e))?;
        Ok(Self { dir, threshold, pipe })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File name with the threshold suffix
    pub fn name(&self, stem: &str) -> String {
        format!("{}_gt{}.csv", stem, self.threshold)
    }

    fn write_file<F>(&self, name: &str, body: F) -> Result<()>
    where
        F: FnOnce(&mut dyn Write) -> io::Result<()>,
    {
        let path = self.dir.join(name);
        let io_err = |e| BinningError::io(Stage::FinalReport, path.display().to_string(), e);
        let file = File::create(&path).map_err(io_err)?;
        let mut writer = BufWriter::new(file);
        body(&mut writer).map_err(io_err)?;
        writer.flush().map_err(io_err)?;
        debug!("Wrote {}", path.display());
        Ok(())
    }
}

fn write_row(out: &mut dyn Write, label: &str, values: ArrayView1<f64>) -> io::Result<()> {
    write!(out, "{}", label)?;
    for v in values {
        write!(out, ",{}", v)?;
    }
    writeln!(out)
}

fn write_header<'a>(out: &mut dyn Write, first: &str, names: impl Iterator<Item = &'a str>) -> io::Result<()> {
    write!(out, "{}", first)?;
    for n in names {
        write!(out, ",{}", n)?;
    }
    writeln!(out)
}

fn column_names(columns: &[Column]) -> impl Iterator<Item = &str> {
    columns.iter().map(|c| c.name.as_str())
}

fn write_table(out: &mut dyn Write, table: &FeatureTable) -> io::Result<()> {
    write_header(out, "contig_id", column_names(table.columns()))?;
    for (id, row) in table.ids().iter().zip(table.values().rows()) {
        write_row(out, id, row)?;
    }
    Ok(())
}

/// Rows labelled by index, columns by `columns`
fn write_labelled(out: &mut dyn Write, first: &str, rows: &[String], columns: &[Column], values: &Array2<f64>) -> io::Result<()> {
    write_header(out, first, column_names(columns))?;
    for (label, row) in rows.iter().zip(values.rows()) {
        write_row(out, label, row)?;
    }
    Ok(())
}

fn write_clustering_to(out: &mut dyn Write, assignment: &ClusterAssignment) -> io::Result<()> {
    writeln!(out, "contig_id,cluster_id")?;
    for (id, label) in assignment.ids.iter().zip(&assignment.labels) {
        writeln!(out, "{},{}", id, label)?;
    }
    Ok(())
}

impl ClusterReporter for CsvReporter {
    fn write_args(&mut self, config: &ClusterConfig) -> Result<()> {
        self.write_file("args.json", |out| {
            serde_json::to_writer_pretty(&mut *out, config).map_err(io::Error::from)?;
            writeln!(out)
        })
    }

    fn write_original_data(&mut self, table: &FeatureTable) -> Result<()> {
        self.write_file(&self.name("original_data"), |out| write_table(out, table))
    }

    fn write_pca(&mut self, table: &FeatureTable) -> Result<()> {
        self.write_file(&self.name("PCA_transformed_data"), |out| write_table(out, table))
    }

    fn write_bic(&mut self, results: &[CandidateResult]) -> Result<()> {
        self.write_file("bic.csv", |out| {
            writeln!(out, "cluster_count,bic,converged")?;
            for r in results {
                writeln!(out, "{},{},{}", r.n_components, r.bic, r.converged)?;
            }
            Ok(())
        })
    }

    fn write_clustering(&mut self, assignment: &ClusterAssignment) -> Result<()> {
        if self.pipe {
            let stdout = io::stdout();
            let mut lock = stdout.lock();
            return write_clustering_to(&mut lock, assignment)
                .map_err(|e| BinningError::io(Stage::FinalReport, "stdout", e));
        }
        let name = self.name("clustering");
        self.write_file(&name, |out| write_clustering_to(out, assignment))?;
        info!("Wrote clustering of {} contigs to {}", assignment.ids.len(), self.dir.join(name).display());
        Ok(())
    }

    fn write_cluster_pca_means(&mut self, means: &Array2<f64>, components: &[Column]) -> Result<()> {
        let labels: Vec<String> = (0..means.nrows()).map(|i| i.to_string()).collect();
        self.write_file(&self.name("pca_means"), |out| {
            write_labelled(out, "cluster_id", &labels, components, means)
        })
    }

    fn write_cluster_means(&mut self, means: &Array2<f64>, features: &[Column]) -> Result<()> {
        let labels: Vec<String> = (0..means.nrows()).map(|i| i.to_string()).collect();
        self.write_file(&self.name("means"), |out| {
            write_labelled(out, "cluster_id", &labels, features, means)
        })
    }

    fn write_cluster_pca_variance(&mut self, cluster: usize, cov: &Array2<f64>, components: &[Column]) -> Result<()> {
        let labels: Vec<String> = components.iter().map(|c| c.name.clone()).collect();
        let name = format!("pca_variance_gt{}_dim{}.csv", self.threshold, cluster);
        self.write_file(&name, |out| write_labelled(out, "component", &labels, components, cov))
    }

    fn write_cluster_variance(
        &mut self,
        cluster: usize,
        cov: &Array2<f64>,
        components: &[Column],
        features: &[Column],
    ) -> Result<()> {
        let labels: Vec<String> = components.iter().map(|c| c.name.clone()).collect();
        let name = format!("variance_gt{}_dim{}.csv", self.threshold, cluster);
        self.write_file(&name, |out| write_labelled(out, "component", &labels, features, cov))
    }

    fn write_responsibilities(&mut self, assignment: &ClusterAssignment) -> Result<()> {
        let columns: Vec<Column> = (0..assignment.n_clusters())
            .map(|i| Column::new(Modality::Joint, format!("cluster_{}", i)))
            .collect();
        self.write_file("responsibilities.csv", |out| {
            write_labelled(out, "contig_id", &assignment.ids, &columns, &assignment.responsibilities)
        })
    }

    fn write_joined_features(&mut self, table: &FeatureTable) -> Result<()> {
        self.write_file("joined_features.csv", |out| write_table(out, table))
    }
}

/// Discards everything; used by ranks that never report
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReporter;

impl ClusterReporter for NullReporter {
    fn write_args(&mut self, _: &ClusterConfig) -> Result<()> {
        Ok(())
    }

    fn write_original_data(&mut self, _: &FeatureTable) -> Result<()> {
        Ok(())
    }

    fn write_pca(&mut self, _: &FeatureTable) -> Result<()> {
        Ok(())
    }

    fn write_bic(&mut self, _: &[CandidateResult]) -> Result<()> {
        Ok(())
    }

    fn write_clustering(&mut self, _: &ClusterAssignment) -> Result<()> {
        Ok(())
    }

    fn write_cluster_pca_means(&mut self, _: &Array2<f64>, _: &[Column]) -> Result<()> {
        Ok(())
    }

    fn write_cluster_means(&mut self, _: &Array2<f64>, _: &[Column]) -> Result<()> {
        Ok(())
    }

    fn write_cluster_pca_variance(&mut self, _: usize, _: &Array2<f64>, _: &[Column]) -> Result<()> {
        Ok(())
    }

    fn write_cluster_variance(&mut self, _: usize, _: &Array2<f64>, _: &[Column], _: &[Column]) -> Result<()> {
        Ok(())
    }

    fn write_responsibilities(&mut self, _: &ClusterAssignment) -> Result<()> {
        Ok(())
    }

    fn write_joined_features(&mut self, _: &FeatureTable) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use tempfile::tempdir;

    fn assignment() -> ClusterAssignment {
        ClusterAssignment {
            ids: vec!["c1".into(), "c2".into()],
            labels: vec![1, 0],
            responsibilities: array![[0.2, 0.8], [0.9, 0.1]],
            included: vec![true, false],
        }
    }

    #[test]
    fn test_file_names_carry_threshold() {
        let dir = tempdir().unwrap();
        let reporter = CsvReporter::new(dir.path(), 1000.0, false).unwrap();
        assert_eq!(reporter.name("clustering"), "clustering_gt1000.csv");
        let reporter = CsvReporter::new(dir.path(), 2.5, false).unwrap();
        assert_eq!(reporter.name("means"), "means_gt2.5.csv");
    }

    #[test]
    fn test_clustering_and_responsibilities() {
        let dir = tempdir().unwrap();
        let mut reporter = CsvReporter::new(dir.path().join("out"), 10.0, false).unwrap();
        reporter.write_clustering(&assignment()).unwrap();
        reporter.write_responsibilities(&assignment()).unwrap();

        let clustering = fs::read_to_string(dir.path().join("out/clustering_gt10.csv")).unwrap();
        assert_eq!(clustering, "contig_id,cluster_id\nc1,1\nc2,0\n");

        let resp = fs::read_to_string(dir.path().join("out/responsibilities.csv")).unwrap();
        let lines: Vec<&str> = resp.lines().collect();
        assert_eq!(lines[0], "contig_id,cluster_0,cluster_1");
        assert_eq!(lines[1], "c1,0.2,0.8");
    }

    #[test]
    fn test_bic_and_variance() {
        let dir = tempdir().unwrap();
        let mut reporter = CsvReporter::new(dir.path(), 5.0, false).unwrap();
        let results = vec![
            CandidateResult {
                bic: 12.5,
                n_components: 2,
                converged: true,
            },
            CandidateResult {
                bic: 9.0,
                n_components: 3,
                converged: false,
            },
        ];
        reporter.write_bic(&results).unwrap();
        let bic = fs::read_to_string(dir.path().join("bic.csv")).unwrap();
        assert_eq!(bic, "cluster_count,bic,converged\n2,12.5,true\n3,9,false\n");

        let components = vec![Column::component(Modality::Joint, 0), Column::component(Modality::Joint, 1)];
        reporter
            .write_cluster_pca_variance(1, &array![[1.0, 0.5], [0.5, 2.0]], &components)
            .unwrap();
        let var = fs::read_to_string(dir.path().join("pca_variance_gt5_dim1.csv")).unwrap();
        assert_eq!(var, "component,PC_0,PC_1\nPC_0,1,0.5\nPC_1,0.5,2\n");
    }
}
