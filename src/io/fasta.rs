// src/io/fasta.rs
use std::fs::File;
use std::io::{BufRead, BufReader};

use bio::io::fasta;
use flate2::read::MultiGzDecoder;

use crate::error::{BinningError, Result, Stage};

/// A contig record as read from the composition file
#[derive(Debug, Clone)]
pub struct ContigRecord {
    pub id: String,
    pub seq: Vec<u8>,
}

/// Open a FASTA file for reading, handles gzipped files automatically
pub fn open_fasta(path: &str) -> Result<Box<dyn BufRead>> {
    let file = File::open(path).map_err(|e| BinningError::io(Stage::FeatureLoading, path, e))?;
    if path.ends_with(".gz") {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Streams FASTA records in batches of `batch_size`, handing each batch to `f`.
/// Returns the total number of records seen.
pub fn for_each_batch<F>(path: &str, batch_size: usize, mut f: F) -> Result<usize>
where
    F: FnMut(Vec<ContigRecord>) -> Result<()>,
{
    let reader = fasta::Reader::new(open_fasta(path)?);
    let mut batch = Vec::with_capacity(batch_size);
    let mut total = 0;

    for result in reader.records() {
        let record = result.map_err(|e| BinningError::format(Stage::FeatureLoading, path, e.to_string()))?;
        if record.id().is_empty() {
            return Err(BinningError::format(
                Stage::FeatureLoading,
                path,
                format!("record {} has an empty identifier", total + 1),
            ));
        }
        batch.push(ContigRecord {
            id: record.id().to_string(),
            seq: record.seq().to_vec(),
        });
        total += 1;

        if batch.len() == batch_size {
            f(std::mem::replace(&mut batch, Vec::with_capacity(batch_size)))?;
        }
    }
    if !batch.is_empty() {
        f(batch)?;
    }

    if total == 0 {
        return Err(BinningError::format(Stage::FeatureLoading, path, "no FASTA records found"));
    }
    Ok(total)
}
