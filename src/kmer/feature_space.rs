//! Canonical k-mer feature space
//!
//! Every k-mer over {A,T,G,C} is assigned a class id shared with its reverse
//! complement. Ids are handed out while enumerating k-mers in lexicographic
//! product order over `ATGC`, so the layout is stable for a given `k`.
//! The feature vector carries one extra trailing slot that is never counted
//! into, keeping the column count at `classes + 1`.

use crate::error::{BinningError, Result};
use crate::kmer::kmer::{base_digit, decode_kmer, encode_kmer, reverse_complement_code};
use clap::ValueEnum;
use serde::Serialize;

/// Largest supported k-mer length (dense table of 4^k entries)
pub const MAX_KMER_LEN: usize = 12;

const UNASSIGNED: u32 = u32::MAX;

/// How windows touching characters outside {A,C,G,T} are treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AlphabetPolicy {
    /// Fail with an error naming the contig
    #[default]
    Strict,
    /// Skip every window that contains such a character
    Skip,
}

/// Reverse-complement-collapsed k-mer index
#[derive(Debug, Clone)]
pub struct KmerIndex {
    k: usize,
    classes: Vec<u32>,
    n_classes: usize,
}

impl KmerIndex {
    /// Build the index for k-mer length `k`
    pub fn new(k: usize) -> Result<Self> {
        if k == 0 || k > MAX_KMER_LEN {
            return Err(BinningError::Config(format!(
                "k-mer length must be between 1 and {}, got {}",
                MAX_KMER_LEN, k
            )));
        }

        let total = 1usize << (2 * k);
        let mut classes = vec![UNASSIGNED; total];
        let mut counter: u32 = 0;
        for code in 0..total {
            if classes[code] != UNASSIGNED {
                continue;
            }
            classes[code] = counter;
            classes[reverse_complement_code(code as u64, k) as usize] = counter;
            counter += 1;
        }

        Ok(Self {
            k,
            classes,
            n_classes: counter as usize,
        })
    }

    pub fn k(&self) -> usize {
        self.k
    }

    /// Number of distinct canonical classes
    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    /// Width of a feature vector: classes plus the spacer slot
    pub fn dimensions(&self) -> usize {
        self.n_classes + 1
    }

    /// Class id of an uppercase k-mer, `None` for wrong length or alphabet
    pub fn class_of(&self, kmer: &[u8]) -> Option<usize> {
        if kmer.len() != self.k {
            return None;
        }
        encode_kmer(kmer).map(|code| self.classes[code as usize] as usize)
    }

    /// One representative k-mer per class, in id order
    pub fn representatives(&self) -> Vec<String> {
        let mut reps = vec![String::new(); self.n_classes];
        for (code, &class) in self.classes.iter().enumerate() {
            let slot = &mut reps[class as usize];
            if slot.is_empty() {
                *slot = decode_kmer(code as u64, self.k);
            }
        }
        reps
    }

    /// Adds one count per window of `seq` into `counts`, returning how many
    /// windows were counted. The sequence is uppercased on the fly.
    pub fn accumulate(
        &self,
        contig: &str,
        seq: &[u8],
        policy: AlphabetPolicy,
        counts: &mut [f64],
    ) -> Result<usize> {
        debug_assert!(counts.len() >= self.dimensions());
        if seq.len() < self.k {
            return Ok(0);
        }

        let mask = (1u64 << (2 * self.k)) - 1;
        let mut code = 0u64;
        let mut run = 0usize;
        let mut counted = 0usize;

        for (pos, &raw) in seq.iter().enumerate() {
            let b = raw.to_ascii_uppercase();
            match base_digit(b) {
                Some(digit) => {
                    code = ((code << 2) | digit) & mask;
                    run += 1;
                    if run >= self.k {
                        counts[self.classes[code as usize] as usize] += 1.0;
                        counted += 1;
                    }
                }
                None => match policy {
                    AlphabetPolicy::Strict => {
                        return Err(BinningError::InvalidAlphabet {
                            contig: contig.to_string(),
                            found: raw as char,
                            position: pos,
                        })
                    }
                    AlphabetPolicy::Skip => run = 0,
                },
            }
        }

        Ok(counted)
    }

    /// Raw count vector of a sequence (no pseudo-counts)
    pub fn encode(&self, contig: &str, seq: &[u8], policy: AlphabetPolicy) -> Result<Vec<f64>> {
        let mut counts = vec![0.0; self.dimensions()];
        self.accumulate(contig, seq, policy, &mut counts)?;
        Ok(counts)
    }
}
