//! K-mer processing: base encoding helpers and the canonical feature space

pub mod feature_space;
pub mod kmer;

pub use feature_space::{AlphabetPolicy, KmerIndex};
