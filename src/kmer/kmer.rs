/// Nucleotide alphabet in the order k-mers are enumerated
pub const BASES: [u8; 4] = [b'A', b'T', b'G', b'C'];

/// Maps an uppercase nucleotide to its 2-bit digit in `BASES` order
/// (A=0, T=1, G=2, C=3). Complementary bases differ only in the low bit.
#[inline]
pub fn base_digit(b: u8) -> Option<u64> {
    match b {
        b'A' => Some(0),
        b'T' => Some(1),
        b'G' => Some(2),
        b'C' => Some(3),
        _ => None,
    }
}

/// Encodes an uppercase k-mer into its enumeration index
pub fn encode_kmer(kmer: &[u8]) -> Option<u64> {
    let mut val: u64 = 0;
    for &b in kmer {
        val = (val << 2) | base_digit(b)?;
    }
    Some(val)
}

/// Decodes an enumeration index back into a k-mer string
pub fn decode_kmer(mut code: u64, k: usize) -> String {
    let mut out = vec![b'A'; k];
    for slot in out.iter_mut().rev() {
        *slot = BASES[(code & 3) as usize];
        code >>= 2;
    }
    // BASES is pure ASCII
    String::from_utf8(out).unwrap_or_default()
}

/// Reverse complement of an encoded k-mer of length `k`
#[inline]
pub fn reverse_complement_code(mut code: u64, k: usize) -> u64 {
    let mut rc = 0u64;
    for _ in 0..k {
        rc = (rc << 2) | ((code & 3) ^ 1);
        code >>= 2;
    }
    rc
}

/// Returns the reverse complement of a DNA sequence.
/// Characters outside {A,C,G,T} are kept in place (reversed, not complemented).
#[cfg(test)]
pub(crate) fn reverse_complement(seq: &str) -> String {
    seq.bytes()
        .rev()
        .map(|b| match b {
            b'A' => 'T',
            b'T' => 'A',
            b'G' => 'C',
            b'C' => 'G',
            b'a' => 't',
            b't' => 'a',
            b'g' => 'c',
            b'c' => 'g',
            other => other as char,
        })
        .collect()
}
