//! Shannon entropy of a byte buffer, in bits per byte.
//!
//! ```text
//! H(X) = - Σ p(b) · log2 p(b)      over byte values b with p(b) > 0
//!
//!   0.0  → every byte identical (e.g. a zero-filled block)
//!   8.0  → every byte value equally likely (encrypted / compressed data)
//! ```

/// Sentinel recorded for operations that carry no payload (read, rename, ...).
pub const NO_ENTROPY: f64 = -1.0;

/// Compute the Shannon entropy of `data`.
///
/// An empty buffer has no distribution to measure and yields `0.0`.
pub fn shannon_entropy(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }

    let mut counts = [0u64; 256];
    for &byte in data {
        counts[byte as usize] += 1;
    }

    let len = data.len() as f64;
    counts
        .iter()
        .filter(|&&count| count > 0)
        .map(|&count| {
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}
