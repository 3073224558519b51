//! Content analysis for intercepted write payloads
//!
//! Ransomware rewrites files with ciphertext, which is close to uniformly
//! random. Shannon entropy over the byte histogram is the cheap signal we
//! attach to every write so the external classifier can learn from it.

pub mod entropy;

pub use entropy::{shannon_entropy, NO_ENTROPY};
