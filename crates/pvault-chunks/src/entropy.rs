//! Key-block selection by Shannon entropy
//!
//! The block that carries the symmetric key material is picked among a few
//! random candidates, preferring the one whose hex rendering looks the most
//! random. This is a best-effort heuristic against structurally obvious
//! blocks, not a security guarantee.

use std::collections::HashMap;

use rand::Rng;

use crate::blocks::Block;

/// Shannon entropy (bits per character) of `s`. The empty string has 0.
pub fn shannon_entropy(s: &str) -> f64 {
    let len = s.chars().count();
    if len == 0 {
        return 0.0;
    }

    let mut counts: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *counts.entry(c).or_insert(0) += 1;
    }

    let len = len as f64;
    -counts
        .values()
        .map(|&n| {
            let p = n as f64 / len;
            p * p.log2()
        })
        .sum::<f64>()
}

/// Sample `try_limit` block indices with replacement and return the one with
/// the highest hex entropy. The first sampled wins ties.
///
/// Returns `None` for an empty slice; a `try_limit` of zero samples once.
pub fn select_block<R: Rng + ?Sized>(
    blocks: &[Block],
    try_limit: usize,
    rng: &mut R,
) -> Option<usize> {
    if blocks.is_empty() {
        return None;
    }

    let mut best = (0usize, f64::NEG_INFINITY);
    for _ in 0..try_limit.max(1) {
        let index = rng.gen_range(0..blocks.len());
        let entropy = shannon_entropy(&hex::encode(&blocks[index]));
        if entropy > best.1 {
            best = (index, entropy);
        }
    }
    tracing::trace!(candidates = try_limit, "key block selected");
    Some(best.0)
}
