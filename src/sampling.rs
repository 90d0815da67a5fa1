//! Negative edge sampling.
//!
//! Draws `(src, dst)` pairs uniformly from the bipartite space
//! `[0, num_src) × [0, num_dst)`, excluding the existing edges. The result
//! has no duplicates and matches the size of the existing batch whenever
//! enough non-edges exist.
//!
//! # Strategy
//!
//! | Density of the request | Method |
//! |------------------------|--------|
//! | sparse (request ≤ 1/4 of the free pairs) | rejection sampling |
//! | dense | enumerate free pairs, sample without replacement |

use std::collections::HashSet;

use rand::seq::index;
use rand::Rng;
use tracing::warn;

use crate::hetero::EdgeIndex;

/// Rejection sampling gives up after this many draws per requested edge and
/// falls back to enumeration.
const MAX_TRIALS_PER_EDGE: usize = 64;

/// Sample negatives for `existing`.
///
/// # Arguments
/// * `existing` - Positive edges to avoid
/// * `num_nodes` - `(num_src, num_dst)`
/// * `rng` - Randomness source
///
/// # Returns
/// `min(|existing|, free pairs)` distinct pairs disjoint from `existing`.
pub fn negative_sampling<R: Rng + ?Sized>(
    existing: &EdgeIndex,
    num_nodes: (usize, usize),
    rng: &mut R,
) -> EdgeIndex {
    let (num_src, num_dst) = num_nodes;
    let taken = existing.pair_set();
    let total = num_src.saturating_mul(num_dst);
    let in_space = taken
        .iter()
        .filter(|&&(s, d)| (s as usize) < num_src && (d as usize) < num_dst)
        .count();
    let free = total - in_space;

    let wanted = existing.num_edges();
    let count = wanted.min(free);
    if count < wanted {
        warn!(
            wanted,
            available = free,
            num_src,
            num_dst,
            "not enough non-edges for a full negative sample"
        );
    }
    if count == 0 {
        return EdgeIndex::new();
    }

    if count.saturating_mul(4) <= free {
        if let Some(sample) = rejection_sample(&taken, num_nodes, count, rng) {
            return sample;
        }
    }
    enumerate_sample(&taken, num_nodes, count, rng)
}

fn rejection_sample<R: Rng + ?Sized>(
    taken: &HashSet<(u32, u32)>,
    (num_src, num_dst): (usize, usize),
    count: usize,
    rng: &mut R,
) -> Option<EdgeIndex> {
    let mut seen = HashSet::with_capacity(count);
    let mut out = EdgeIndex::new();
    for _ in 0..count.saturating_mul(MAX_TRIALS_PER_EDGE) {
        let pair = (
            rng.gen_range(0..num_src) as u32,
            rng.gen_range(0..num_dst) as u32,
        );
        if taken.contains(&pair) || !seen.insert(pair) {
            continue;
        }
        out.push(pair.0, pair.1);
        if out.num_edges() == count {
            return Some(out);
        }
    }
    None
}

fn enumerate_sample<R: Rng + ?Sized>(
    taken: &HashSet<(u32, u32)>,
    (num_src, num_dst): (usize, usize),
    count: usize,
    rng: &mut R,
) -> EdgeIndex {
    let free: Vec<(u32, u32)> = (0..num_src as u32)
        .flat_map(|s| (0..num_dst as u32).map(move |d| (s, d)))
        .filter(|pair| !taken.contains(pair))
        .collect();

    index::sample(rng, free.len(), count)
        .into_iter()
        .map(|i| free[i])
        .collect()
}
