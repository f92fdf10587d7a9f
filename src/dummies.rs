//! Reconstruction of sentinel-padded source edges.
//!
//! A BOSS graph needs an incoming edge for every represented node. Real
//! (k+1)-mers only provide them for nodes that occur as a destination, so
//! every source node without a predecessor in the set gets a chain of
//! synthetic edges `$ s_0 .. s_{k-2}`, `$$ s_0 .. s_{k-3}`, ..., `$^k s_0`.
//!
//! The chains are grown level by level: each pass appends the `to_prev` of
//! the previous level's fresh dummies and sorts and deduplicates only that
//! tail, keeping the whole procedure at O(n k) comparisons. A final
//! parallel sort restores the total order.
//!
//! Applying the reconstruction to a run that already contains its dummy
//! chains is a no-op: the level-one check finds the sentinel predecessor and
//! generates nothing.

use crate::alphabet::{SENTINEL_CODE, SIGMA};
use crate::collect::{sort_and_dedup, DedupMode, KmerRecord};
use rayon::prelude::*;

/// Extends the sorted, deduplicated run of (k+1)-mers in `kmers` with all
/// required dummy source edges and restores the total order. `k` is the
/// node length.
pub fn reconstruct_source_dummies<const B: usize, R: KmerRecord<B>>(k: usize, kmers: &mut Vec<R>) {
    let edge_len = k + 1;
    let n_real = kmers.len();

    debug_assert!(kmers.windows(2).all(|w| w[0].kmer() <= w[1].kmer()));

    // A source node has a predecessor iff some edge `c s_0 .. s_{k-1}`
    // exists, for any first symbol c. Those candidates are exactly the
    // to_prev rotations of the row itself.
    let needs_chain: Vec<bool> = {
        let sorted = &kmers[..n_real];
        sorted
            .par_iter()
            .map(|record| {
                let x = record.kmer();
                if x.symbol(1) == SENTINEL_CODE {
                    // Already a dummy row; its chain is someone else's concern.
                    return false;
                }
                !(0..SIGMA as u8).any(|c| {
                    let candidate = x.to_prev(edge_len, c);
                    sorted
                        .binary_search_by(|r| r.kmer().cmp(&candidate))
                        .is_ok()
                })
            })
            .collect()
    };

    let mut tail_start = kmers.len();
    for i in 0..n_real {
        if needs_chain[i] {
            let dummy = kmers[i].kmer().to_prev(edge_len, SENTINEL_CODE);
            kmers.push(R::new(dummy, 0));
        }
    }
    sort_and_dedup(kmers, DedupMode::DropDuplicates, tail_start);
    log::debug!(
        "{} dummy edges with sentinel prefix of length 1",
        kmers.len() - tail_start
    );

    for level in 2..=k {
        let previous = tail_start..kmers.len();
        tail_start = kmers.len();
        for i in previous {
            let dummy = kmers[i].kmer().to_prev(edge_len, SENTINEL_CODE);
            kmers.push(R::new(dummy, 0));
        }
        sort_and_dedup(kmers, DedupMode::DropDuplicates, tail_start);
        log::debug!(
            "{} dummy edges with sentinel prefix of length {}",
            kmers.len() - tail_start,
            level
        );
    }

    sort_and_dedup(kmers, DedupMode::None, 0);
}
