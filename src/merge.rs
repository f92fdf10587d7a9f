//! Merging two BOSS graphs by lock-step comparator traversal.
//!
//! Both graphs' rows are walked in co-lexicographic order through cursors
//! that decode each real edge back into its (k+1)-mer. The comparator
//! orders two cursor positions by destination-node suffix and edge label;
//! equal edges collapse into one. Sentinel rows are not copied: the merged
//! run is completed through dummy reconstruction and chunk assembly, which
//! recomputes the dummy chains, the `last` bits and the secondary-edge
//! marks. A merge therefore yields exactly the graph a monolithic build of
//! the united k-mer set would.

use crate::alphabet::BITS_PER_SYMBOL;
use crate::chunk::BossChunk;
use crate::dummies::reconstruct_source_dummies;
use crate::error::{Error, Result};
use crate::graph::BossGraph;
use crate::kmer::PackedKmer;

// Walks the real edges of a graph in row order, decoding each row into its
// (k+1)-mer codes.
struct RealEdgeCursor<'a> {
    graph: &'a BossGraph,
    row: usize,
    current: Option<Vec<u8>>,
}

impl<'a> RealEdgeCursor<'a> {
    fn new(graph: &'a BossGraph) -> Self {
        let mut cursor = Self { graph, row: 0, current: None };
        cursor.advance();
        cursor
    }

    fn peek(&self) -> Option<&[u8]> {
        self.current.as_deref()
    }

    fn advance(&mut self) {
        self.current = None;
        while self.current.is_none() {
            self.row += 1;
            if self.row >= self.graph.num_rows() {
                return;
            }
            let codes = self.graph.edge_kmer(self.row);
            // Real rows have no sentinel anywhere: a sentinel-padded node
            // starts with one, a sink edge is labeled with one.
            if codes[0] != 0 && codes[codes.len() - 1] != 0 {
                self.current = Some(codes);
            }
        }
    }
}

fn merged_graph<const B: usize>(g1: &BossGraph, g2: &BossGraph) -> BossGraph {
    let k = g1.k();
    let mut run: Vec<PackedKmer<B>> = Vec::new();

    let mut c1 = RealEdgeCursor::new(g1);
    let mut c2 = RealEdgeCursor::new(g2);

    loop {
        let next = match (c1.peek(), c2.peek()) {
            (None, None) => break,
            (Some(a), None) => {
                let x = PackedKmer::<B>::from_codes(a);
                c1.advance();
                x
            }
            (None, Some(b)) => {
                let x = PackedKmer::<B>::from_codes(b);
                c2.advance();
                x
            }
            (Some(a), Some(b)) => {
                let x = PackedKmer::<B>::from_codes(a);
                let y = PackedKmer::<B>::from_codes(b);
                match x.cmp(&y) {
                    std::cmp::Ordering::Less => {
                        c1.advance();
                        x
                    }
                    std::cmp::Ordering::Greater => {
                        c2.advance();
                        y
                    }
                    std::cmp::Ordering::Equal => {
                        c1.advance();
                        c2.advance();
                        x
                    }
                }
            }
        };
        debug_assert!(run.last().map_or(true, |p| *p < next));
        run.push(next);
    }

    log::info!(
        "merged {} and {} edges into {} distinct real edges",
        g1.num_edges(),
        g2.num_edges(),
        run.len()
    );

    reconstruct_source_dummies(k, &mut run);
    BossChunk::from_sorted_run(k, &run, false, g1.canonical()).into_graph()
}

/// Merges two graphs of equal k and alphabet into one. Deterministic; the
/// only failure is metadata incompatibility.
pub fn merge(g1: &BossGraph, g2: &BossGraph) -> Result<BossGraph> {
    if g1.k() != g2.k() || g1.sigma() != g2.sigma() || g1.canonical() != g2.canonical() {
        return Err(Error::IncompatibleChunk(format!(
            "cannot merge graphs (k {} vs {}, sigma {} vs {}, canonical {} vs {})",
            g1.k(),
            g2.k(),
            g1.sigma(),
            g2.sigma(),
            g1.canonical(),
            g2.canonical()
        )));
    }

    let bits = (g1.k() + 1) * BITS_PER_SYMBOL;
    let graph = if bits <= 64 {
        merged_graph::<1>(g1, g2)
    } else if bits <= 128 {
        merged_graph::<2>(g1, g2)
    } else {
        merged_graph::<4>(g1, g2)
    };
    Ok(graph)
}
