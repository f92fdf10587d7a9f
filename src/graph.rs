//! The in-memory succinct BOSS graph.
//!
//! Rows are edges, sorted co-lexicographically by source node with the edge
//! label as tie breaker; row 0 is a reserved sentinel. The W column lives in
//! a wavelet tree, the `last` column in a rank/select bit vector, and `F[c]`
//! holds the index of the last row whose source node ends in a symbol
//! smaller than `c`. All queries are total over the index domain; navigation
//! off the represented rows yields `None`.

use crate::alphabet::{SIGMA, W_WIDTH};
use crate::chunk::BossChunk;
use crate::error::{Error, Result};
use crate::wavelet::WaveletTree;
use byteorder::{LittleEndian, ReadBytesExt};
use simple_sds_sbwt::bit_vector::BitVector;
use simple_sds_sbwt::int_vector::IntVector;
use simple_sds_sbwt::ops::*;
use simple_sds_sbwt::raw_vector::*;
use simple_sds_sbwt::serialize::Serialize;

/// Aggregate counters over a built graph.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GraphStats {
    /// Edges, the reserved row excluded.
    pub num_edges: usize,
    /// Nodes, i.e. rows with `last` set.
    pub num_nodes: usize,
    /// Edges labeled with the sentinel, the reserved row excluded.
    pub num_sentinel_edges: usize,
    /// Edges per real symbol, secondary edges folded into their label.
    pub label_counts: [usize; SIGMA - 1],
    pub k: usize,
    pub canonical: bool,
    pub weighted: bool,
}

#[derive(Clone, PartialEq, Debug)]
pub struct BossGraph {
    w: WaveletTree,
    last: BitVector,
    f: Vec<u64>,
    k: usize,
    sigma: usize,
    canonical: bool,
    weights: Option<IntVector>,
}

impl BossGraph {
    /// Moves a fully assembled chunk into its succinct representation.
    pub fn from_chunk(chunk: BossChunk) -> Self {
        let n = chunk.w.len();
        let w = WaveletTree::new(&chunk.w, W_WIDTH);

        let mut raw = RawVector::with_len(n, false);
        for (i, &bit) in chunk.last.iter().enumerate() {
            if bit {
                raw.set_bit(i, true);
            }
        }
        let mut last = BitVector::from(raw);
        last.enable_rank();
        last.enable_select();

        let weights = if chunk.weights.is_empty() {
            None
        } else {
            let mut iv = IntVector::with_capacity(n, chunk.weight_width).unwrap();
            for &v in chunk.weights.iter() {
                iv.push(v as u64);
            }
            Some(iv)
        };

        let graph = Self {
            w,
            last,
            f: chunk.f,
            k: chunk.k,
            sigma: chunk.sigma,
            canonical: chunk.canonical,
            weights,
        };
        assert!(graph.is_valid());
        graph
    }

    /// Number of rows including the reserved sentinel row.
    pub fn num_rows(&self) -> usize {
        self.w.len()
    }

    /// Number of edges (rows minus the sentinel).
    pub fn num_edges(&self) -> usize {
        self.num_rows() - 1
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn sigma(&self) -> usize {
        self.sigma
    }

    pub fn canonical(&self) -> bool {
        self.canonical
    }

    pub fn is_weighted(&self) -> bool {
        self.weights.is_some()
    }

    /// The multiplicity recorded for edge `e`, if the graph carries weights.
    pub fn edge_weight(&self, e: usize) -> Option<u64> {
        self.weights.as_ref().map(|w| w.get(e))
    }

    /// The F array: `f_array()[c]` is the index of the last row whose source
    /// node ends in a symbol smaller than `c`.
    pub fn f_array(&self) -> &[u64] {
        &self.f
    }

    /// The `last` bit of row `e`: whether it closes its source node's run.
    pub fn is_last_edge(&self, e: usize) -> bool {
        self.last.get(e)
    }

    /// The label of edge `e` with the secondary-edge bit stripped.
    #[inline]
    pub fn edge_label(&self, e: usize) -> u8 {
        (self.w.access(e) as usize % self.sigma) as u8
    }

    /// The raw W cell of edge `e`, secondary bit included.
    #[inline]
    pub fn w_value(&self, e: usize) -> u8 {
        self.w.access(e)
    }

    /// The last symbol of the source node of edge `e`: the largest `c` with
    /// `F[c] < e`.
    pub fn node_last_symbol(&self, e: usize) -> u8 {
        if e == 0 {
            return 0;
        }
        let mut c = self.sigma - 1;
        while c > 0 && self.f[c] as usize >= e {
            c -= 1;
        }
        c as u8
    }

    // Ones of `last` in [0..=i]: the number of complete nodes up to row i.
    #[inline]
    fn rank_last(&self, i: usize) -> usize {
        self.last.rank(i + 1)
    }

    // Row of the r-th (1-based) set bit of `last`.
    #[inline]
    fn select_last(&self, r: usize) -> Option<usize> {
        debug_assert!(r >= 1);
        self.last.select(r - 1)
    }

    // Final row of the edge run containing row e.
    fn succ_last(&self, e: usize) -> usize {
        self.last
            .select(self.last.rank(e))
            .expect("every edge run ends with a set last bit")
    }

    // First row of the node whose final row is `end`.
    fn node_start(&self, end: usize) -> usize {
        let ones_before = self.last.rank(end);
        match ones_before {
            0 => 1,
            r => self.last.select(r - 1).unwrap() + 1,
        }
    }

    // The last row of the destination node of edge e, or None if the
    // destination has no outgoing rows.
    fn fwd(&self, e: usize) -> Option<usize> {
        let c = self.edge_label(e);
        if c == 0 {
            return None;
        }
        // The r-th primary c-edge leads to the r-th node ending in c.
        let r = self.w.rank(c, e + 1);
        let target = self.rank_last(self.f[c as usize] as usize) + r;
        self.select_last(target)
    }

    // The primary incoming edge of the source node of edge e; 0 for rows
    // whose node ends with the sentinel.
    fn bwd(&self, e: usize) -> usize {
        debug_assert!(e >= 1 && e < self.num_rows());
        let c = self.node_last_symbol(e);
        if c == 0 {
            return 0;
        }
        let o = self.rank_last(e - 1) + 1 - self.rank_last(self.f[c as usize] as usize);
        self.w
            .select(c, o - 1)
            .expect("every represented node has an incoming edge")
    }

    /// Follows edge `e` to its destination node and takes the outgoing edge
    /// labeled `c` from there. `None` if the destination has no rows or no
    /// such edge.
    pub fn forward(&self, e: usize, c: u8) -> Option<usize> {
        if e == 0 || c == 0 || (c as usize) >= self.sigma {
            return None;
        }
        let dest_last = self.fwd(e)?;
        let start = self.node_start(dest_last);
        (start..=dest_last).find(|&j| self.edge_label(j) == c)
    }

    /// The edges from `e` forward to the end of its run, `e` included.
    pub fn outgoing(&self, e: usize) -> Vec<usize> {
        if e == 0 || e >= self.num_rows() {
            return Vec::new();
        }
        (e..=self.succ_last(e)).collect()
    }

    /// All edges whose destination node is the source node of `e`.
    pub fn incoming(&self, e: usize) -> Vec<usize> {
        let c = self.node_last_symbol(e);
        if c == 0 {
            return Vec::new();
        }
        let primary = self.bwd(e);
        let mut edges = vec![primary];

        // Secondary edges into the same node trail the primary one before
        // the next primary occurrence of c.
        let bound = self
            .w
            .select(c, self.w.rank(c, primary + 1))
            .unwrap_or(self.num_rows());
        let cs = c + self.sigma as u8;
        let mut r = self.w.rank(cs, primary + 1);
        while let Some(pos) = self.w.select(cs, r) {
            if pos >= bound {
                break;
            }
            edges.push(pos);
            r += 1;
        }
        edges
    }

    /// Number of edges leaving the source node of `e`.
    pub fn outdegree(&self, e: usize) -> usize {
        debug_assert!(e >= 1 && e < self.num_rows());
        let end = self.succ_last(e);
        end - self.node_start(end) + 1
    }

    /// Number of edges entering the source node of `e`.
    pub fn indegree(&self, e: usize) -> usize {
        self.incoming(e).len()
    }

    pub fn has_single_outgoing(&self, e: usize) -> bool {
        self.outdegree(e) == 1
    }

    pub fn has_single_incoming(&self, e: usize) -> bool {
        self.indegree(e) == 1
    }

    /// Reconstructs the source node of edge `e` as `k` symbol codes by
    /// walking backwards. Dummy nodes come out sentinel-padded.
    pub fn node_kmer(&self, e: usize) -> Vec<u8> {
        let mut seq = vec![0u8; self.k];
        let mut cur = e;
        for slot in (0..self.k).rev() {
            let c = self.node_last_symbol(cur);
            seq[slot] = c;
            if c == 0 {
                break; // the rest is sentinel padding
            }
            cur = self.bwd(cur);
        }
        seq
    }

    /// The full (k+1)-mer of edge `e`: source node plus edge label.
    pub fn edge_kmer(&self, e: usize) -> Vec<u8> {
        let mut seq = self.node_kmer(e);
        seq.push(self.edge_label(e));
        seq
    }

    // Rows whose source node ends in symbol c.
    fn symbol_range(&self, c: u8) -> Option<(usize, usize)> {
        let c = c as usize;
        if c >= self.sigma {
            return None;
        }
        let rl = self.f[c] as usize + 1;
        let ru = if c + 1 < self.sigma {
            self.f[c + 1] as usize
        } else {
            self.num_rows() - 1
        };
        if rl > ru {
            None
        } else {
            Some((rl, ru))
        }
    }

    // First row at index >= i whose W cell carries label c, primary or
    // secondary.
    fn succ_w_pair(&self, i: usize, c: u8) -> Option<usize> {
        let a = self.w.select(c, self.w.rank(c, i));
        let b = {
            let cs = c + self.sigma as u8;
            self.w.select(cs, self.w.rank(cs, i))
        };
        match (a, b) {
            (Some(x), Some(y)) => Some(x.min(y)),
            (Some(x), None) => Some(x),
            (None, y) => y,
        }
    }

    // Last row at index <= i whose W cell carries label c, primary or
    // secondary.
    fn pred_w_pair(&self, i: usize, c: u8) -> Option<usize> {
        let pred = |sym: u8| -> Option<usize> {
            match self.w.rank(sym, i + 1) {
                0 => None,
                r => self.w.select(sym, r - 1),
            }
        };
        match (pred(c), pred(c + self.sigma as u8)) {
            (Some(x), Some(y)) => Some(x.max(y)),
            (Some(x), None) => Some(x),
            (None, y) => y,
        }
    }

    /// Looks up the row of a (k+1)-mer given as symbol codes in string
    /// order. Intended for real k-mers; `None` if absent.
    pub fn edge_index(&self, codes: &[u8]) -> Option<usize> {
        assert_eq!(codes.len(), self.k + 1, "expected a (k+1)-mer");
        let node = &codes[..self.k];
        let label = codes[self.k];

        // Rows whose source suffix matches the processed prefix of `node`.
        let (mut rl, mut ru) = self.symbol_range(node[0])?;
        for &c in &node[1..] {
            let j1 = self.succ_w_pair(rl, c).filter(|&j| j <= ru)?;
            let j2 = self.pred_w_pair(ru, c).filter(|&j| j >= rl)?;
            let lo = self.fwd(j1)?;
            let hi = self.fwd(j2)?;
            rl = self.node_start(lo);
            ru = hi;
        }

        self.succ_w_pair(rl, label).filter(|&j| j <= ru)
    }

    /// Structural invariant check: reserved sentinel row, monotone F inside
    /// the row range, aligned columns.
    pub fn is_valid(&self) -> bool {
        self.w.len() == self.last.len()
            && !self.w.is_empty()
            && self.w.access(0) == 0
            && !self.last.get(0)
            && self.f.len() == self.sigma
            && self.f[0] == 0
            && self.f.windows(2).all(|p| p[0] <= p[1])
            && (self.f[self.sigma - 1] as usize) < self.w.len()
            && self
                .weights
                .as_ref()
                .map_or(true, |w| w.len() == self.w.len())
    }

    pub fn stats(&self) -> GraphStats {
        let mut label_counts = [0usize; SIGMA - 1];
        for (i, counts) in label_counts.iter_mut().enumerate() {
            let c = (i + 1) as u8;
            *counts = self.w.count(c) + self.w.count(c + self.sigma as u8);
        }
        GraphStats {
            num_edges: self.num_edges(),
            num_nodes: self.rank_last(self.num_rows() - 1),
            num_sentinel_edges: self.w.count(0) - 1,
            label_counts,
            k: self.k,
            canonical: self.canonical,
            weighted: self.weights.is_some(),
        }
    }

    /// Writes the graph file; load with [`BossGraph::load`].
    pub fn serialize<W: std::io::Write>(&self, out: &mut W) -> std::io::Result<()> {
        self.w.serialize(out)?;
        self.last.serialize(out)?;
        out.write_all(&(self.sigma as u64).to_le_bytes())?;
        for &v in self.f.iter() {
            out.write_all(&v.to_le_bytes())?;
        }
        out.write_all(&(self.k as u64).to_le_bytes())?;
        out.write_all(&[self.canonical as u8])?;
        out.write_all(&[self.weights.is_some() as u8])?;
        if let Some(weights) = &self.weights {
            weights.serialize(out)?;
        }
        Ok(())
    }

    pub fn load<R: std::io::Read>(input: &mut R) -> Result<Self> {
        let w = WaveletTree::load(input)?;
        let mut last = BitVector::load(input)?;
        last.enable_rank();
        last.enable_select();

        let sigma = input.read_u64::<LittleEndian>()? as usize;
        if sigma == 0 || sigma > 1 << (W_WIDTH - 1) {
            return Err(Error::CorruptChunk(format!("invalid alphabet size {}", sigma)));
        }
        let mut f = vec![0u64; sigma];
        for v in f.iter_mut() {
            *v = input.read_u64::<LittleEndian>()?;
        }
        let k = input.read_u64::<LittleEndian>()? as usize;
        let canonical = input.read_u8()? != 0;
        let weighted = input.read_u8()? != 0;
        let weights = if weighted {
            Some(IntVector::load(input)?)
        } else {
            None
        };

        let graph = Self { w, last, f, k, sigma, canonical, weights };
        if graph.k == 0 || !graph.is_valid() {
            return Err(Error::CorruptChunk("graph file fails the validity check".into()));
        }
        Ok(graph)
    }
}
