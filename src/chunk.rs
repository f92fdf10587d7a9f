//! BOSS chunks: the mutable, concatenable precursor of a graph.
//!
//! A chunk holds the three parallel columns (W, last, F) of a prefix-bucket
//! slice of a graph, plus optional per-edge weights and the build metadata.
//! Chunks are assembled from a sorted (k+1)-mer run, serialized to
//! `.dbg.chunk` files, and concatenated into a full [`BossGraph`] when the
//! suffix buckets of all chunks partition the node-suffix space.

use crate::alphabet::{SIGMA, W_WIDTH};
use crate::collect::KmerRecord;
use crate::error::{Error, Result};
use crate::graph::BossGraph;
use crate::kmer::PackedKmer;
use simple_sds_sbwt::bit_vector::BitVector;
use simple_sds_sbwt::int_vector::IntVector;
use simple_sds_sbwt::ops::*;
use simple_sds_sbwt::raw_vector::*;
use simple_sds_sbwt::serialize::Serialize;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Conventional extension of chunk files.
pub const CHUNK_FILE_EXTENSION: &str = ".dbg.chunk";

/// Bits per weight cell; counts saturate at 255.
pub const WEIGHT_WIDTH: usize = 8;

#[derive(Clone, PartialEq, Debug)]
pub struct BossChunk {
    pub(crate) sigma: usize,
    pub(crate) k: usize,
    pub(crate) canonical: bool,
    pub(crate) w: Vec<u8>,
    pub(crate) last: Vec<bool>,
    pub(crate) f: Vec<u64>,
    pub(crate) weights: Vec<u8>, // empty when the chunk is unweighted
    pub(crate) weight_width: usize,
}

impl BossChunk {
    /// An empty chunk: just the reserved sentinel row.
    pub fn new(k: usize, canonical: bool) -> Self {
        assert!(k > 0);
        Self {
            sigma: SIGMA,
            k,
            canonical,
            w: vec![0],
            last: vec![false],
            f: vec![0; SIGMA],
            weights: Vec::new(),
            weight_width: WEIGHT_WIDTH,
        }
    }

    /// Assembles the chunk from a sorted, deduplicated run of (k+1)-mer
    /// records. With `weighted`, per-edge multiplicities are kept for real
    /// edges.
    pub fn from_sorted_run<const B: usize, R: KmerRecord<B>>(
        k: usize,
        records: &[R],
        weighted: bool,
        canonical: bool,
    ) -> Self {
        assert!(k > 0);
        let edge_len = k + 1;
        let n = records.len();
        debug_assert!(records.windows(2).all(|p| p[0].kmer() < p[1].kmer()));

        let mut w: Vec<u8> = Vec::with_capacity(n + 1);
        let mut last: Vec<bool> = Vec::with_capacity(n + 1);
        let mut weights: Vec<u8> = if weighted { Vec::with_capacity(n + 1) } else { Vec::new() };
        let mut f = vec![0u64; SIGMA];

        w.push(0);
        last.push(false);
        if weighted {
            weights.push(0);
        }

        let mut last_f = 0usize;
        let mut curpos = 1u64;

        for i in 0..n {
            let kmer = records[i].kmer();
            let mut cur_w = kmer.symbol(0);
            let cur_f = kmer.symbol(edge_len - 1) as usize;
            debug_assert!((cur_w as usize) < SIGMA);

            let mut last_bit = true;
            if i + 1 < n && PackedKmer::compare_suffix(&kmer, &records[i + 1].kmer(), 0) {
                // A sentinel-labeled edge is redundant once the node has a
                // real outgoing edge.
                if cur_w == 0 && cur_f > 0 {
                    continue;
                }
                last_bit = false;
            }

            // Secondary-edge check: an earlier edge with the same label into
            // the same destination node. The scan stays within the group of
            // rows sharing the (k-1)-symbol destination suffix.
            if cur_w != 0 {
                for j in (0..i).rev() {
                    let prev = records[j].kmer();
                    if !PackedKmer::compare_suffix(&kmer, &prev, 1) {
                        break;
                    }
                    if prev.symbol(0) == cur_w {
                        cur_w += SIGMA as u8;
                        break;
                    }
                }
            }

            w.push(cur_w);
            last.push(last_bit);

            while last_f + 1 < SIGMA && cur_f > last_f {
                last_f += 1;
                f[last_f] = curpos - 1;
            }

            if weighted {
                let count = records[i].count();
                let real = kmer.symbol(0) != 0 && kmer.symbol(1) != 0;
                weights.push(if real && count > 0 { count.min(u8::MAX as u64) as u8 } else { 0 });
            }

            curpos += 1;
        }

        while last_f + 1 < SIGMA {
            last_f += 1;
            f[last_f] = curpos - 1;
        }

        Self {
            sigma: SIGMA,
            k,
            canonical,
            w,
            last,
            f,
            weights,
            weight_width: WEIGHT_WIDTH,
        }
    }

    /// Rows in the chunk, the sentinel row included.
    pub fn size(&self) -> usize {
        self.w.len()
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn canonical(&self) -> bool {
        self.canonical
    }

    pub fn is_weighted(&self) -> bool {
        !self.weights.is_empty()
    }

    /// Appends one row, maintaining F. Only unweighted chunks grow this way.
    pub fn push_row(&mut self, w: u8, node_symbol: u8, last: bool) {
        assert!((w as usize) < 2 * self.sigma);
        assert!((node_symbol as usize) < self.sigma);
        assert!(self.weights.is_empty());
        self.w.push(w);
        self.last.push(last);
        for a in node_symbol as usize + 1..self.sigma {
            self.f[a] += 1;
        }
    }

    /// Concatenates `other` behind this chunk. The suffix buckets must be
    /// disjoint and ordered; metadata has to match.
    pub fn extend(&mut self, other: &BossChunk) -> Result<()> {
        if self.sigma != other.sigma || self.k != other.k || self.canonical != other.canonical {
            return Err(Error::IncompatibleChunk(format!(
                "cannot concatenate (sigma {} vs {}, k {} vs {}, canonical {} vs {})",
                self.sigma, other.sigma, self.k, other.k, self.canonical, other.canonical
            )));
        }
        if other.size() <= 1 {
            return Ok(());
        }
        if self.size() <= 1 {
            *self = other.clone();
            return Ok(());
        }
        if self.is_weighted() != other.is_weighted() {
            return Err(Error::IncompatibleChunk(
                "cannot concatenate weighted and unweighted chunks".into(),
            ));
        }
        if self.is_weighted() && self.weight_width != other.weight_width {
            return Err(Error::IncompatibleChunk(format!(
                "cannot concatenate chunks with weight widths {} and {}",
                self.weight_width, other.weight_width
            )));
        }

        self.w.extend_from_slice(&other.w[1..]);
        self.last.extend_from_slice(&other.last[1..]);
        if self.is_weighted() {
            self.weights.extend_from_slice(&other.weights[1..]);
        }
        for (a, b) in self.f.iter_mut().zip(other.f.iter()) {
            *a += *b;
        }
        Ok(())
    }

    /// Builds the succinct graph from this chunk.
    pub fn into_graph(self) -> BossGraph {
        BossGraph::from_chunk(self)
    }

    /// On-disk layout: packed W, packed last bits, length-prefixed F,
    /// packed weights (possibly empty), then sigma, k and the canonical
    /// flag as u64, everything little-endian.
    pub fn serialize<Wr: Write>(&self, out: &mut Wr) -> std::io::Result<()> {
        let mut w_packed = IntVector::with_capacity(self.w.len(), W_WIDTH).unwrap();
        for &v in self.w.iter() {
            w_packed.push(v as u64);
        }
        w_packed.serialize(out)?;

        let mut raw = RawVector::with_len(self.last.len(), false);
        for (i, &bit) in self.last.iter().enumerate() {
            if bit {
                raw.set_bit(i, true);
            }
        }
        BitVector::from(raw).serialize(out)?;

        (self.f.len() as u64).serialize(out)?;
        for &v in self.f.iter() {
            v.serialize(out)?;
        }

        let mut weights_packed = IntVector::with_capacity(self.weights.len(), self.weight_width).unwrap();
        for &v in self.weights.iter() {
            weights_packed.push(v as u64);
        }
        weights_packed.serialize(out)?;

        (self.sigma as u64).serialize(out)?;
        (self.k as u64).serialize(out)?;
        (self.canonical as u64).serialize(out)?;
        Ok(())
    }

    pub fn load<Rd: Read>(input: &mut Rd) -> Result<Self> {
        let w_packed = IntVector::load(input)?;
        let last_bv = BitVector::load(input)?;

        let f_len = u64::load(input)? as usize;
        if f_len > 1 << (W_WIDTH - 1) {
            return Err(Error::CorruptChunk(format!("implausible F size {}", f_len)));
        }
        let mut f = vec![0u64; f_len];
        for v in f.iter_mut() {
            *v = u64::load(input)?;
        }

        let weights_packed = IntVector::load(input)?;
        let sigma = u64::load(input)? as usize;
        let k = u64::load(input)? as usize;
        let canonical = u64::load(input)? != 0;

        let w: Vec<u8> = (0..w_packed.len()).map(|i| w_packed.get(i) as u8).collect();
        let last: Vec<bool> = (0..last_bv.len()).map(|i| last_bv.get(i)).collect();
        let weights: Vec<u8> = (0..weights_packed.len()).map(|i| weights_packed.get(i) as u8).collect();

        if k == 0
            || sigma == 0
            || w.is_empty()
            || w.len() != last.len()
            || f.len() != sigma
            || (!weights.is_empty() && weights.len() != w.len())
            || w.iter().any(|&v| v as usize >= 2 * sigma)
        {
            return Err(Error::CorruptChunk("chunk shape invariants violated".into()));
        }

        Ok(Self {
            sigma,
            k,
            canonical,
            w,
            last,
            f,
            weights,
            weight_width: weights_packed.width(),
        })
    }

    pub fn serialize_to_file(&self, path: &Path) -> Result<()> {
        let mut out = BufWriter::new(std::fs::File::create(path)?);
        self.serialize(&mut out)?;
        out.flush()?;
        Ok(())
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let mut input = BufReader::new(std::fs::File::open(path)?);
        Self::load(&mut input)
    }
}

/// Concatenates chunk files whose suffix buckets partition the node-suffix
/// space, in bucket order, into a full graph. Disjointness of the buckets is
/// the caller's contract; metadata compatibility is enforced.
pub fn concatenate_chunks<P: AsRef<Path>>(paths: &[P]) -> Result<BossGraph> {
    if paths.is_empty() {
        return Err(Error::CorruptChunk("no chunk files to concatenate".into()));
    }

    let mut combined: Option<BossChunk> = None;
    for path in paths {
        let chunk = BossChunk::load_from_file(path.as_ref())?;
        log::info!(
            "chunk {} loaded: {} rows",
            path.as_ref().display(),
            chunk.size()
        );
        match combined.as_mut() {
            None => combined = Some(chunk),
            Some(acc) => acc.extend(&chunk)?,
        }
    }

    Ok(combined.unwrap().into_graph())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pack(s: &str) -> PackedKmer<1> {
        let codes: Vec<u8> = s
            .bytes()
            .map(|c| if c == b'$' { 0 } else { crate::alphabet::encode(c) })
            .collect();
        PackedKmer::from_codes(&codes)
    }

    fn sorted_run(strs: &[&str]) -> Vec<PackedKmer<1>> {
        let mut v: Vec<PackedKmer<1>> = strs.iter().map(|s| pack(s)).collect();
        v.sort();
        v
    }

    #[test]
    fn single_path_chunk() {
        // k = 3 over ACGT with its dummy chain: one primary edge per row.
        let run = sorted_run(&["$$$A", "$$AC", "$ACG", "ACGT"]);
        let chunk = BossChunk::from_sorted_run(3, &run, false, false);

        assert_eq!(chunk.w, vec![0, 1, 2, 3, 4]);
        assert_eq!(chunk.last, vec![false, true, true, true, true]);
        assert_eq!(chunk.f, vec![0, 1, 2, 3, 4]);
        assert_eq!(chunk.size(), 5);
    }

    #[test]
    fn secondary_edges_are_marked() {
        // $AC->G and TAC->G share the destination node ACG: the later row
        // carries G + sigma.
        let run = sorted_run(&["$$$A", "$$AC", "GTAC", "$ACG", "TACG", "ACGT", "CGTA"]);
        let chunk = BossChunk::from_sorted_run(3, &run, false, false);

        assert_eq!(chunk.w, vec![0, 1, 2, 2, 3, 3 + SIGMA as u8, 4, 1]);
        assert_eq!(chunk.last, vec![false, true, true, true, true, true, true, true]);
        assert_eq!(chunk.f, vec![0, 1, 3, 5, 6]);
    }

    #[test]
    fn shared_source_clears_last() {
        let run = sorted_run(&["ACGA", "ACGT", "$ACG", "$$AC", "$$$A"]);
        let chunk = BossChunk::from_sorted_run(3, &run, false, false);
        // Node ACG has two outgoing edges; only the second is last.
        assert_eq!(chunk.w, vec![0, 1, 2, 3, 1, 4]);
        assert_eq!(chunk.last, vec![false, true, true, true, false, true]);
    }

    #[test]
    fn redundant_sentinel_edge_is_skipped() {
        // $AC carries both a sentinel edge and a real one: the sentinel
        // edge is redundant.
        let run = sorted_run(&["$AC$", "$ACG"]);
        let chunk = BossChunk::from_sorted_run(3, &run, false, false);
        assert_eq!(chunk.w, vec![0, 3]);
        assert_eq!(chunk.last, vec![false, true]);
    }

    #[test]
    fn sentinel_node_keeps_its_sentinel_edge() {
        // The all-sentinel source node has no real symbols, so its sentinel
        // edge stays.
        let run = sorted_run(&["$$$$", "$$$A"]);
        let chunk = BossChunk::from_sorted_run(3, &run, false, false);
        assert_eq!(chunk.w, vec![0, 0, 1]);
        assert_eq!(chunk.last, vec![false, false, true]);
    }

    #[test]
    fn weights_for_real_edges_only() {
        let run: Vec<(PackedKmer<1>, u8)> = {
            let mut v = vec![
                (pack("$$$A"), 0),
                (pack("$$AC"), 0),
                (pack("$ACG"), 0),
                (pack("ACGT"), 7),
            ];
            v.sort_by(|a, b| a.0.cmp(&b.0));
            v
        };
        let chunk = BossChunk::from_sorted_run(3, &run, true, false);
        assert_eq!(chunk.weights, vec![0, 0, 0, 0, 7]);
    }

    #[test]
    fn push_row_matches_bulk_build() {
        let run = sorted_run(&["$$$A", "$$AC", "$ACG", "ACGT"]);
        let bulk = BossChunk::from_sorted_run(3, &run, false, false);

        let mut incremental = BossChunk::new(3, false);
        for (w, sym, last) in [(1u8, 0u8, true), (2, 1, true), (3, 2, true), (4, 3, true)] {
            incremental.push_row(w, sym, last);
        }
        assert_eq!(bulk, incremental);
    }

    #[test]
    fn serialize_load_roundtrip() {
        let run = sorted_run(&["$$$A", "$$AC", "GTAC", "$ACG", "TACG", "ACGT", "CGTA"]);
        let chunk = BossChunk::from_sorted_run(3, &run, false, true);

        let mut buf = Vec::<u8>::new();
        chunk.serialize(&mut buf).unwrap();
        let loaded = BossChunk::load(&mut buf.as_slice()).unwrap();
        assert_eq!(chunk, loaded);
    }

    #[test]
    fn load_rejects_nonsense() {
        assert!(matches!(
            BossChunk::load(&mut [0u8; 4].as_slice()),
            Err(Error::Io(_)) | Err(Error::CorruptChunk(_))
        ));
    }

    #[test]
    fn extend_concatenates_and_sums_f() {
        let left = BossChunk::from_sorted_run(3, &sorted_run(&["$$$A", "$$AC"]), false, false);
        let right = BossChunk::from_sorted_run(3, &sorted_run(&["$ACG", "ACGT"]), false, false);

        let mut combined = left.clone();
        combined.extend(&right).unwrap();

        let monolithic =
            BossChunk::from_sorted_run(3, &sorted_run(&["$$$A", "$$AC", "$ACG", "ACGT"]), false, false);
        assert_eq!(combined, monolithic);
    }

    #[test]
    fn extend_rejects_mismatched_metadata() {
        let a = BossChunk::new(3, false);
        let b = BossChunk::from_sorted_run(4, &sorted_run(&["$$$$A"]), false, false);
        let mut a2 = a.clone();
        assert!(matches!(a2.extend(&b), Err(Error::IncompatibleChunk(_))));

        let c = BossChunk::from_sorted_run(3, &sorted_run(&["$$$A"]), false, true);
        let mut a3 = a;
        assert!(matches!(a3.extend(&c), Err(Error::IncompatibleChunk(_))));
    }
}
