//! A builder pattern interface for constructing BOSS chunks and graphs.
//!
//! The builder fixes the configuration, then dispatches to the smallest
//! packed k-mer width that fits k+1 symbols: 64, 128 or 256 bits. The
//! width-tagged [`ChunkConstructor`] drives a single generic pipeline:
//! collect, reconstruct dummies (unless a suffix filter is active), and
//! assemble the chunk.

use crate::alphabet::{self, BITS_PER_SYMBOL, SENTINEL_CODE};
use crate::chunk::BossChunk;
use crate::collect::{DedupMode, KmerCollector, KmerRecord, BATCH_SIZE};
use crate::dummies::reconstruct_source_dummies;
use crate::error::{Error, Result};
use crate::extract::KmerExtractor;
use crate::graph::BossGraph;
use crate::kmer::{max_symbols, PackedKmer};

/// The longest supported node length: k+1 symbols must fit 256 bits.
pub const MAX_K: usize = max_symbols::<4>() - 1;

/// Configuration for building a BOSS graph or chunk.
#[derive(Clone, Debug)]
pub struct BossBuilder {
    k: usize,
    canonical: bool,
    filter_suffix: Vec<u8>,
    num_threads: usize,
    preallocated_bytes: usize,
    count_kmers: bool,
    dedup: Option<DedupMode>,
    batch_size: usize,
}

impl Default for BossBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BossBuilder {
    /// Defaults: k = 31, forward strand only, no suffix filter, all
    /// available hardware threads, no preallocation, no counting.
    pub fn new() -> Self {
        Self {
            k: 31,
            canonical: false,
            filter_suffix: Vec::new(),
            num_threads: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            preallocated_bytes: 0,
            count_kmers: false,
            dedup: None,
            batch_size: BATCH_SIZE,
        }
    }

    /// Node length of the graph; edges are (k+1)-mers.
    pub fn k(mut self, k: usize) -> Self {
        self.k = k;
        self
    }

    /// Canonicalize each k-mer to the smaller of itself and its reverse
    /// complement.
    pub fn canonical(mut self, enable: bool) -> Self {
        self.canonical = enable;
        self
    }

    /// Restrict collection to k-mers whose source node ends with `suffix`
    /// (ASCII over the alphabet plus `$`). The all-`$` suffix selects the
    /// sentinel bucket.
    pub fn filter_suffix(mut self, suffix: &[u8]) -> Self {
        self.filter_suffix = suffix.to_vec();
        self
    }

    pub fn num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads.max(1);
        self
    }

    /// Bytes to reserve up front for the k-mer container.
    pub fn preallocated_bytes(mut self, bytes: usize) -> Self {
        self.preallocated_bytes = bytes;
        self
    }

    /// Keep saturating per-k-mer multiplicities and store them as edge
    /// weights.
    pub fn count_kmers(mut self, enable: bool) -> Self {
        self.count_kmers = enable;
        self
    }

    /// Override the deduplication mode; by default counting builds use
    /// saturating counts and plain builds drop duplicates.
    pub fn dedup_mode(mut self, mode: DedupMode) -> Self {
        self.dedup = Some(mode);
        self
    }

    /// Bytes of buffered sequence per released extraction task.
    pub fn batch_size(mut self, bytes: usize) -> Self {
        self.batch_size = bytes.max(1);
        self
    }

    fn dedup_mode_for_build(&self) -> DedupMode {
        self.dedup.unwrap_or(if self.count_kmers {
            DedupMode::SaturatingCount
        } else {
            DedupMode::DropDuplicates
        })
    }

    /// Creates the width-dispatched constructor for streaming sequences in.
    pub fn constructor(&self) -> Result<ChunkConstructor> {
        assert!(self.k > 0, "node length must be positive");
        let suffix = alphabet::encode_filter_suffix(&self.filter_suffix)
            .expect("filter suffix must be over the alphabet plus '$'");
        assert!(suffix.len() <= self.k, "filter suffix longer than the node length");

        let bits = (self.k + 1) * BITS_PER_SYMBOL;
        let ctor = if self.count_kmers {
            if bits <= 64 {
                ChunkConstructor::Counting64(ChunkBuilder::create(self, suffix))
            } else if bits <= 128 {
                ChunkConstructor::Counting128(ChunkBuilder::create(self, suffix))
            } else if bits <= 256 {
                ChunkConstructor::Counting256(ChunkBuilder::create(self, suffix))
            } else {
                return Err(Error::UnsupportedK(self.k, MAX_K));
            }
        } else if bits <= 64 {
            ChunkConstructor::Plain64(ChunkBuilder::create(self, suffix))
        } else if bits <= 128 {
            ChunkConstructor::Plain128(ChunkBuilder::create(self, suffix))
        } else if bits <= 256 {
            ChunkConstructor::Plain256(ChunkBuilder::create(self, suffix))
        } else {
            return Err(Error::UnsupportedK(self.k, MAX_K));
        };
        Ok(ctor)
    }

    /// Builds the full graph from in-memory sequences.
    pub fn build_from_slices(&self, seqs: &[&[u8]]) -> Result<BossGraph> {
        self.build_chunk_from_slices(seqs).map(BossChunk::into_graph)
    }

    /// Builds a chunk from in-memory sequences (a full-graph chunk unless a
    /// suffix filter is configured).
    pub fn build_chunk_from_slices(&self, seqs: &[&[u8]]) -> Result<BossChunk> {
        let mut ctor = self.constructor()?;
        for seq in seqs {
            ctor.add_sequence(seq, 1)?;
        }
        ctor.build_chunk()
    }
}

/// One width-instantiated build pipeline.
pub struct ChunkBuilder<R: KmerRecord<B>, const B: usize> {
    collector: KmerCollector<R, B>,
    k: usize,
    canonical: bool,
    num_threads: usize,
}

impl<R: KmerRecord<B>, const B: usize> ChunkBuilder<R, B> {
    fn create(config: &BossBuilder, suffix: Vec<u8>) -> Self {
        let seed_sentinel_row = !suffix.is_empty() && suffix.iter().all(|&c| c == SENTINEL_CODE);
        let extractor = KmerExtractor::new(config.k + 1, config.canonical, suffix);
        let mut collector = KmerCollector::with_batch_size(
            extractor,
            config.dedup_mode_for_build(),
            config.num_threads,
            config.preallocated_bytes,
            config.batch_size,
        );
        if seed_sentinel_row {
            // The sentinel bucket owns the all-$ row.
            collector.insert_record(R::new(PackedKmer::zero(), 0));
        }
        Self {
            collector,
            k: config.k,
            canonical: config.canonical,
            num_threads: config.num_threads,
        }
    }

    pub fn add_sequence(&mut self, seq: &[u8], count: u64) -> Result<()> {
        self.collector.add_sequence(seq, count)
    }

    pub fn add_sequences<G>(&mut self, generate: G) -> Result<()>
    where
        G: FnOnce(&mut dyn FnMut(&[u8], u64)) + Send + 'static,
    {
        self.collector.add_sequences(generate)
    }

    pub fn build_chunk(self) -> Result<BossChunk> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.num_threads)
            .build()
            .unwrap();
        let Self { collector, k, canonical, .. } = self;
        pool.install(move || {
            let suffix_length = collector.suffix_length();
            let mut run = collector.finish()?;

            if suffix_length == 0 {
                log::info!("reconstructing dummy source edges");
                reconstruct_source_dummies(k, &mut run);
            }

            log::info!("assembling the chunk from {} rows", run.len());
            Ok(BossChunk::from_sorted_run(k, &run, R::WEIGHTED, canonical))
        })
    }
}

/// A chunk constructor tagged by k-mer width and record shape.
pub enum ChunkConstructor {
    Plain64(ChunkBuilder<PackedKmer<1>, 1>),
    Plain128(ChunkBuilder<PackedKmer<2>, 2>),
    Plain256(ChunkBuilder<PackedKmer<4>, 4>),
    Counting64(ChunkBuilder<(PackedKmer<1>, u8), 1>),
    Counting128(ChunkBuilder<(PackedKmer<2>, u8), 2>),
    Counting256(ChunkBuilder<(PackedKmer<4>, u8), 4>),
}

impl ChunkConstructor {
    /// Accepts one sequence with a multiplicity.
    pub fn add_sequence(&mut self, seq: &[u8], count: u64) -> Result<()> {
        match self {
            Self::Plain64(b) => b.add_sequence(seq, count),
            Self::Plain128(b) => b.add_sequence(seq, count),
            Self::Plain256(b) => b.add_sequence(seq, count),
            Self::Counting64(b) => b.add_sequence(seq, count),
            Self::Counting128(b) => b.add_sequence(seq, count),
            Self::Counting256(b) => b.add_sequence(seq, count),
        }
    }

    /// Accepts a sequence generator, run once in a worker.
    pub fn add_sequences<G>(&mut self, generate: G) -> Result<()>
    where
        G: FnOnce(&mut dyn FnMut(&[u8], u64)) + Send + 'static,
    {
        match self {
            Self::Plain64(b) => b.add_sequences(generate),
            Self::Plain128(b) => b.add_sequences(generate),
            Self::Plain256(b) => b.add_sequences(generate),
            Self::Counting64(b) => b.add_sequences(generate),
            Self::Counting128(b) => b.add_sequences(generate),
            Self::Counting256(b) => b.add_sequences(generate),
        }
    }

    /// Finishes collection and assembles the chunk.
    pub fn build_chunk(self) -> Result<BossChunk> {
        match self {
            Self::Plain64(b) => b.build_chunk(),
            Self::Plain128(b) => b.build_chunk(),
            Self::Plain256(b) => b.build_chunk(),
            Self::Counting64(b) => b.build_chunk(),
            Self::Counting128(b) => b.build_chunk(),
            Self::Counting256(b) => b.build_chunk(),
        }
    }

    /// Finishes collection and builds the succinct graph.
    pub fn build_graph(self) -> Result<BossGraph> {
        self.build_chunk().map(BossChunk::into_graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alphabet::SIGMA;

    fn encode_kmer(s: &str) -> Vec<u8> {
        s.bytes()
            .map(|c| if c == b'$' { 0 } else { alphabet::encode(c) })
            .collect()
    }

    #[test_log::test]
    fn single_kmer_graph() {
        // k = 3 over ACGT: one real edge plus three dummy sources.
        let graph = BossBuilder::new()
            .batch_size(1 << 12)
            .k(3)
            .num_threads(1)
            .build_from_slices(&[b"ACGT"])
            .unwrap();

        assert!(graph.is_valid());
        assert_eq!(graph.num_rows(), 5);
        assert_eq!(graph.f_array(), &[0, 1, 2, 3, 4]);

        let stats = graph.stats();
        assert_eq!(stats.num_edges, 4);
        assert_eq!(stats.num_nodes, 4);
        assert_eq!(stats.num_sentinel_edges, 0);
        assert_eq!(stats.label_counts, [1, 1, 1, 1]);

        // The one non-dummy edge is labeled T and is primary.
        let e = graph.edge_index(&encode_kmer("ACGT")).unwrap();
        assert_eq!(graph.edge_label(e), 4);
        assert_eq!(graph.w_value(e), 4);
        assert_eq!(graph.edge_kmer(e), encode_kmer("ACGT"));
    }

    #[test]
    fn empty_input_yields_the_sentinel_graph() {
        let graph = BossBuilder::new()
            .batch_size(1 << 12)
            .k(3)
            .num_threads(1)
            .build_from_slices(&[])
            .unwrap();
        assert!(graph.is_valid());
        assert_eq!(graph.num_rows(), 1);
        assert_eq!(graph.num_edges(), 0);
    }

    #[test]
    fn too_short_sequences_are_ignored() {
        let graph = BossBuilder::new()
            .batch_size(1 << 12)
            .k(3)
            .num_threads(1)
            .build_from_slices(&[b"ACG", b"A", b""])
            .unwrap();
        assert_eq!(graph.num_rows(), 1);
    }

    #[test]
    fn forward_follows_overlaps() {
        // S2: ACGTACG, k = 3.
        let graph = BossBuilder::new()
            .batch_size(1 << 12)
            .k(3)
            .num_threads(1)
            .build_from_slices(&[b"ACGTACG"])
            .unwrap();

        let acgt = graph.edge_index(&encode_kmer("ACGT")).unwrap();
        let cgta = graph.edge_index(&encode_kmer("CGTA")).unwrap();
        assert_eq!(graph.forward(acgt, alphabet::encode(b'A')), Some(cgta));
        assert_eq!(graph.forward(acgt, alphabet::encode(b'C')), None);
    }

    #[test]
    fn canonical_build_ignores_strand() {
        // Property: build(S) == build(revcomp(S)) in canonical mode.
        let seq = b"ACGGTTACCAGT".to_vec();
        let mut rc = seq.clone();
        alphabet::reverse_complement_in_place(&mut rc);

        let builder = BossBuilder::new().batch_size(1 << 12).k(4).canonical(true).num_threads(1);
        let g1 = builder.build_from_slices(&[&seq]).unwrap();
        let g2 = builder.build_from_slices(&[&rc]).unwrap();
        assert_eq!(g1, g2);

        // ACGT is its own reverse complement: the canonical build has the
        // same rows as the plain one (only the mode flag differs).
        let b3 = BossBuilder::new().batch_size(1 << 12).k(3).canonical(true).num_threads(1);
        let fwd = b3.build_from_slices(&[b"ACGT"]).unwrap();
        let plain = BossBuilder::new().batch_size(1 << 12).k(3).num_threads(1).build_from_slices(&[b"ACGT"]).unwrap();
        assert_eq!(fwd.num_rows(), plain.num_rows());
        assert_eq!(fwd.f_array(), plain.f_array());
        for e in 0..fwd.num_rows() {
            assert_eq!(fwd.w_value(e), plain.w_value(e));
            assert_eq!(fwd.is_last_edge(e), plain.is_last_edge(e));
        }
    }

    #[test]
    fn counting_build_saturates_weights() {
        // S4: the A->A self-edge accumulates 100 + 200, clamped at 255.
        let builder = BossBuilder::new().batch_size(1 << 12).k(3).count_kmers(true).num_threads(1);
        let mut ctor = builder.constructor().unwrap();
        ctor.add_sequence(b"AAAA", 100).unwrap();
        ctor.add_sequence(b"AAAA", 200).unwrap();
        let graph = ctor.build_graph().unwrap();

        assert!(graph.is_weighted());
        let e = graph.edge_index(&encode_kmer("AAAA")).unwrap();
        assert_eq!(graph.edge_weight(e), Some(255));

        // Dummy rows carry no weight.
        let dummy = graph.edge_index(&encode_kmer("$$$A")).unwrap_or(1);
        assert_eq!(graph.edge_weight(dummy), Some(0));
    }

    #[test]
    fn chunked_build_equals_monolithic() {
        // S5: suffix buckets {A, C} and {G, T} of ACGTACGT, serialized and
        // concatenated, give the monolithic graph.
        let seqs: &[&[u8]] = &[b"ACGTACGT"];
        let monolithic = BossBuilder::new()
            .batch_size(1 << 12)
            .k(3)
            .num_threads(1)
            .build_from_slices(seqs)
            .unwrap();

        let bucket = |suffix: &[u8]| -> BossChunk {
            BossBuilder::new()
                .batch_size(1 << 12)
                .k(3)
                .num_threads(1)
                .filter_suffix(suffix)
                .build_chunk_from_slices(seqs)
                .unwrap()
        };

        let mut ac = bucket(b"A");
        ac.extend(&bucket(b"C")).unwrap();
        let mut gt = bucket(b"G");
        gt.extend(&bucket(b"T")).unwrap();

        let dir = std::env::temp_dir().join(format!("bossdbg-s5-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let p1 = dir.join(format!("ac{}", crate::chunk::CHUNK_FILE_EXTENSION));
        let p2 = dir.join(format!("gt{}", crate::chunk::CHUNK_FILE_EXTENSION));
        ac.serialize_to_file(&p1).unwrap();
        gt.serialize_to_file(&p2).unwrap();

        let concatenated = crate::chunk::concatenate_chunks(&[&p1, &p2]).unwrap();
        std::fs::remove_dir_all(&dir).unwrap();

        assert_eq!(concatenated, monolithic);
    }

    #[test]
    fn sentinel_bucket_is_seeded() {
        let chunk = BossBuilder::new()
            .batch_size(1 << 12)
            .k(3)
            .num_threads(1)
            .filter_suffix(b"$")
            .build_chunk_from_slices(&[b"ACGTACGT"])
            .unwrap();
        // Only the seeded all-$ row falls into the sentinel bucket here.
        assert_eq!(chunk.size(), 2);
    }

    #[test]
    fn wide_kmer_widths() {
        // k = 25 exercises the 128-bit path, k = 45 the 256-bit one.
        for k in [25usize, 45] {
            let seq: Vec<u8> = b"ACGT".iter().cycle().take(3 * k).copied().collect();
            let graph = BossBuilder::new()
                .batch_size(1 << 12)
                .k(k)
                .num_threads(1)
                .build_from_slices(&[&seq])
                .unwrap();
            assert!(graph.is_valid());
            assert!(graph.num_edges() > 0);
            let first = seq[..k + 1]
                .iter()
                .map(|&c| alphabet::encode(c))
                .collect::<Vec<u8>>();
            let e = graph.edge_index(&first).unwrap();
            assert_eq!(graph.edge_kmer(e), first);
        }
    }

    #[test]
    fn unsupported_k_is_rejected() {
        assert!(matches!(
            BossBuilder::new().k(MAX_K + 1).constructor(),
            Err(Error::UnsupportedK(_, _))
        ));
        assert!(BossBuilder::new().batch_size(1 << 12).k(MAX_K).num_threads(1).constructor().is_ok());
    }

    #[test]
    fn sigma_is_the_code_space() {
        let graph = BossBuilder::new()
            .batch_size(1 << 12)
            .k(3)
            .num_threads(1)
            .build_from_slices(&[b"ACGT"])
            .unwrap();
        assert_eq!(graph.sigma(), SIGMA);
    }
}
