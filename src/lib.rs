//! # Introduction
//!
//! This crate implements the construction, representation and merging of a
//! succinct [BOSS de Bruijn graph](`BossGraph`) over the DNA alphabet, the
//! index structure used to store very large k-mer collections (genomic and
//! metagenomic read sets) in a few bits per edge.
//!
//! An edge of the graph is a (k+1)-mer: a k-symbol source node plus one
//! outgoing symbol. Edges are sorted co-lexicographically by source node and
//! stored as three parallel columns: the outgoing labels W (in a wavelet
//! tree), the node-boundary bits `last` (in a rank/select bit vector) and
//! the cumulative symbol offsets F. Synthetic, sentinel-padded source edges
//! are inserted so that every represented node has an incoming edge, which
//! is what makes rank/select navigation work.
//!
//! # API quick start
//!
//! ```
//! use bossdbg::BossBuilder;
//!
//! // Build a graph of all 4-mers (edges are 5-mers).
//! let graph = BossBuilder::new()
//!     .k(4)
//!     .num_threads(4)
//!     .build_from_slices(&[b"AACTGACTGATCGTCTTGACT", b"ACTGACAGCTCTGCGATGCGA"])
//!     .unwrap();
//!
//! // Look up a (k+1)-mer and walk an edge.
//! let codes: Vec<u8> = b"AACTG".iter().map(|&c| bossdbg::alphabet::encode(c)).collect();
//! let edge = graph.edge_index(&codes).unwrap();
//! assert_eq!(graph.edge_kmer(edge), codes);
//! ```
//!
//! # Pipeline
//!
//! Construction runs through a fixed pipeline: the [extractor](KmerExtractor)
//! encodes sequences into packed (k+1)-mers (optionally canonicalized
//! against the reverse complement, optionally restricted to a suffix
//! bucket); the [collector](KmerCollector) accumulates them concurrently
//! into one shared container and finishes with a parallel sort and
//! deduplication; the [dummy reconstruction](reconstruct_source_dummies)
//! adds the sentinel-padded chains; and the [chunk assembly](BossChunk)
//! turns the sorted run into the three columns.
//!
//! Very large inputs are built distributed: one [`BossChunk`] per node
//! suffix bucket (see [`BossBuilder::filter_suffix`]), serialized to disk
//! and later [concatenated](concatenate_chunks) into the full graph. Two
//! built graphs over the same k can also be [merged](merge) directly.
//!
//! # Limitations
//!
//! Only the DNA alphabet ACGT (plus the sentinel) is supported, with node
//! lengths up to k = 84 (256-bit packed edge mers). The graph is not aware
//! of reverse complements unless built in canonical mode.

// String-index heavy code reads better with explicit indexing
#![allow(clippy::needless_range_loop)]

pub mod alphabet;

mod builder;
mod chunk;
mod collect;
mod dummies;
mod error;
mod extract;
mod graph;
mod kmer;
mod merge;
mod pool;
mod wavelet;

pub use builder::{BossBuilder, ChunkConstructor, MAX_K};
pub use chunk::{concatenate_chunks, BossChunk, CHUNK_FILE_EXTENSION, WEIGHT_WIDTH};
pub use collect::{DedupMode, KmerCollector, KmerRecord, BATCH_SIZE};
pub use dummies::reconstruct_source_dummies;
pub use error::{Error, Result};
pub use extract::KmerExtractor;
pub use graph::{BossGraph, GraphStats};
pub use kmer::{max_symbols, PackedKmer};
pub use merge::merge;
pub use pool::ThreadPool;
pub use wavelet::WaveletTree;
