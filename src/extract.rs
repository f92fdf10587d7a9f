//! Extraction of packed (k+1)-mers from ASCII sequences.
//!
//! The extractor slides a window over the encoded sequence, maintaining the
//! packed forward mer and, in canonical mode, its reverse complement. A
//! character outside the alphabet resets the window, so no emitted mer spans
//! an invalid symbol. Emission order follows the input; sorting happens
//! later in the collector.

use crate::alphabet;
use crate::collect::KmerRecord;
use crate::kmer::PackedKmer;

/// Sequence-to-k-mer encoder with optional reverse-complement
/// canonicalization and suffix-bucket filtering.
#[derive(Clone, Debug)]
pub struct KmerExtractor {
    k: usize, // length of the extracted mers (k + 1 for a BOSS of node length k)
    canonical: bool,
    suffix: Vec<u8>, // encoded filter, possibly with sentinel codes; empty = no filter
}

impl KmerExtractor {
    /// `k` is the length of the extracted mers. The filter suffix is given
    /// in internal codes; it selects mers whose trailing source-node symbols
    /// equal the filter.
    pub fn new(k: usize, canonical: bool, suffix: Vec<u8>) -> Self {
        assert!(k >= 2, "edge mers must have at least two symbols");
        assert!(suffix.len() < k, "filter suffix must be shorter than the mers");
        Self { k, canonical, suffix }
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn suffix_length(&self) -> usize {
        self.suffix.len()
    }

    // The filter matches the trailing s symbols of the source node, which
    // are the top sort keys of the row order: symbols K-s ..= K-1.
    #[inline]
    fn passes_filter<const B: usize>(&self, kmer: &PackedKmer<B>) -> bool {
        let s = self.suffix.len();
        self.suffix
            .iter()
            .enumerate()
            .all(|(j, &c)| kmer.symbol(self.k - s + j) == c)
    }

    /// Extracts all mers of `seq` into `out`, each carrying `count`.
    /// Sequences shorter than `k` yield nothing.
    pub fn extract_into<const B: usize, R: KmerRecord<B>>(
        &self,
        seq: &[u8],
        count: u64,
        out: &mut Vec<R>,
    ) {
        if seq.len() < self.k {
            return;
        }

        let mut fwd = PackedKmer::<B>::zero();
        let mut rc = PackedKmer::<B>::zero();
        let mut valid = 0usize; // window length of consecutive valid codes

        for &ch in seq {
            let code = alphabet::encode(ch);
            if code == alphabet::INVALID_CODE {
                fwd = PackedKmer::zero();
                rc = PackedKmer::zero();
                valid = 0;
                continue;
            }

            fwd = fwd.to_next(self.k, code);
            if self.canonical {
                rc = rc.to_prev(self.k, alphabet::complement(code));
            }
            valid += 1;

            if valid >= self.k {
                let kmer = if self.canonical { fwd.min(rc) } else { fwd };
                if self.passes_filter(&kmer) {
                    out.push(R::new(kmer, count));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(k: usize, canonical: bool, suffix: &[u8], seq: &[u8]) -> Vec<String> {
        let suffix = alphabet::encode_filter_suffix(suffix).unwrap();
        let extractor = KmerExtractor::new(k, canonical, suffix);
        let mut out = Vec::<PackedKmer<1>>::new();
        extractor.extract_into(seq, 1, &mut out);
        out.iter().map(|x| x.to_ascii(k)).collect()
    }

    #[test]
    fn plain_windows() {
        assert_eq!(extract(4, false, b"", b"ACGTACG"), vec!["ACGT", "CGTA", "GTAC", "TACG"]);
        assert_eq!(extract(4, false, b"", b"ACGT"), vec!["ACGT"]);
    }

    #[test]
    fn short_sequences_yield_nothing() {
        assert!(extract(4, false, b"", b"ACG").is_empty());
        assert!(extract(4, false, b"", b"").is_empty());
    }

    #[test]
    fn invalid_characters_truncate() {
        // No mer spans the N.
        assert_eq!(extract(4, false, b"", b"ACGTNACGT"), vec!["ACGT", "ACGT"]);
        assert!(extract(4, false, b"", b"ACNGT").is_empty());
    }

    #[test]
    fn canonical_takes_the_smaller_strand() {
        // ACGT is its own reverse complement.
        assert_eq!(extract(4, true, b"", b"ACGT"), vec!["ACGT"]);

        // revcomp(TTTT) = AAAA sorts first.
        assert_eq!(extract(4, true, b"", b"TTTT"), vec!["AAAA"]);

        // A canonical run equals the canonical run of the reverse complement.
        let mut rc = b"ACGGTTAC".to_vec();
        alphabet::reverse_complement_in_place(&mut rc);
        let mut a = extract(4, true, b"", b"ACGGTTAC");
        let mut b = extract(4, true, b"", &rc);
        a.sort();
        b.sort();
        assert_eq!(a, b);
    }

    #[test]
    fn suffix_filter_selects_node_suffix() {
        // k = 4 mers of ACGTACG whose source node ends in C: GTAC (node GTA
        // does not end in C), so only TACG (node TAC).
        assert_eq!(extract(4, false, b"C", b"ACGTACG"), vec!["TACG"]);
        // Two-symbol filter.
        assert_eq!(extract(4, false, b"AC", b"ACGTACG"), vec!["TACG"]);
        // The sentinel bucket matches no real mer.
        assert!(extract(4, false, b"$", b"ACGTACG").is_empty());
    }
}
