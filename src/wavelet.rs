//! A levelwise wavelet tree over the W column.
//!
//! The tree stores a sequence of fixed-width symbols as one rank/select
//! bit vector per bit of the code, most significant bit first. `access`,
//! `rank` and `select` all run in O(width) bit-vector operations. The
//! alphabet is the full code range `[0, 2^width)`; no remapping happens,
//! which keeps `rank(c, ..)` of an absent symbol a plain zero.

use simple_sds_sbwt::bit_vector::BitVector;
use simple_sds_sbwt::ops::*;
use simple_sds_sbwt::raw_vector::*;
use simple_sds_sbwt::serialize::Serialize;

#[derive(Clone, PartialEq, Debug)]
pub struct WaveletTree {
    levels: Vec<BitVector>, // level 0 splits on the most significant bit
    width: usize,
    len: usize,
}

impl WaveletTree {
    /// Builds the tree for `seq`; every value must be below `2^width`.
    pub fn new(seq: &[u8], width: usize) -> Self {
        assert!(width > 0 && width <= 8);
        debug_assert!(seq.iter().all(|&c| (c as usize) < (1 << width)));

        let len = seq.len();
        let mut levels = Vec::with_capacity(width);
        let mut current = seq.to_vec();

        for level in 0..width {
            let bit_pos = width - 1 - level;
            let mut raw = RawVector::with_len(len, false);
            for (i, &c) in current.iter().enumerate() {
                if (c >> bit_pos) & 1 == 1 {
                    raw.set_bit(i, true);
                }
            }

            // Stable partition: zeros keep their order on the left, ones on
            // the right, forming the next level's sequence.
            let mut next = Vec::with_capacity(len);
            next.extend(current.iter().copied().filter(|c| (c >> bit_pos) & 1 == 0));
            next.extend(current.iter().copied().filter(|c| (c >> bit_pos) & 1 == 1));
            current = next;

            let mut bv = BitVector::from(raw);
            bv.enable_rank();
            bv.enable_select();
            bv.enable_select_zero();
            levels.push(bv);
        }

        Self { levels, width, len }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    fn zeros(&self, level: usize) -> usize {
        let bv = &self.levels[level];
        bv.len() - bv.count_ones()
    }

    /// The symbol at position `i`.
    pub fn access(&self, i: usize) -> u8 {
        assert!(i < self.len);
        let mut pos = i;
        let mut code = 0u8;
        for (level, bv) in self.levels.iter().enumerate() {
            let bit_pos = self.width - 1 - level;
            if bv.get(pos) {
                code |= 1 << bit_pos;
                pos = self.zeros(level) + bv.rank(pos);
            } else {
                pos -= bv.rank(pos);
            }
        }
        code
    }

    /// Number of occurrences of `c` in `[0, i)`.
    pub fn rank(&self, c: u8, i: usize) -> usize {
        if (c as usize) >= 1 << self.width {
            return 0;
        }
        let mut lo = 0usize;
        let mut hi = i.min(self.len);
        for (level, bv) in self.levels.iter().enumerate() {
            let bit = (c >> (self.width - 1 - level)) & 1;
            if bit == 0 {
                lo -= bv.rank(lo);
                hi -= bv.rank(hi);
            } else {
                let zeros = self.zeros(level);
                lo = zeros + bv.rank(lo);
                hi = zeros + bv.rank(hi);
            }
        }
        hi - lo
    }

    /// Position of the `r`-th occurrence of `c` (0-indexed), if any.
    pub fn select(&self, c: u8, r: usize) -> Option<usize> {
        if (c as usize) >= 1 << self.width {
            return None;
        }

        // Walk down to the leaf interval of c.
        let mut lo = 0usize;
        let mut hi = self.len;
        for (level, bv) in self.levels.iter().enumerate() {
            let bit = (c >> (self.width - 1 - level)) & 1;
            if bit == 0 {
                lo -= bv.rank(lo);
                hi -= bv.rank(hi);
            } else {
                let zeros = self.zeros(level);
                lo = zeros + bv.rank(lo);
                hi = zeros + bv.rank(hi);
            }
        }
        if r >= hi - lo {
            return None;
        }

        // Walk back up, undoing the rank mapping with select.
        let mut pos = lo + r;
        for level in (0..self.levels.len()).rev() {
            let bv = &self.levels[level];
            let bit = (c >> (self.width - 1 - level)) & 1;
            if bit == 0 {
                pos = bv.select_zero(pos)?;
            } else {
                pos = bv.select(pos - self.zeros(level))?;
            }
        }
        Some(pos)
    }

    /// Total occurrences of `c`.
    pub fn count(&self, c: u8) -> usize {
        self.rank(c, self.len)
    }

    /// Writes the tree; load with [`WaveletTree::load`].
    pub fn serialize<W: std::io::Write>(&self, out: &mut W) -> std::io::Result<()> {
        (self.len as u64).serialize(out)?;
        (self.width as u64).serialize(out)?;
        for level in self.levels.iter() {
            level.serialize(out)?;
        }
        Ok(())
    }

    pub fn load<R: std::io::Read>(input: &mut R) -> std::io::Result<Self> {
        let len = u64::load(input)? as usize;
        let width = u64::load(input)? as usize;
        let mut levels = Vec::with_capacity(width);
        for _ in 0..width {
            let mut bv = BitVector::load(input)?;
            bv.enable_rank();
            bv.enable_select();
            bv.enable_select_zero();
            levels.push(bv);
        }
        Ok(Self { levels, width, len })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn naive_rank(seq: &[u8], c: u8, i: usize) -> usize {
        seq[..i].iter().filter(|&&x| x == c).count()
    }

    #[test]
    fn access_rank_select_against_model() {
        // W-like sequence over codes 0..10 at width 4.
        let seq: Vec<u8> = (0..200).map(|i| ((i * 7 + i / 3) % 10) as u8).collect();
        let wt = WaveletTree::new(&seq, 4);

        assert_eq!(wt.len(), seq.len());
        for (i, &c) in seq.iter().enumerate() {
            assert_eq!(wt.access(i), c, "access({})", i);
        }

        for c in 0..16u8 {
            for i in (0..=seq.len()).step_by(17) {
                assert_eq!(wt.rank(c, i), naive_rank(&seq, c, i), "rank({}, {})", c, i);
            }
            let total = wt.count(c);
            assert_eq!(total, naive_rank(&seq, c, seq.len()));
            for r in 0..total {
                let pos = wt.select(c, r).unwrap();
                assert_eq!(seq[pos], c);
                assert_eq!(wt.rank(c, pos), r);
            }
            assert_eq!(wt.select(c, total), None);
        }
    }

    #[test]
    fn single_symbol() {
        let wt = WaveletTree::new(&[3], 4);
        assert_eq!(wt.access(0), 3);
        assert_eq!(wt.rank(3, 1), 1);
        assert_eq!(wt.select(3, 0), Some(0));
        assert_eq!(wt.select(2, 0), None);
    }

    #[test]
    fn absent_symbols() {
        let wt = WaveletTree::new(&[1, 1, 2], 4);
        assert_eq!(wt.rank(9, 3), 0);
        assert_eq!(wt.select(9, 0), None);
        assert_eq!(wt.rank(200, 3), 0); // out of the code range entirely
    }

    #[test]
    fn serialize_and_load() {
        let seq: Vec<u8> = (0..100).map(|i| (i % 9) as u8).collect();
        let wt = WaveletTree::new(&seq, 4);
        let mut buf = Vec::<u8>::new();
        wt.serialize(&mut buf).unwrap();
        let loaded = WaveletTree::load(&mut buf.as_slice()).unwrap();
        assert_eq!(wt, loaded);
        for (i, &c) in seq.iter().enumerate() {
            assert_eq!(loaded.access(i), c);
        }
    }
}
