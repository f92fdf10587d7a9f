//! Concurrent accumulation of k-mers into one shared, eventually sorted
//! container.
//!
//! Producers hand whole sequences to the collector. Batches of buffered
//! sequences are released to a worker pool; each worker extracts into a
//! thread-local staging buffer and appends it to the shared container under
//! a two-level lock:
//!
//! * a single-writer mutex serializes the capacity check and growth,
//! * a shared/exclusive lock admits parallel appends into reserved, disjoint
//!   ranges while excluding them during reallocation.
//!
//! When capacity runs out the container is first compacted (sort + dedup)
//! and then regrown by 1.5x. If even that reservation fails the process
//! terminates: there is no way to continue a build without memory.

use crate::error::Result;
use crate::extract::KmerExtractor;
use crate::kmer::PackedKmer;
use crate::pool::ThreadPool;
use rayon::prelude::*;
use std::cell::UnsafeCell;
use std::sync::{Arc, Mutex, RwLock};

/// Default batch size: bytes of buffered sequence per released task, and
/// the record capacity of a worker's staging buffer.
pub const BATCH_SIZE: usize = 30_000_000;

/// What happens to equal k-mers when the container is compacted.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum DedupMode {
    /// Keep duplicates; the run is only sorted.
    None,
    /// Keep one record per distinct k-mer.
    DropDuplicates,
    /// Keep one record per distinct k-mer, saturating-summing the counts.
    SaturatingCount,
}

/// A record stored in the collector: either a bare k-mer or a k-mer with a
/// small multiplicity.
pub trait KmerRecord<const B: usize>: Copy + Send + Sync + 'static {
    /// Whether records of this shape carry counts.
    const WEIGHTED: bool;

    fn new(kmer: PackedKmer<B>, count: u64) -> Self;
    fn kmer(&self) -> PackedKmer<B>;
    fn count(&self) -> u64;
    /// Folds an equal-k-mer record into this one.
    fn absorb(&mut self, other: &Self);
}

impl<const B: usize> KmerRecord<B> for PackedKmer<B> {
    const WEIGHTED: bool = false;

    #[inline]
    fn new(kmer: PackedKmer<B>, _count: u64) -> Self {
        kmer
    }

    #[inline]
    fn kmer(&self) -> PackedKmer<B> {
        *self
    }

    #[inline]
    fn count(&self) -> u64 {
        1
    }

    #[inline]
    fn absorb(&mut self, _other: &Self) {}
}

impl<const B: usize> KmerRecord<B> for (PackedKmer<B>, u8) {
    const WEIGHTED: bool = true;

    #[inline]
    fn new(kmer: PackedKmer<B>, count: u64) -> Self {
        (kmer, count.min(u8::MAX as u64) as u8)
    }

    #[inline]
    fn kmer(&self) -> PackedKmer<B> {
        self.0
    }

    #[inline]
    fn count(&self) -> u64 {
        self.1 as u64
    }

    #[inline]
    fn absorb(&mut self, other: &Self) {
        self.1 = self.1.saturating_add(other.1);
    }
}

/// Sorts `v[offset..]` by k-mer and compacts equal keys according to `mode`.
/// The sort is parallel when the tail is large.
pub(crate) fn sort_and_dedup<const B: usize, R: KmerRecord<B>>(
    v: &mut Vec<R>,
    mode: DedupMode,
    offset: usize,
) {
    let tail = &mut v[offset..];
    if tail.len() >= 1 << 16 {
        tail.par_sort_unstable_by(|a, b| a.kmer().cmp(&b.kmer()));
    } else {
        tail.sort_unstable_by(|a, b| a.kmer().cmp(&b.kmer()));
    }

    if mode == DedupMode::None || tail.is_empty() {
        return;
    }

    // In-place compaction of equal-key runs.
    let mut write = offset;
    for read in offset..v.len() {
        if read == offset {
            continue;
        }
        if v[read].kmer() == v[write].kmer() {
            if mode == DedupMode::SaturatingCount {
                let rec = v[read];
                v[write].absorb(&rec);
            }
        } else {
            write += 1;
            v[write] = v[read];
        }
    }
    v.truncate(write + 1);
}

// Reserves room for `size` entries, degrading geometrically towards
// `min_size` when the allocator refuses. The final reservation of the
// minimum is unconditional: failing it aborts the process, which is the
// documented behavior for running out of memory mid-build.
fn reserve_degrading<T>(v: &mut Vec<T>, size: usize, min_size: usize) {
    let mut size = size.max(min_size);
    while size > min_size {
        let additional = size.saturating_sub(v.len());
        if v.try_reserve(additional).is_ok() {
            return;
        }
        size = min_size + (size - min_size) * 2 / 3;
    }
    let additional = min_size.saturating_sub(v.len());
    if v.try_reserve(additional).is_err() {
        log::error!("cannot reallocate the k-mer container: out of memory");
        std::process::exit(1);
    }
}

// The shared k-mer container. Appends run the protocol described in the
// module docs; any read of the data requires that all workers have joined.
struct SharedBuffer<R> {
    data: UnsafeCell<Vec<R>>,
    resize_lock: Mutex<()>,
    copy_lock: RwLock<()>,
    dedup: DedupMode,
}

// Safety: all mutation goes through `append`, which writes only into a
// range reserved under the resize lock while holding the copy lock shared;
// reallocation happens only under the copy lock held exclusively.
unsafe impl<R: Send> Send for SharedBuffer<R> {}
unsafe impl<R: Send> Sync for SharedBuffer<R> {}

impl<R> SharedBuffer<R> {
    fn new(preallocated: usize, dedup: DedupMode) -> Self {
        let mut data = Vec::new();
        reserve_degrading(&mut data, preallocated, 0);
        Self {
            data: UnsafeCell::new(data),
            resize_lock: Mutex::new(()),
            copy_lock: RwLock::new(()),
            dedup,
        }
    }
}

impl<R> SharedBuffer<R> {
    fn append<const B: usize>(&self, batch: &[R])
    where
        R: KmerRecord<B>,
    {
        if batch.is_empty() {
            return;
        }

        let resize_guard = self.resize_lock.lock().unwrap();

        let base = {
            let data = unsafe { &mut *self.data.get() };

            if data.len() + batch.len() > data.capacity() {
                // Writers with reserved ranges must finish before we move
                // the allocation.
                let _exclusive = self.copy_lock.write().unwrap();

                let before = data.len();
                sort_and_dedup(data, self.dedup, 0);
                log::info!(
                    "capacity exceeded, compacted the k-mer container: {} -> {} records",
                    before,
                    data.len()
                );

                reserve_degrading(data, data.len() + data.len() / 2, data.len() + batch.len());
            }

            let offset = data.len();
            data.resize(offset + batch.len(), batch[0]);
            unsafe { data.as_mut_ptr().add(offset) }
        };

        // Down-grade: appends into disjoint reserved ranges may overlap in
        // time, reallocation may not.
        let copy_guard = self.copy_lock.read().unwrap();
        drop(resize_guard);

        unsafe {
            std::ptr::copy_nonoverlapping(batch.as_ptr(), base, batch.len());
        }
        drop(copy_guard);
    }

    // Only sound once every worker has joined.
    fn into_inner(self) -> Vec<R> {
        self.data.into_inner()
    }
}

/// Thread-safe accumulator of extracted k-mers.
///
/// `R` selects the record shape (bare k-mer or counted pair), `B` the packed
/// width in words. Use [`KmerCollector::finish`] to obtain the sorted,
/// deduplicated run.
pub struct KmerCollector<R, const B: usize> {
    extractor: KmerExtractor,
    dedup: DedupMode,
    num_threads: usize,
    batch_size: usize,
    pool: ThreadPool,
    shared: Arc<SharedBuffer<R>>,
    buffered: Vec<(Box<[u8]>, u64)>,
    buffered_bytes: usize,
}

impl<R: KmerRecord<B>, const B: usize> KmerCollector<R, B> {
    pub fn new(
        extractor: KmerExtractor,
        dedup: DedupMode,
        num_threads: usize,
        preallocated_bytes: usize,
    ) -> Self {
        Self::with_batch_size(extractor, dedup, num_threads, preallocated_bytes, BATCH_SIZE)
    }

    pub fn with_batch_size(
        extractor: KmerExtractor,
        dedup: DedupMode,
        num_threads: usize,
        preallocated_bytes: usize,
        batch_size: usize,
    ) -> Self {
        let num_threads = num_threads.max(1);
        let prealloc = preallocated_bytes / std::mem::size_of::<R>();
        let shared = Arc::new(SharedBuffer::new(prealloc, dedup));
        if prealloc > 0 {
            log::info!("preallocated space for {} k-mer records", prealloc);
        }
        // One thread stays with the producer; submission blocks once
        // num_threads tasks are pending.
        let pool = ThreadPool::new(num_threads - 1, num_threads);
        Self {
            extractor,
            dedup,
            num_threads,
            batch_size,
            pool,
            shared,
            buffered: Vec::new(),
            buffered_bytes: 0,
        }
    }

    pub fn k(&self) -> usize {
        self.extractor.k()
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    pub fn suffix_length(&self) -> usize {
        self.extractor.suffix_length()
    }

    /// Inserts a single pre-encoded record, bypassing extraction. Used to
    /// seed the sentinel bucket when building with an all-`$` filter.
    pub fn insert_record(&mut self, record: R) {
        self.shared.append(&[record]);
    }

    /// Buffers one sequence with a multiplicity. Once enough bytes are
    /// buffered, a batch is released to the worker pool.
    pub fn add_sequence(&mut self, seq: &[u8], count: u64) -> Result<()> {
        if seq.len() < self.extractor.k() {
            return Ok(());
        }
        self.buffered_bytes += seq.len();
        self.buffered.push((seq.to_owned().into_boxed_slice(), count));
        if self.buffered_bytes >= self.batch_size {
            self.release_batch()?;
        }
        Ok(())
    }

    /// Hands a sequence generator to a worker. The generator runs once and
    /// drives the callback with each (sequence, count) pair.
    pub fn add_sequences<G>(&mut self, generate: G) -> Result<()>
    where
        G: FnOnce(&mut dyn FnMut(&[u8], u64)) + Send + 'static,
    {
        let shared = self.shared.clone();
        let extractor = self.extractor.clone();
        let dedup = self.dedup;
        let batch_size = self.batch_size;
        self.pool.enqueue(move || {
            extract_task(&extractor, dedup, batch_size, &shared, generate);
        })
    }

    fn release_batch(&mut self) -> Result<()> {
        let batch = std::mem::take(&mut self.buffered);
        self.buffered_bytes = 0;
        let shared = self.shared.clone();
        let extractor = self.extractor.clone();
        let dedup = self.dedup;
        let batch_size = self.batch_size;
        self.pool.enqueue(move || {
            extract_task(&extractor, dedup, batch_size, &shared, move |callback| {
                for (seq, count) in batch.iter() {
                    callback(seq, *count);
                }
            });
        })
    }

    /// Flushes the pending batch, waits for all workers, then sorts and
    /// compacts the container. Returns the finished run.
    pub fn finish(mut self) -> Result<Vec<R>> {
        self.release_batch()?;
        self.pool.join();

        let shared = Arc::try_unwrap(self.shared)
            .unwrap_or_else(|_| unreachable!("workers still hold the container after join"));
        let mut kmers = shared.into_inner();

        log::info!("sorting and deduplicating {} k-mer records", kmers.len());
        sort_and_dedup(&mut kmers, self.dedup, 0);
        log::info!("{} records after deduplication", kmers.len());
        Ok(kmers)
    }
}

// One worker task: extract every sequence the producer yields into a local
// staging buffer, flushing it into the shared container whenever it fills.
fn extract_task<const B: usize, R, G>(
    extractor: &KmerExtractor,
    dedup: DedupMode,
    batch_size: usize,
    shared: &SharedBuffer<R>,
    generate: G,
) where
    R: KmerRecord<B>,
    G: FnOnce(&mut dyn FnMut(&[u8], u64)),
{
    let mut staging = Vec::<R>::new();
    reserve_degrading(&mut staging, batch_size + batch_size / 10, 0);

    generate(&mut |seq, count| {
        extractor.extract_into(seq, count, &mut staging);

        if staging.len() < batch_size {
            return;
        }
        // Local dedup first: if it frees enough space, keep accumulating
        // instead of taking the shared locks.
        sort_and_dedup(&mut staging, dedup, 0);
        if staging.len() > batch_size / 10 * 9 {
            shared.append(&staging);
            staging.clear();
        }
    });

    if !staging.is_empty() {
        sort_and_dedup(&mut staging, dedup, 0);
        shared.append(&staging);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collector(
        k: usize,
        canonical: bool,
        dedup: DedupMode,
        threads: usize,
    ) -> KmerCollector<PackedKmer<1>, 1> {
        let extractor = KmerExtractor::new(k, canonical, Vec::new());
        KmerCollector::with_batch_size(extractor, dedup, threads, 0, 64)
    }

    fn ascii_run(run: &[PackedKmer<1>], k: usize) -> Vec<String> {
        run.iter().map(|x| x.to_ascii(k)).collect()
    }

    #[test]
    fn collects_sorted_and_deduplicated() {
        let mut c = collector(4, false, DedupMode::DropDuplicates, 2);
        c.add_sequence(b"ACGTACGT", 1).unwrap();
        c.add_sequence(b"ACGT", 1).unwrap();
        let run = c.finish().unwrap();
        // Distinct edge mers of ACGTACGT in row order.
        assert_eq!(ascii_run(&run, 4), vec!["GTAC", "TACG", "ACGT", "CGTA"]);
    }

    #[test]
    fn keep_duplicates_mode() {
        let mut c = collector(4, false, DedupMode::None, 1);
        c.add_sequence(b"ACGT", 1).unwrap();
        c.add_sequence(b"ACGT", 1).unwrap();
        let run = c.finish().unwrap();
        assert_eq!(run.len(), 2);
    }

    #[test_log::test]
    fn deterministic_across_schedules() {
        // The sorted deduplicated run must not depend on threading.
        let seqs: Vec<Vec<u8>> = (0..50)
            .map(|i| {
                (0..40)
                    .map(|j| crate::alphabet::DNA_ALPHABET[(i * 7 + j * 13) % 4])
                    .collect()
            })
            .collect();

        let mut runs = Vec::new();
        for threads in [1, 4] {
            let mut c = collector(5, false, DedupMode::DropDuplicates, threads);
            for s in &seqs {
                c.add_sequence(s, 1).unwrap();
            }
            runs.push(c.finish().unwrap());
        }
        assert_eq!(runs[0], runs[1]);
        assert!(runs[0].windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn saturating_counts() {
        let extractor = KmerExtractor::new(4, false, Vec::new());
        let mut c: KmerCollector<(PackedKmer<1>, u8), 1> =
            KmerCollector::with_batch_size(extractor, DedupMode::SaturatingCount, 2, 0, 64);
        c.add_sequence(b"AAAA", 100).unwrap();
        c.add_sequence(b"AAAA", 200).unwrap();
        let run = c.finish().unwrap();
        assert_eq!(run.len(), 1);
        assert_eq!(run[0].0.to_ascii(4), "AAAA");
        assert_eq!(run[0].1, 255); // 100 + 200 saturates
    }

    #[test]
    fn generator_ingest() {
        let mut c = collector(4, false, DedupMode::DropDuplicates, 3);
        c.add_sequences(move |callback| {
            callback(b"ACGT", 1);
            callback(b"CGTA", 1);
        })
        .unwrap();
        let run = c.finish().unwrap();
        assert_eq!(ascii_run(&run, 4), vec!["ACGT", "CGTA"]);
    }

    #[test]
    fn small_batches_force_shared_appends() {
        // Batch size 64 bytes: many releases, many shared appends.
        let mut c = collector(4, false, DedupMode::DropDuplicates, 4);
        for _ in 0..100 {
            c.add_sequence(b"ACGTACGTACGTACGTACGT", 1).unwrap();
        }
        let run = c.finish().unwrap();
        assert_eq!(run.len(), 4); // ACGT, CGTA, GTAC, TACG
    }
}
