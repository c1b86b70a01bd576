//! Splitting a count of items into contiguous chunks, one per worker.
use std::num::NonZeroUsize;
use std::ops::Range;

/// A contiguous piece of a partitioned input.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Chunk {
    /// Position among the chunks of one call, from 0.
    pub index: usize,
    pub offset: usize,
    pub len: usize,
}

impl Chunk {
    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.len
    }
}

/// Iterator over the chunks of one partition.  See [partition].
#[derive(Clone, Debug)]
pub struct Chunks {
    count: usize,
    workers: usize,
    chunk_len: usize,
    next: usize,
}

/// Split `count` items into exactly `workers` contiguous chunks.
///
/// Every chunk but the last gets `count / workers` items; the last also gets the remainder.  Chunks may be empty when
/// `count < workers`.
pub fn partition(count: usize, workers: NonZeroUsize) -> Chunks {
    Chunks {
        count,
        workers: workers.get(),
        chunk_len: count / workers.get(),
        next: 0,
    }
}

impl Iterator for Chunks {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.next == self.workers {
            return None;
        }

        let index = self.next;
        self.next += 1;
        let offset = index * self.chunk_len;
        let len = if self.next == self.workers {
            self.count - offset
        } else {
            self.chunk_len
        };

        Some(Chunk { index, offset, len })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.workers - self.next;
        (left, Some(left))
    }
}

impl ExactSizeIterator for Chunks {}

/// How many workers are worth splitting work across on this machine.
///
/// One core is left for the thread that is waiting on the workers, so this is the available parallelism minus one, and
/// never less than one.
pub fn hardware_concurrency_hint() -> NonZeroUsize {
    let cores = std::thread::available_parallelism().map_or(1, NonZeroUsize::get);
    NonZeroUsize::new(cores.saturating_sub(1)).unwrap_or(NonZeroUsize::MIN)
}

/// How many chunks to split `count` items into, given at most `max_chunks` workers.
///
/// Inputs shorter than `min_parallel_len` run as one chunk, as do inputs on single-core machines.
pub fn resolve_worker_count(
    count: usize,
    max_chunks: NonZeroUsize,
    min_parallel_len: usize,
) -> NonZeroUsize {
    if count < min_parallel_len.max(2) {
        return NonZeroUsize::MIN;
    }

    NonZeroUsize::new(count.min(max_chunks.get())).unwrap_or(NonZeroUsize::MIN)
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn nz(x: usize) -> NonZeroUsize {
        NonZeroUsize::new(x).unwrap()
    }

    #[test]
    fn test_remainder_goes_last() {
        let got = partition(10, nz(3)).map(|c| c.range()).collect::<Vec<_>>();
        assert_eq!(got, vec![0..3, 3..6, 6..10]);

        let got = partition(2, nz(4)).map(|c| c.len).collect::<Vec<_>>();
        assert_eq!(got, vec![0, 0, 0, 2]);

        let got = partition(0, nz(1)).collect::<Vec<_>>();
        assert_eq!(
            got,
            vec![Chunk {
                index: 0,
                offset: 0,
                len: 0
            }]
        );
    }

    #[test]
    fn test_resolve_worker_count() {
        assert_eq!(resolve_worker_count(0, nz(8), 0), nz(1));
        assert_eq!(resolve_worker_count(1, nz(8), 0), nz(1));
        assert_eq!(resolve_worker_count(5, nz(8), 2), nz(5));
        assert_eq!(resolve_worker_count(1000, nz(8), 2), nz(8));
        assert_eq!(resolve_worker_count(100, nz(8), 500), nz(1));
        assert_eq!(resolve_worker_count(100, nz(1), 0), nz(1));
    }

    #[test]
    fn test_hint_is_at_least_one() {
        assert!(hardware_concurrency_hint().get() >= 1);
    }

    proptest! {
        #[test]
        fn test_partition_covers_exactly(count in 0usize..100_000, workers in 1usize..64) {
            let chunks = partition(count, nz(workers)).collect::<Vec<_>>();
            prop_assert_eq!(chunks.len(), workers);

            let mut expected_offset = 0;
            for (i, c) in chunks.iter().enumerate() {
                prop_assert_eq!(c.index, i);
                prop_assert_eq!(c.offset, expected_offset);
                if i + 1 < workers {
                    prop_assert_eq!(c.len, count / workers);
                }
                expected_offset += c.len;
            }
            prop_assert_eq!(expected_offset, count);
            prop_assert_eq!(chunks.last().unwrap().len, count / workers + count % workers);
        }
    }
}
