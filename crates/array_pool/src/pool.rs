use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam::queue::ArrayQueue;

/// The smallest bucket holds buffers of `1 << MIN_BUCKET_SHIFT` elements.
const MIN_BUCKET_SHIFT: u32 = 4;

/// Configuration for an [ArrayPool].
///
/// The defaults pool buffers of up to a million elements, 50 buffers per size class.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ArrayPoolConfig {
    /// Largest buffer length the pool will keep around.
    ///
    /// Requests above this are allocated fresh and dropped when given back.  Rounded up to a power of two.
    ///
    /// Default is `1 << 20`.
    pub max_array_len: usize,

    /// How many buffers each size class may hold before further returns are dropped.
    ///
    /// Default is 50.
    pub arrays_per_bucket: usize,
}

impl Default for ArrayPoolConfig {
    fn default() -> Self {
        ArrayPoolConfig {
            max_array_len: 1 << 20,
            arrays_per_bucket: 50,
        }
    }
}

/// A pool of reusable `Vec<T>` buffers bucketed by power-of-two capacity.
pub struct ArrayPool<T> {
    /// `buckets[i]` holds buffers with capacity at least `bucket_len(i)`.
    buckets: Vec<ArrayQueue<Vec<T>>>,
    hits: AtomicUsize,
    misses: AtomicUsize,
    returns: AtomicUsize,
    drops: AtomicUsize,
}

/// Counters describing how an [ArrayPool] has been used.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArrayPoolStats {
    /// Buffers currently sitting in the pool.
    pub pooled: usize,

    /// Rents served from a pooled buffer.
    pub hits: usize,

    /// Rents which had to allocate.
    pub misses: usize,

    /// Buffers given back and kept.
    pub returns: usize,

    /// Buffers given back and dropped, either because their bucket was full or because they fit no bucket.
    pub drops: usize,
}

impl ArrayPoolStats {
    /// Fraction of rents served without allocating, from 0.0 to 1.0.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

fn bucket_len(index: usize) -> usize {
    1 << (index as u32 + MIN_BUCKET_SHIFT)
}

/// The bucket whose buffers are all large enough for `len` elements.
fn bucket_for_rent(len: usize) -> usize {
    // ceil(log2(len)), with 0 and 1 both landing in the smallest bucket.
    let shift = usize::BITS - len.saturating_sub(1).leading_zeros();
    shift.saturating_sub(MIN_BUCKET_SHIFT) as usize
}

/// The largest bucket a buffer of this capacity satisfies, if any.
fn bucket_for_capacity(capacity: usize) -> Option<usize> {
    if capacity < bucket_len(0) {
        return None;
    }

    let floor_log2 = usize::BITS - 1 - capacity.leading_zeros();
    Some((floor_log2 - MIN_BUCKET_SHIFT) as usize)
}

impl<T> ArrayPool<T> {
    pub fn new(config: ArrayPoolConfig) -> Self {
        let bucket_count = bucket_for_rent(config.max_array_len.max(1)) + 1;
        let per_bucket = config.arrays_per_bucket.max(1);

        ArrayPool {
            buckets: (0..bucket_count)
                .map(|_| ArrayQueue::new(per_bucket))
                .collect(),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
            returns: AtomicUsize::new(0),
            drops: AtomicUsize::new(0),
        }
    }

    /// Largest length this pool will serve from its buckets.
    pub fn max_array_len(&self) -> usize {
        bucket_len(self.buckets.len() - 1)
    }

    /// Get an empty buffer with room for at least `min_len` elements.
    pub fn rent(&self, min_len: usize) -> Vec<T> {
        let index = bucket_for_rent(min_len);

        let Some(bucket) = self.buckets.get(index) else {
            log::trace!(
                "Rent of {} elements is above the pooled maximum of {}; allocating",
                min_len,
                self.max_array_len()
            );
            self.misses.fetch_add(1, Ordering::Relaxed);
            return Vec::with_capacity(min_len);
        };

        if let Some(buf) = bucket.pop() {
            debug_assert!(buf.is_empty());
            debug_assert!(buf.capacity() >= min_len);
            self.hits.fetch_add(1, Ordering::Relaxed);
            return buf;
        }

        log::trace!("Array pool bucket {} is empty; allocating", bucket_len(index));
        self.misses.fetch_add(1, Ordering::Relaxed);
        Vec::with_capacity(bucket_len(index))
    }

    /// Give a buffer back to the pool.
    ///
    /// The contents are dropped immediately.  Buffers of any capacity are accepted; ones smaller than the smallest
    /// bucket, larger than [ArrayPool::max_array_len], or whose bucket is already full are simply dropped.
    pub fn give_back(&self, mut buf: Vec<T>) {
        buf.clear();

        let bucket = if buf.capacity() > self.max_array_len() {
            None
        } else {
            bucket_for_capacity(buf.capacity()).and_then(|i| self.buckets.get(i))
        };
        let Some(bucket) = bucket else {
            log::debug!(
                "Dropping returned buffer of capacity {} which fits no bucket",
                buf.capacity()
            );
            self.drops.fetch_add(1, Ordering::Relaxed);
            return;
        };

        match bucket.push(buf) {
            Ok(()) => {
                self.returns.fetch_add(1, Ordering::Relaxed);
            }
            Err(buf) => {
                log::debug!(
                    "Dropping returned buffer of capacity {} because its bucket is full",
                    buf.capacity()
                );
                self.drops.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn stats(&self) -> ArrayPoolStats {
        ArrayPoolStats {
            pooled: self.buckets.iter().map(|b| b.len()).sum(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            returns: self.returns.load(Ordering::Relaxed),
            drops: self.drops.load(Ordering::Relaxed),
        }
    }
}

impl<T> Default for ArrayPool<T> {
    fn default() -> Self {
        ArrayPool::new(Default::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use proptest::prelude::*;

    #[test]
    fn test_bucket_math() {
        assert_eq!(bucket_for_rent(0), 0);
        assert_eq!(bucket_for_rent(1), 0);
        assert_eq!(bucket_for_rent(16), 0);
        assert_eq!(bucket_for_rent(17), 1);
        assert_eq!(bucket_for_rent(32), 1);
        assert_eq!(bucket_for_rent(1000), 6);

        assert_eq!(bucket_for_capacity(15), None);
        assert_eq!(bucket_for_capacity(16), Some(0));
        assert_eq!(bucket_for_capacity(31), Some(0));
        assert_eq!(bucket_for_capacity(32), Some(1));
        assert_eq!(bucket_for_capacity(1024), Some(6));
    }

    #[test]
    fn test_rent_reuses_buffers() {
        let pool = ArrayPool::<u32>::default();

        let mut buf = pool.rent(100);
        assert!(buf.capacity() >= 100);
        buf.extend(0..100);
        pool.give_back(buf);

        let again = pool.rent(90);
        assert!(again.is_empty(), "Returned buffers must not keep their contents");
        assert!(again.capacity() >= 100);

        let stats = pool.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.returns, 1);
        assert_eq!(stats.pooled, 0);
        assert_eq!(stats.hit_rate(), 0.5);
    }

    #[test]
    fn test_oversized_rents_are_not_pooled() {
        let pool = ArrayPool::<u8>::new(ArrayPoolConfig {
            max_array_len: 64,
            arrays_per_bucket: 4,
        });

        assert_eq!(pool.max_array_len(), 64);

        let buf = pool.rent(1000);
        assert!(buf.capacity() >= 1000);
        pool.give_back(buf);

        let stats = pool.stats();
        assert_eq!(stats.drops, 1);
        assert_eq!(stats.pooled, 0);

        // Above the maximum but below the next power of two still isn't pooled.
        let buf = pool.rent(100);
        assert!(buf.capacity() >= 100);
        pool.give_back(buf);

        let stats = pool.stats();
        assert_eq!(stats.drops, 2);
        assert_eq!(stats.returns, 0);
        assert_eq!(stats.pooled, 0);
        assert_eq!(stats.hit_rate(), 0.0);
    }

    #[test]
    fn test_full_bucket_drops() {
        let pool = ArrayPool::<u8>::new(ArrayPoolConfig {
            max_array_len: 64,
            arrays_per_bucket: 2,
        });

        let bufs = (0..3).map(|_| pool.rent(16)).collect::<Vec<_>>();
        for b in bufs {
            pool.give_back(b);
        }

        let stats = pool.stats();
        assert_eq!(stats.returns, 2);
        assert_eq!(stats.drops, 1);
        assert_eq!(stats.pooled, 2);
    }

    #[test]
    fn test_give_back_drops_contents() {
        let pool = ArrayPool::<Arc<()>>::default();
        let tracked = Arc::new(());

        let mut buf = pool.rent(4);
        buf.push(tracked.clone());
        buf.push(tracked.clone());
        assert_eq!(Arc::strong_count(&tracked), 3);

        pool.give_back(buf);
        assert_eq!(Arc::strong_count(&tracked), 1);
    }

    #[test]
    fn test_concurrent_rent_and_return() {
        let pool = Arc::new(ArrayPool::<u64>::default());

        let handles = (0..4)
            .map(|t| {
                let pool = pool.clone();
                std::thread::spawn(move || {
                    for i in 0..1000usize {
                        let mut b = pool.rent(i % 200);
                        b.push(t);
                        pool.give_back(b);
                    }
                })
            })
            .collect::<Vec<_>>();

        for h in handles {
            h.join().unwrap();
        }

        let stats = pool.stats();
        assert_eq!(stats.hits + stats.misses, 4000);
        assert_eq!(stats.returns + stats.drops, 4000);
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: ArrayPoolConfig = serde_json::from_str(r#"{"arrays_per_bucket": 8}"#).unwrap();
        assert_eq!(config.arrays_per_bucket, 8);
        assert_eq!(config.max_array_len, 1 << 20);
    }

    proptest! {
        #[test]
        fn test_rent_capacity_is_sufficient(len in 0usize..100_000) {
            let pool = ArrayPool::<u8>::default();
            let buf = pool.rent(len);
            prop_assert!(buf.capacity() >= len);
            prop_assert!(buf.is_empty());
        }
    }
}
