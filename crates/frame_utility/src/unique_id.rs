use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

/// A process-wide unique identity for a pooled instance.
///
/// Pools track which instances are checked out by these, not by value equality: two freshly constructed instances are
/// usually equal but are still different objects.  The niche means `Option<UniqueId>` is free.
#[derive(Copy, Clone, Debug, Eq, Ord, PartialEq, PartialOrd, Hash)]
pub struct UniqueId(NonZeroU64);

impl UniqueId {
    pub fn new() -> UniqueId {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        let got = COUNTER.fetch_add(1, Ordering::Relaxed);
        // Wrapping would take centuries of allocating an id every nanosecond.
        UniqueId(NonZeroU64::new(got).unwrap_or(NonZeroU64::MIN))
    }

    pub fn get(&self) -> u64 {
        self.0.get()
    }
}

impl Default for UniqueId {
    fn default() -> Self {
        UniqueId::new()
    }
}
