//! Recycle instances of a type across take/give-back cycles.
//!
//! An [ObjectPool] hands out [Pooled] handles.  Each handle carries the identity the pool knows the instance by, so the
//! pool can tell its own checked-out instances apart from foreign ones and from instances which have already come
//! back, without relying on the instances' own equality.  Pools are not internally synchronized; wrap one in a mutex
//! to share it.
use std::collections::HashSet;
use std::str::FromStr;

use crate::error::ConfigError;
use crate::growable_sequence::GrowableSequence;
use crate::unique_id::UniqueId;

/// What a pool does when asked for an instance and none are free.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolBehavior {
    /// Create a new instance.
    #[default]
    Grow,

    /// Refuse: [ObjectPool::take] returns `None`.
    Fixed,
}

impl FromStr for PoolBehavior {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "grow" => Ok(PoolBehavior::Grow),
            "fixed" => Ok(PoolBehavior::Fixed),
            _ => Err(ConfigError::UnsupportedPoolBehavior(s.to_string())),
        }
    }
}

impl TryFrom<u8> for PoolBehavior {
    type Error = ConfigError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PoolBehavior::Grow),
            1 => Ok(PoolBehavior::Fixed),
            x => Err(ConfigError::UnsupportedPoolBehavior(x.to_string())),
        }
    }
}

/// Configuration for an [ObjectPool].
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ObjectPoolConfig {
    /// How many instances to create up front.
    ///
    /// Default is 128.
    pub starting_capacity: usize,

    /// Default is [PoolBehavior::Grow].
    pub behavior: PoolBehavior,
}

impl Default for ObjectPoolConfig {
    fn default() -> Self {
        ObjectPoolConfig {
            starting_capacity: 128,
            behavior: PoolBehavior::Grow,
        }
    }
}

/// Lifecycle hooks a pool runs on its instances.
///
/// Every hook defaults to doing nothing.  Pools use [NoHooks] unless built with [ObjectPool::with_hooks], so pooling a
/// type never requires implementing anything for it.
pub trait PoolHooks<T> {
    /// Called once, when the pool creates the instance.
    fn on_created(&mut self, _value: &mut T) {}

    /// Called every time the instance is taken from the pool.
    fn on_taken(&mut self, _value: &mut T) {}

    /// Called every time the instance is given back to the pool.
    fn on_returned(&mut self, _value: &mut T) {}
}

/// The default hooks, which do nothing.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoHooks;

impl<T> PoolHooks<T> for NoHooks {}

/// Lifecycle hooks a type implements on itself.
///
/// Use with [PoolableHooks], or build the pool with [ObjectPool::new_poolable].
pub trait Poolable {
    fn on_created(&mut self) {}

    fn on_taken(&mut self) {}

    fn on_returned(&mut self) {}
}

/// Hooks which forward to the instance's own [Poolable] impl.
#[derive(Copy, Clone, Debug, Default)]
pub struct PoolableHooks;

impl<T: Poolable> PoolHooks<T> for PoolableHooks {
    fn on_created(&mut self, value: &mut T) {
        value.on_created();
    }

    fn on_taken(&mut self, value: &mut T) {
        value.on_taken();
    }

    fn on_returned(&mut self, value: &mut T) {
        value.on_returned();
    }
}

/// An instance checked out of (or sitting in) an [ObjectPool].
#[derive(Debug)]
pub struct Pooled<T> {
    id: UniqueId,
    value: T,
}

impl<T> Pooled<T> {
    /// The identity the pool tracks this instance by.
    pub fn id(&self) -> UniqueId {
        self.id
    }
}

impl<T> std::ops::Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> std::ops::DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

type Factory<T> = Box<dyn FnMut() -> T + Send>;

/// A pool of reusable `T`.
///
/// Every instance the pool has created is either in the free list or in the active set, never both.  Instances the
/// caller drops instead of giving back stay counted as active.
pub struct ObjectPool<T, H = NoHooks> {
    free: GrowableSequence<Option<Pooled<T>>>,
    active: HashSet<UniqueId, ahash::RandomState>,
    behavior: PoolBehavior,
    factory: Factory<T>,
    hooks: H,
}

impl<T: Default + 'static> ObjectPool<T> {
    /// A pool which creates instances with `T::default()`.
    pub fn new(config: ObjectPoolConfig) -> Self {
        Self::with_factory(config, T::default)
    }
}

impl<T: Default + 'static> Default for ObjectPool<T> {
    fn default() -> Self {
        Self::new(Default::default())
    }
}

impl<T> ObjectPool<T> {
    /// A pool which creates instances by calling `factory`.
    ///
    /// `config.starting_capacity` instances are created immediately.
    pub fn with_factory(config: ObjectPoolConfig, factory: impl FnMut() -> T + Send + 'static) -> Self {
        Self::with_hooks(config, factory, NoHooks)
    }
}

impl<T: Poolable + Default + 'static> ObjectPool<T, PoolableHooks> {
    /// A pool which creates instances with `T::default()` and runs `T`'s own [Poolable] hooks.
    pub fn new_poolable(config: ObjectPoolConfig) -> Self {
        Self::with_hooks(config, T::default, PoolableHooks)
    }
}

impl<T, H: PoolHooks<T>> ObjectPool<T, H> {
    /// A pool which creates instances by calling `factory` and runs `hooks` at each transition.
    ///
    /// `config.starting_capacity` instances are created immediately, firing `on_created` for each.
    pub fn with_hooks(
        config: ObjectPoolConfig,
        factory: impl FnMut() -> T + Send + 'static,
        hooks: H,
    ) -> Self {
        let mut pool = ObjectPool {
            free: GrowableSequence::with_capacity(config.starting_capacity),
            active: HashSet::default(),
            behavior: config.behavior,
            factory: Box::new(factory),
            hooks,
        };

        for _ in 0..config.starting_capacity {
            let obj = pool.create();
            pool.free.add(Some(obj));
        }

        pool
    }

    fn create(&mut self) -> Pooled<T> {
        let mut value = (self.factory)();
        self.hooks.on_created(&mut value);
        Pooled {
            id: UniqueId::new(),
            value,
        }
    }

    /// Take an instance out of the pool.
    ///
    /// Returns `None` only if the pool is [PoolBehavior::Fixed] and every instance is checked out.  That is
    /// backpressure, not an error: try again once something has been given back.
    pub fn take(&mut self) -> Option<Pooled<T>> {
        let mut obj = match self.free.pop().flatten() {
            Some(o) => o,
            None => match self.behavior {
                PoolBehavior::Grow => {
                    log::trace!(
                        "Growing pool of {} past {} instances",
                        std::any::type_name::<T>(),
                        self.count()
                    );
                    self.create()
                }
                PoolBehavior::Fixed => {
                    log::debug!(
                        "Fixed pool of {} is exhausted with {} instances checked out",
                        std::any::type_name::<T>(),
                        self.active.len()
                    );
                    return None;
                }
            },
        };

        self.active.insert(obj.id);
        self.hooks.on_taken(&mut obj.value);
        Some(obj)
    }

    /// Give an instance back to the pool.
    ///
    /// If the instance isn't currently checked out of this pool, nothing happens and it is handed back as `Err`.
    pub fn give_back(&mut self, mut obj: Pooled<T>) -> Result<(), Pooled<T>> {
        if !self.active.remove(&obj.id) {
            log::warn!(
                "Ignoring an instance of {} which is not checked out of this pool",
                std::any::type_name::<T>()
            );
            return Err(obj);
        }

        self.hooks.on_returned(&mut obj.value);
        self.free.add(Some(obj));
        Ok(())
    }

    /// [ObjectPool::give_back] for callers holding an optional instance.  `None` is ignored.
    pub fn give_back_opt(&mut self, obj: Option<Pooled<T>>) -> Result<(), Pooled<T>> {
        match obj {
            Some(o) => self.give_back(o),
            None => Ok(()),
        }
    }

    /// Is the instance with this id currently checked out of this pool?
    pub fn is_active(&self, id: UniqueId) -> bool {
        self.active.contains(&id)
    }

    /// Drop free instances until at most `keep` remain.  Returns how many were dropped.
    pub fn trim_free(&mut self, keep: usize) -> usize {
        let mut dropped = 0;
        while self.free.len() > keep {
            std::mem::drop(self.free.pop());
            dropped += 1;
        }
        dropped
    }

    pub fn behavior(&self) -> PoolBehavior {
        self.behavior
    }

    /// Every instance this pool is tracking, free or checked out.
    pub fn count(&self) -> usize {
        self.free_count() + self.active_count()
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use proptest::prelude::*;

    #[derive(Debug, Default)]
    struct HookCounts {
        created: AtomicUsize,
        taken: AtomicUsize,
        returned: AtomicUsize,
    }

    #[derive(Debug)]
    struct Hooked {
        counts: Arc<HookCounts>,
        generation: u32,
    }

    impl Poolable for Hooked {
        fn on_created(&mut self) {
            self.counts.created.fetch_add(1, Ordering::Relaxed);
        }

        fn on_taken(&mut self) {
            self.counts.taken.fetch_add(1, Ordering::Relaxed);
        }

        fn on_returned(&mut self) {
            self.generation += 1;
            self.counts.returned.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn hooked_pool(config: ObjectPoolConfig) -> (ObjectPool<Hooked, PoolableHooks>, Arc<HookCounts>) {
        let counts = Arc::new(HookCounts::default());
        let c2 = counts.clone();
        let pool = ObjectPool::with_hooks(
            config,
            move || Hooked {
                counts: c2.clone(),
                generation: 0,
            },
            PoolableHooks,
        );
        (pool, counts)
    }

    #[test]
    fn test_prepopulates() {
        let (pool, counts) = hooked_pool(ObjectPoolConfig {
            starting_capacity: 5,
            behavior: PoolBehavior::Grow,
        });

        assert_eq!(pool.free_count(), 5);
        assert_eq!(pool.active_count(), 0);
        assert_eq!(counts.created.load(Ordering::Relaxed), 5);
        assert_eq!(counts.taken.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_hooks_fire_on_every_transition() {
        let (mut pool, counts) = hooked_pool(ObjectPoolConfig {
            starting_capacity: 1,
            behavior: PoolBehavior::Grow,
        });

        let a = pool.take().unwrap();
        let b = pool.take().unwrap();
        assert_eq!(counts.created.load(Ordering::Relaxed), 2);
        assert_eq!(counts.taken.load(Ordering::Relaxed), 2);

        pool.give_back(a).unwrap();
        pool.give_back(b).unwrap();
        assert_eq!(counts.returned.load(Ordering::Relaxed), 2);

        // Reused instances were returned once already, and don't get created again.
        let again = pool.take().unwrap();
        assert_eq!(again.generation, 1);
        assert_eq!(counts.created.load(Ordering::Relaxed), 2);
        assert_eq!(counts.taken.load(Ordering::Relaxed), 3);
    }

    #[derive(Debug, Default)]
    struct Tally {
        generation: u32,
    }

    impl Poolable for Tally {
        fn on_returned(&mut self) {
            self.generation += 1;
        }
    }

    #[test]
    fn test_new_poolable_runs_own_hooks() {
        let mut pool = ObjectPool::<Tally, PoolableHooks>::new_poolable(ObjectPoolConfig {
            starting_capacity: 1,
            behavior: PoolBehavior::Fixed,
        });

        let t = pool.take().unwrap();
        assert_eq!(t.generation, 0);
        assert!(pool.give_back(t).is_ok());
        assert_eq!(pool.take().unwrap().generation, 1);
    }

    /// Clears maps as they come back, so the next taker starts empty.
    struct ClearOnReturn;

    impl<K, V> PoolHooks<HashMap<K, V>> for ClearOnReturn {
        fn on_returned(&mut self, value: &mut HashMap<K, V>) {
            value.clear();
        }
    }

    #[test]
    fn test_pools_types_without_hooks() {
        let mut pool = ObjectPool::<HashMap<u32, u32>>::new(ObjectPoolConfig {
            starting_capacity: 1,
            behavior: PoolBehavior::Grow,
        });
        let mut m = pool.take().unwrap();
        m.insert(1, 2);
        pool.give_back(m).unwrap();
        // No hooks: content survives the round trip.
        assert_eq!(pool.take().unwrap().get(&1), Some(&2));

        let mut ints = ObjectPool::with_factory(Default::default(), || 7u64);
        assert_eq!(ints.free_count(), 128);
        assert_eq!(*ints.take().unwrap(), 7);

        let mut cleared = ObjectPool::with_hooks(
            ObjectPoolConfig {
                starting_capacity: 0,
                behavior: PoolBehavior::Grow,
            },
            HashMap::<u32, u32>::new,
            ClearOnReturn,
        );
        let mut m = cleared.take().unwrap();
        m.insert(3, 4);
        cleared.give_back(m).unwrap();
        assert!(cleared.take().unwrap().is_empty());
    }

    #[test]
    fn test_fixed_pool_exhausts() {
        let mut pool = ObjectPool::<String>::new(ObjectPoolConfig {
            starting_capacity: 2,
            behavior: PoolBehavior::Fixed,
        });

        let a = pool.take().unwrap();
        let _b = pool.take().unwrap();
        assert!(pool.take().is_none());
        assert_eq!(pool.count(), 2);

        pool.give_back(a).unwrap();
        assert!(pool.take().is_some());
    }

    #[test]
    fn test_give_back_ignores_foreign_instances() {
        let mut pool = ObjectPool::<Vec<u8>>::new(ObjectPoolConfig {
            starting_capacity: 1,
            behavior: PoolBehavior::Grow,
        });
        let mut other = ObjectPool::<Vec<u8>>::new(ObjectPoolConfig {
            starting_capacity: 1,
            behavior: PoolBehavior::Grow,
        });

        let foreign = other.take().unwrap();
        let foreign_id = foreign.id();
        let rejected = pool.give_back(foreign).unwrap_err();
        assert_eq!(rejected.id(), foreign_id);
        assert_eq!(pool.free_count(), 1);
        assert_eq!(pool.active_count(), 0);

        assert!(pool.give_back_opt(None).is_ok());
        assert_eq!(pool.count(), 1);
    }

    #[test]
    fn test_give_back_twice_is_a_no_op() {
        let mut pool = ObjectPool::<()>::new(ObjectPoolConfig {
            starting_capacity: 0,
            behavior: PoolBehavior::Grow,
        });

        let obj = pool.take().unwrap();
        let id = obj.id();
        assert!(pool.is_active(id));
        pool.give_back(obj).unwrap();
        assert!(!pool.is_active(id));

        // Handles are move-only, so the only way to present the same instance twice is to take it back out of the
        // free list and give it back to a pool which doesn't know it.
        let obj = pool.take().unwrap();
        let mut elsewhere = ObjectPool::<()>::new(ObjectPoolConfig {
            starting_capacity: 0,
            behavior: PoolBehavior::Grow,
        });
        let obj = elsewhere.give_back(obj).unwrap_err();
        assert_eq!(elsewhere.count(), 0);
        pool.give_back(obj).unwrap();
        assert_eq!((pool.free_count(), pool.active_count()), (1, 0));
    }

    #[test]
    fn test_trim_free() {
        let mut pool = ObjectPool::<String>::new(ObjectPoolConfig {
            starting_capacity: 10,
            behavior: PoolBehavior::Grow,
        });
        let held = pool.take().unwrap();
        assert_eq!(pool.trim_free(3), 6);
        assert_eq!(pool.count(), 4);
        pool.give_back(held).unwrap();
        assert_eq!(pool.free_count(), 4);
    }

    #[test]
    fn test_behavior_parsing() {
        assert_eq!("grow".parse::<PoolBehavior>().unwrap(), PoolBehavior::Grow);
        assert_eq!("Fixed".parse::<PoolBehavior>().unwrap(), PoolBehavior::Fixed);
        assert!(matches!(
            "shrink".parse::<PoolBehavior>(),
            Err(ConfigError::UnsupportedPoolBehavior(s)) if s == "shrink"
        ));
        assert_eq!(PoolBehavior::try_from(1u8).unwrap(), PoolBehavior::Fixed);
        assert!(PoolBehavior::try_from(7u8).is_err());

        let config: ObjectPoolConfig = serde_json::from_str(r#"{"behavior": "fixed"}"#).unwrap();
        assert_eq!(config.behavior, PoolBehavior::Fixed);
        assert_eq!(config.starting_capacity, 128);
        assert!(serde_json::from_str::<ObjectPoolConfig>(r#"{"behavior": "shrink"}"#).is_err());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Take,
        /// Give back the nth held instance, modulo however many are held.
        GiveBack(usize),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![Just(Op::Take), any::<usize>().prop_map(Op::GiveBack)]
    }

    proptest! {
        #[test]
        fn test_counts_stay_consistent(
            ops in prop::collection::vec(op_strategy(), 0..300),
            fixed in any::<bool>(),
            starting in 0usize..8,
        ) {
            let behavior = if fixed { PoolBehavior::Fixed } else { PoolBehavior::Grow };
            let (mut pool, counts) = hooked_pool(ObjectPoolConfig { starting_capacity: starting, behavior });
            let mut held: Vec<Pooled<Hooked>> = vec![];

            for op in ops {
                match op {
                    Op::Take => {
                        if let Some(o) = pool.take() {
                            prop_assert!(pool.is_active(o.id()));
                            held.push(o);
                        } else {
                            prop_assert!(fixed);
                        }
                    }
                    Op::GiveBack(n) => {
                        if !held.is_empty() {
                            let o = held.swap_remove(n % held.len());
                            let id = o.id();
                            prop_assert!(pool.give_back(o).is_ok());
                            prop_assert!(!pool.is_active(id));
                        }
                    }
                }

                prop_assert_eq!(pool.active_count(), held.len());
                prop_assert_eq!(pool.count(), counts.created.load(Ordering::Relaxed));
            }
        }
    }
}
