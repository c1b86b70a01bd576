use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::pool::ArrayPool;

type PoolMap = HashMap<TypeId, Arc<dyn Any + Send + Sync>, ahash::RandomState>;

lazy_static::lazy_static! {
    /// One pool per element type, created on first use.
    static ref SHARED_POOLS: RwLock<PoolMap> = RwLock::new(HashMap::default());
}

impl<T: Send + 'static> ArrayPool<T> {
    /// The process-wide pool for `T`, created with the default configuration the first time it is asked for.
    pub fn shared() -> Arc<ArrayPool<T>> {
        let tid = TypeId::of::<T>();

        {
            let guard = SHARED_POOLS
                .read()
                .expect("Shared array pool registry is poisoned");
            if let Some(p) = guard.get(&tid) {
                return downcast_pool(p.clone());
            }
        }

        let mut guard = SHARED_POOLS
            .write()
            .expect("Shared array pool registry is poisoned");
        let entry = guard
            .entry(tid)
            .or_insert_with(|| {
                log::debug!(
                    "Creating shared array pool for {}",
                    std::any::type_name::<T>()
                );
                Arc::new(ArrayPool::<T>::default())
            })
            .clone();
        downcast_pool(entry)
    }
}

fn downcast_pool<T: Send + 'static>(p: Arc<dyn Any + Send + Sync>) -> Arc<ArrayPool<T>> {
    p.downcast::<ArrayPool<T>>()
        .unwrap_or_else(|_| unreachable!("Entry in the shared pool map is keyed by the wrong type"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_is_per_type() {
        let a1 = ArrayPool::<u16>::shared();
        let a2 = ArrayPool::<u16>::shared();
        assert!(Arc::ptr_eq(&a1, &a2));

        // Different element types get different pools; this just has to not panic on the downcast.
        let b = ArrayPool::<String>::shared();
        let buf = b.rent(3);
        assert!(buf.capacity() >= 3);
        b.give_back(buf);
    }
}
