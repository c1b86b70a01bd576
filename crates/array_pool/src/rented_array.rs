use std::sync::Arc;

use crate::pool::ArrayPool;

/// A buffer rented from an [ArrayPool].
///
/// Dropping this gives the buffer back to the pool it came from.  Since the handle is move-only, that happens exactly
/// once.  The buffer may be pushed to beyond its rented capacity; the pool accepts whatever comes back.
pub struct RentedArray<T> {
    /// Always `Some` until drop or [RentedArray::into_vec].
    buf: Option<Vec<T>>,
    pool: Arc<ArrayPool<T>>,
}

impl<T> ArrayPool<T> {
    /// Rent a buffer wrapped in a handle which gives it back on drop.
    pub fn rent_array(self: &Arc<Self>, min_len: usize) -> RentedArray<T> {
        RentedArray {
            buf: Some(self.rent(min_len)),
            pool: self.clone(),
        }
    }
}

impl<T> RentedArray<T> {
    /// The pool this buffer goes back to.
    pub fn pool(&self) -> &Arc<ArrayPool<T>> {
        &self.pool
    }

    /// Keep the buffer instead of giving it back.
    pub fn into_vec(mut self) -> Vec<T> {
        self.buf
            .take()
            .unwrap_or_else(|| unreachable!("Buffer is only taken on drop"))
    }
}

impl<T> std::ops::Deref for RentedArray<T> {
    type Target = Vec<T>;

    fn deref(&self) -> &Self::Target {
        self.buf
            .as_ref()
            .unwrap_or_else(|| unreachable!("Buffer is only taken on drop"))
    }
}

impl<T> std::ops::DerefMut for RentedArray<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.buf
            .as_mut()
            .unwrap_or_else(|| unreachable!("Buffer is only taken on drop"))
    }
}

impl<T> Drop for RentedArray<T> {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.give_back(buf);
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for RentedArray<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RentedArray")
            .field("buf", &self.buf)
            .finish_non_exhaustive()
    }
}
