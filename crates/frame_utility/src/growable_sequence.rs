//! An array-backed list which exposes its backing buffer and can borrow that buffer from an [ArrayPool].
//!
//! The buffer is always fully initialized: every slot in `[0, capacity)` holds a valid `T`, and slots at or past
//! [GrowableSequence::len] hold either `T::default()` or stale values left behind by [GrowableSequence::reset].  This
//! is what lets hot loops work on [GrowableSequence::raw_buffer_mut] directly without any unsafe code, at the cost of
//! requiring `T: Default` for anything which creates slots.
//!
//! Sequences are not internally synchronized.  Sharing one between threads for mutation needs an external lock, the
//! same as a `Vec`.
use std::cmp::Ordering;
use std::ops::{Bound, Index, IndexMut, Range, RangeBounds};
use std::sync::Arc;

use array_pool::{ArrayPool, RentedArray};

const DEFAULT_CAPACITY: usize = 8;

/// Element types which hold resources needing explicit release before the sequence holding them goes away.
///
/// Sequences only call this if built with [GrowableSequence::with_content_release].
pub trait Release {
    fn release(&mut self);
}

enum Storage<T> {
    Owned(Vec<T>),
    Rented(RentedArray<T>),
}

impl<T> Storage<T> {
    fn slots(&self) -> &[T] {
        match self {
            Storage::Owned(v) => v.as_slice(),
            Storage::Rented(r) => r.as_slice(),
        }
    }

    fn slots_mut(&mut self) -> &mut [T] {
        match self {
            Storage::Owned(v) => v.as_mut_slice(),
            Storage::Rented(r) => r.as_mut_slice(),
        }
    }
}

/// Rent a buffer and fill it with defaults, out to whatever capacity the pool actually gave us.
fn rent_slots<T: Default>(pool: &Arc<ArrayPool<T>>, min_len: usize) -> RentedArray<T> {
    let mut rented = pool.rent_array(min_len);
    // Zero-sized types report a capacity of usize::MAX; don't try to fill that.
    let slots = if std::mem::size_of::<T>() == 0 {
        min_len
    } else {
        rented.capacity()
    };
    rented.resize_with(slots, T::default);
    rented
}

/// A growable list over a directly exposed buffer.
///
/// See the module docs for the buffer model.  Dropping the sequence (or calling [GrowableSequence::release]) first
/// releases each element if configured to, then gives a rented buffer back to its pool.
pub struct GrowableSequence<T> {
    storage: Storage<T>,
    len: usize,

    /// Set by [GrowableSequence::with_content_release]; `T::release` captured while we still knew `T: Release`.
    release_hook: Option<fn(&mut T)>,
}

impl<T: Default> GrowableSequence<T> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// An owned sequence with room for `capacity` elements.  Capacities below 1 are raised to 1.
    pub fn with_capacity(capacity: usize) -> Self {
        let slots = std::iter::repeat_with(T::default)
            .take(capacity.max(1))
            .collect();
        GrowableSequence {
            storage: Storage::Owned(slots),
            len: 0,
            release_hook: None,
        }
    }

    /// A sequence whose buffer is rented from the shared pool for `T`.
    pub fn rented(capacity: usize) -> Self
    where
        T: Send + 'static,
    {
        Self::rented_in(&ArrayPool::shared(), capacity)
    }

    /// A sequence whose buffer, and every buffer it grows into, is rented from `pool`.
    pub fn rented_in(pool: &Arc<ArrayPool<T>>, capacity: usize) -> Self {
        GrowableSequence {
            storage: Storage::Rented(rent_slots(pool, capacity.max(1))),
            len: 0,
            release_hook: None,
        }
    }

    /// Adopt a vec as the backing buffer.  All of its elements are present.
    pub fn from_vec(mut items: Vec<T>) -> Self {
        let len = items.len();
        if items.is_empty() {
            items.push(T::default());
        }

        GrowableSequence {
            storage: Storage::Owned(items),
            len,
            release_hook: None,
        }
    }

    /// Release every element with [Release::release] before this sequence's buffer goes away.
    pub fn with_content_release(mut self) -> Self
    where
        T: Release,
    {
        self.release_hook = Some(<T as Release>::release);
        self
    }

    #[cold]
    #[inline(never)]
    fn grow_to(&mut self, new_capacity: usize) {
        debug_assert!(new_capacity > self.capacity());
        let len = self.len;

        match &mut self.storage {
            Storage::Owned(v) => v.resize_with(new_capacity, T::default),
            Storage::Rented(old) => {
                let mut new = rent_slots(old.pool(), new_capacity);
                new[..len].swap_with_slice(&mut old[..len]);
                // The assignment drops the old buffer, which gives it back to its pool.
                *old = new;
            }
        }
    }

    #[cold]
    #[inline(never)]
    fn grow_for_push(&mut self) {
        let cap = self.capacity();
        self.grow_to(cap.saturating_mul(2).max(cap + 1));
    }

    /// Append an item, growing if the buffer is full.
    #[inline]
    pub fn add(&mut self, item: T) {
        if self.len == self.capacity() {
            self.grow_for_push();
        }

        self.storage.slots_mut()[self.len] = item;
        self.len += 1;
    }

    /// Make sure there is room for `additional` more elements without growing.
    ///
    /// If there isn't, grows once to exactly `capacity + 1 + additional`.
    #[inline]
    pub fn ensure_capacity(&mut self, additional: usize) {
        let cap = self.capacity();
        if self.len + additional > cap {
            self.grow_to(cap + 1 + additional);
        }
    }

    /// Append clones of every item in a slice.
    pub fn add_range(&mut self, items: &[T])
    where
        T: Clone,
    {
        self.ensure_capacity(items.len());
        let len = self.len;
        self.storage.slots_mut()[len..len + items.len()].clone_from_slice(items);
        self.len += items.len();
    }

    /// Append clones of every element of another sequence.
    pub fn add_sequence(&mut self, other: &GrowableSequence<T>)
    where
        T: Clone,
    {
        self.add_range(other.as_slice());
    }

    /// Append clones of a range of this sequence's own elements.
    ///
    /// Panics if the range is not within `[0, len)`.
    pub fn extend_from_within(&mut self, range: impl RangeBounds<usize>)
    where
        T: Clone,
    {
        let Range { start, end } = self.resolve_range(range);
        let count = end - start;
        self.ensure_capacity(count);

        let len = self.len;
        let (present, free) = self.storage.slots_mut().split_at_mut(len);
        free[..count].clone_from_slice(&present[start..end]);
        self.len += count;
    }

    fn resolve_range(&self, range: impl RangeBounds<usize>) -> Range<usize> {
        let start = match range.start_bound() {
            Bound::Included(&s) => s,
            Bound::Excluded(&s) => s + 1,
            Bound::Unbounded => 0,
        };
        let end = match range.end_bound() {
            Bound::Included(&e) => e + 1,
            Bound::Excluded(&e) => e,
            Bound::Unbounded => self.len,
        };
        assert!(
            start <= end && end <= self.len,
            "Range {start}..{end} is out of bounds for a sequence of length {}",
            self.len
        );
        start..end
    }

    /// Insert an item at `index`, shifting everything after it right.
    ///
    /// Panics if `index > len`.
    pub fn insert(&mut self, index: usize, item: T) {
        assert!(
            index <= self.len,
            "Insertion index {index} is out of range for a sequence of length {}",
            self.len
        );

        if self.len == self.capacity() {
            self.ensure_capacity(1);
        }

        let len = self.len;
        let slots = self.storage.slots_mut();
        slots[len] = item;
        slots[index..=len].rotate_right(1);
        self.len += 1;
    }

    /// Remove and return the element at `index`, shifting everything after it left.
    ///
    /// The vacated trailing slot is reset to `T::default()` so the sequence doesn't keep the removed value alive.
    /// Panics if `index >= len`.
    pub fn take_at(&mut self, index: usize) -> T {
        assert!(
            index < self.len,
            "Removal index {index} is out of range for a sequence of length {}",
            self.len
        );

        let len = self.len;
        let slots = self.storage.slots_mut();
        slots[index..len].rotate_left(1);
        self.len -= 1;
        std::mem::take(&mut slots[len - 1])
    }

    /// Remove the element at `index`.  See [GrowableSequence::take_at].
    pub fn remove_at(&mut self, index: usize) {
        std::mem::drop(self.take_at(index));
    }

    /// Remove and return the last element.
    pub fn pop(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }

        Some(self.take_at(self.len - 1))
    }

    /// Remove the first element equal to `item`.  Returns whether one was found.
    pub fn remove(&mut self, item: &T) -> bool
    where
        T: PartialEq,
    {
        match self.index_of(item) {
            Some(i) => {
                self.remove_at(i);
                true
            }
            None => false,
        }
    }

    /// Set the length to zero and reset every slot of the buffer to `T::default()`.
    pub fn clear(&mut self) {
        self.storage.slots_mut().fill_with(T::default);
        self.len = 0;
    }
}

impl<T> GrowableSequence<T> {
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of slots in the backing buffer.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.storage.slots().len()
    }

    /// Is the backing buffer borrowed from an [ArrayPool]?
    pub fn is_rented(&self) -> bool {
        matches!(self.storage, Storage::Rented(_))
    }

    /// Will elements be released before the buffer goes away?
    pub fn releases_contents(&self) -> bool {
        self.release_hook.is_some()
    }

    #[inline]
    pub fn as_slice(&self) -> &[T] {
        &self.storage.slots()[..self.len]
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        let len = self.len;
        &mut self.storage.slots_mut()[..len]
    }

    /// The whole backing buffer, including free slots past the length.
    ///
    /// Free slots hold defaults or stale values; see the module docs.
    #[inline]
    pub fn raw_buffer(&self) -> &[T] {
        self.storage.slots()
    }

    /// The whole backing buffer, mutably.  Pair with [GrowableSequence::set_len_raw] to fill a sequence in place.
    #[inline]
    pub fn raw_buffer_mut(&mut self) -> &mut [T] {
        self.storage.slots_mut()
    }

    /// Set the length directly, exposing whatever is in the buffer up to `len`.
    ///
    /// Panics if `len > capacity`.
    pub fn set_len_raw(&mut self, len: usize) {
        assert!(
            len <= self.capacity(),
            "Length {len} exceeds capacity {}",
            self.capacity()
        );
        self.len = len;
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<&T> {
        self.as_slice().get(index)
    }

    #[inline]
    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.as_mut_slice().get_mut(index)
    }

    pub fn first(&self) -> Option<&T> {
        self.as_slice().first()
    }

    pub fn last(&self) -> Option<&T> {
        self.as_slice().last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.as_slice().iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, T> {
        self.as_mut_slice().iter_mut()
    }

    /// Index of the first element equal to `item`.  Does not modify the sequence.
    pub fn index_of(&self, item: &T) -> Option<usize>
    where
        T: PartialEq,
    {
        self.as_slice().iter().position(|x| x == item)
    }

    pub fn contains(&self, item: &T) -> bool
    where
        T: PartialEq,
    {
        self.as_slice().contains(item)
    }

    /// Sort `[0, len)` in place.  Unstable, and never allocates.
    pub fn sort(&mut self)
    where
        T: Ord,
    {
        self.as_mut_slice().sort_unstable();
    }

    pub fn sort_by(&mut self, compare: impl FnMut(&T, &T) -> Ordering) {
        self.as_mut_slice().sort_unstable_by(compare);
    }

    pub fn sort_by_key<K: Ord>(&mut self, key: impl FnMut(&T) -> K) {
        self.as_mut_slice().sort_unstable_by_key(key);
    }

    /// Set the length to zero without touching the buffer.
    ///
    /// The old elements stay in their slots, visible through [GrowableSequence::raw_buffer], until overwritten.
    #[inline]
    pub fn reset(&mut self) {
        self.len = 0;
    }

    /// Move the present elements out into a vec, giving a rented buffer back to its pool.
    ///
    /// Elements are not released; ownership of them moves to the vec.
    pub fn into_vec(mut self) -> Vec<T> {
        let len = std::mem::replace(&mut self.len, 0);
        match std::mem::replace(&mut self.storage, Storage::Owned(Vec::new())) {
            Storage::Owned(mut v) => {
                v.truncate(len);
                v
            }
            Storage::Rented(mut r) => r.drain(..len).collect(),
        }
    }

    /// Release this sequence now rather than at the end of scope.
    ///
    /// Equivalent to dropping it: elements are released if configured, then a rented buffer goes back to its pool.
    pub fn release(self) {}

    fn release_contents(&mut self) {
        if let Some(hook) = self.release_hook {
            let len = self.len;
            self.storage.slots_mut()[..len].iter_mut().for_each(hook);
        }
    }
}

impl<T> Drop for GrowableSequence<T> {
    fn drop(&mut self) {
        // Elements first; the buffer is given back when `storage` drops after this.
        self.release_contents();
    }
}

impl<T: Default> Release for GrowableSequence<T> {
    fn release(&mut self) {
        self.release_contents();
        self.len = 0;
        self.storage = Storage::Owned(vec![T::default()]);
    }
}

impl<T: Default> Default for GrowableSequence<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Default> Clone for GrowableSequence<T> {
    fn clone(&self) -> Self {
        let mut ret = match &self.storage {
            Storage::Owned(_) => GrowableSequence::with_capacity(self.len),
            Storage::Rented(r) => GrowableSequence::rented_in(r.pool(), self.len),
        };
        ret.add_range(self.as_slice());
        ret.release_hook = self.release_hook;
        ret
    }
}

impl<T> Index<usize> for GrowableSequence<T> {
    type Output = T;

    #[inline]
    fn index(&self, index: usize) -> &T {
        &self.as_slice()[index]
    }
}

impl<T> IndexMut<usize> for GrowableSequence<T> {
    #[inline]
    fn index_mut(&mut self, index: usize) -> &mut T {
        &mut self.as_mut_slice()[index]
    }
}

impl<T: Default> Extend<T> for GrowableSequence<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        let iter = iter.into_iter();
        self.ensure_capacity(iter.size_hint().0);
        for item in iter {
            self.add(item);
        }
    }
}

impl<T: Default> FromIterator<T> for GrowableSequence<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let iter = iter.into_iter();
        let mut ret = GrowableSequence::with_capacity(iter.size_hint().0);
        ret.extend(iter);
        ret
    }
}

impl<'a, T> IntoIterator for &'a GrowableSequence<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'a, T> IntoIterator for &'a mut GrowableSequence<T> {
    type Item = &'a mut T;
    type IntoIter = std::slice::IterMut<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter_mut()
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for GrowableSequence<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.as_slice()).finish()
    }
}

impl<T: PartialEq> PartialEq for GrowableSequence<T> {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl<T: Eq> Eq for GrowableSequence<T> {}
