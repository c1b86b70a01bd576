//! Rent buffers of at least a requested length and give them back when done.
//!
//! Per-frame code in an engine churns through a lot of short-lived scratch arrays.  Allocating those fresh every frame
//! puts pressure on the allocator, so instead this crate keeps buckets of previously used `Vec`s around and hands them
//! back out.  The contract is deliberately small:
//!
//! - [ArrayPool::rent] returns an empty `Vec<T>` whose capacity is at least the requested length.  It may be larger.
//! - [ArrayPool::give_back] clears the buffer (dropping its contents) and keeps it for the next renter, or drops it if
//!   there's no room.
//!
//! [RentedArray] wraps a rented buffer in a move-only handle which gives the buffer back exactly once, when dropped.
//! Pools are safe to rent from and give back to from any number of threads at once.
mod pool;
mod rented_array;
mod shared;

pub use pool::*;
pub use rented_array::*;
