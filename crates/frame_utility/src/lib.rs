//! Per-frame data structures for simulation code: a growable sequence which can draw its storage from an
//! [array_pool::ArrayPool], a generic [ObjectPool], and a fork-join [Partitioner] for splitting work over a sequence
//! or an index range across worker threads.
//!
//! None of the data structures here are internally synchronized.  The partitioner is, and is meant to be shared.
pub mod chunking;
pub mod countdown;
mod error;
pub mod growable_sequence;
pub mod object_pool;
pub mod partitioner;
mod sync;
mod unique_id;
pub mod worker_pool;

pub use error::*;
pub use growable_sequence::{GrowableSequence, Release};
pub use object_pool::{
    NoHooks, ObjectPool, ObjectPoolConfig, PoolBehavior, PoolHooks, Poolable, PoolableHooks, Pooled,
};
pub use partitioner::{for_each_element, for_range, Partitioner, PartitionerConfig};
pub use unique_id::UniqueId;
pub use worker_pool::WorkerPoolHandle;
