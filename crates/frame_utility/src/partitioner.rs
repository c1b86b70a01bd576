//! Fork-join data parallelism over sequences and index ranges.
//!
//! A call splits its input into contiguous chunks (see [crate::chunking]), copies each chunk into a scratch buffer
//! rented from the shared [array_pool::ArrayPool] for the element type, and hands one job per chunk to the worker
//! pool.  The calling thread then blocks until every chunk has finished.  Jobs never borrow from the caller, so they
//! can outlive a panicking caller without touching freed memory.
//!
//! Panics inside a chunk are caught and reported once every chunk is done.  Nothing is ever left waiting on a chunk
//! which faulted.
use std::num::NonZeroUsize;
use std::ops::Range;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use array_pool::ArrayPool;

use crate::chunking::{hardware_concurrency_hint, partition, resolve_worker_count, Chunk, Chunks};
use crate::countdown::{CountdownSignal, SignalOnDrop};
use crate::error::{Result, WorkerFault, WorkerFaults};
use crate::growable_sequence::GrowableSequence;
use crate::object_pool::{ObjectPool, ObjectPoolConfig, PoolBehavior, Pooled};
use crate::worker_pool::WorkerPoolHandle;

#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct PartitionerConfig {
    /// How many background threads to start.
    ///
    /// Default: one less than the available parallelism, and at least one.
    pub worker_threads: Option<NonZeroUsize>,

    /// The most chunks a single call is split into.
    ///
    /// Default: the number of worker threads.
    pub max_chunks: Option<NonZeroUsize>,

    /// Inputs with fewer items than this run as a single chunk on the calling thread.
    ///
    /// Default: 2.
    pub min_parallel_len: usize,

    /// Worker threads are named `{thread_name_prefix}-{index}`.
    ///
    /// Default: `frame-worker`.
    pub thread_name_prefix: String,
}

impl Default for PartitionerConfig {
    fn default() -> Self {
        PartitionerConfig {
            worker_threads: None,
            max_chunks: None,
            min_parallel_len: 2,
            thread_name_prefix: "frame-worker".to_string(),
        }
    }
}

#[derive(Default)]
struct PooledSignal(Arc<CountdownSignal>);

type FaultLog = Arc<Mutex<Vec<WorkerFault>>>;

/// Splits work across a worker pool and waits for it.
///
/// One partitioner may be shared by any number of threads; concurrent calls each get their own countdown signal.
pub struct Partitioner {
    workers: WorkerPoolHandle,
    signals: Mutex<ObjectPool<PooledSignal>>,
    max_chunks: NonZeroUsize,
    min_parallel_len: usize,
}

lazy_static::lazy_static! {
    static ref GLOBAL_PARTITIONER: Partitioner = Partitioner::new(Default::default()).unwrap_or_else(|e| {
        log::warn!("Unable to start the global partitioner's workers: {}. Running partitioned work inline", e);
        Partitioner::with_worker_pool(WorkerPoolHandle::new_inline(), &Default::default())
    });
}

impl Partitioner {
    /// Build a partitioner with its own threaded worker pool.
    pub fn new(config: PartitionerConfig) -> Result<Self> {
        let threads = config.worker_threads.unwrap_or_else(hardware_concurrency_hint);
        let workers = WorkerPoolHandle::new_threaded(threads, &config.thread_name_prefix)?;
        Ok(Self::with_worker_pool(workers, &config))
    }

    /// Build a partitioner over an existing worker pool.
    ///
    /// `config.worker_threads` and `config.thread_name_prefix` are ignored, since the pool already exists.
    pub fn with_worker_pool(workers: WorkerPoolHandle, config: &PartitionerConfig) -> Self {
        let max_chunks = config.max_chunks.unwrap_or_else(|| workers.threads());
        let signals = ObjectPool::new(ObjectPoolConfig {
            starting_capacity: 4,
            behavior: PoolBehavior::Grow,
        });

        Partitioner {
            workers,
            signals: Mutex::new(signals),
            max_chunks,
            min_parallel_len: config.min_parallel_len,
        }
    }

    /// The process-wide partitioner, built with the default config the first time it is asked for.
    pub fn global() -> &'static Partitioner {
        &GLOBAL_PARTITIONER
    }

    /// The most chunks one call will be split into.
    pub fn worker_slots(&self) -> NonZeroUsize {
        self.max_chunks
    }

    pub fn worker_pool(&self) -> &WorkerPoolHandle {
        &self.workers
    }

    /// Run `action` once for every element of `seq`, across the worker pool.
    ///
    /// Each worker sees a copy of its chunk, not the elements in `seq` itself.
    pub fn for_each_element<T, F>(&self, seq: &GrowableSequence<T>, action: F) -> Result<()>
    where
        T: Clone + Send + 'static,
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.for_each_element_in(seq.as_slice(), action)
    }

    /// [Partitioner::for_each_element] over a plain slice.
    pub fn for_each_element_in<T, F>(&self, items: &[T], action: F) -> Result<()>
    where
        T: Clone + Send + 'static,
        F: Fn(&T) + Send + Sync + 'static,
    {
        let workers = self.workers_for(items.len());
        if workers.get() == 1 {
            return run_on_caller(0..items.len(), || items.iter().for_each(&action));
        }

        let action = Arc::new(action);
        let scratch = ArrayPool::<T>::shared();
        self.run_chunks(partition(items.len(), workers), 0, |chunk| {
            let mut buf = scratch.rent_array(chunk.len);
            buf.extend_from_slice(&items[chunk.range()]);
            let action = action.clone();
            move || buf.iter().for_each(&*action)
        })
    }

    /// Run `action` once per chunk of `seq`, handing it a scratch copy of that chunk.
    ///
    /// The slice is exactly as long as the chunk.  Changes made through it are not written back to `seq`.
    pub fn for_each_chunk<T, F>(&self, seq: &GrowableSequence<T>, action: F) -> Result<()>
    where
        T: Clone + Send + 'static,
        F: Fn(&mut [T]) + Send + Sync + 'static,
    {
        self.for_each_chunk_in(seq.as_slice(), action)
    }

    /// [Partitioner::for_each_chunk] over a plain slice.
    pub fn for_each_chunk_in<T, F>(&self, items: &[T], action: F) -> Result<()>
    where
        T: Clone + Send + 'static,
        F: Fn(&mut [T]) + Send + Sync + 'static,
    {
        let scratch = ArrayPool::<T>::shared();
        let workers = self.workers_for(items.len());
        if workers.get() == 1 {
            return run_on_caller(0..items.len(), || {
                let mut buf = scratch.rent_array(items.len());
                buf.extend_from_slice(items);
                action(buf.as_mut_slice())
            });
        }

        let action = Arc::new(action);
        self.run_chunks(partition(items.len(), workers), 0, |chunk| {
            let mut buf = scratch.rent_array(chunk.len);
            buf.extend_from_slice(&items[chunk.range()]);
            let action = action.clone();
            move || (*action)(buf.as_mut_slice())
        })
    }

    /// Run `body` once for every index in `range`, across the worker pool.
    ///
    /// An empty or reversed range runs nothing.  Indices are `usize`; callers with signed bounds offset them into a
    /// non-negative range and back inside `body`.
    pub fn for_range<F>(&self, range: Range<usize>, body: F) -> Result<()>
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        let start = range.start;
        let count = range.end.saturating_sub(start);
        let workers = self.workers_for(count);
        if workers.get() == 1 {
            return run_on_caller(start..start + count, || (start..start + count).for_each(&body));
        }

        let body = Arc::new(body);
        self.run_chunks(partition(count, workers), start, |chunk| {
            let body = body.clone();
            let indices = start + chunk.offset..start + chunk.offset + chunk.len;
            move || indices.for_each(&*body)
        })
    }

    fn workers_for(&self, count: usize) -> NonZeroUsize {
        let workers = resolve_worker_count(count, self.max_chunks, self.min_parallel_len);
        if workers.get() > 1 && self.workers.is_worker_thread() {
            log::debug!(
                "Partitioned call of {} items made from a worker thread; running it as one chunk on that thread",
                count
            );
            return NonZeroUsize::MIN;
        }
        workers
    }

    /// `None` only if the signal pool refuses, which a growing pool never does.  The caller then uses a fresh signal.
    fn take_signal(&self) -> Option<Pooled<PooledSignal>> {
        self.signals.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    fn give_back_signal(&self, signal: Option<Pooled<PooledSignal>>) {
        let mut signals = self.signals.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(stray) = signals.give_back_opt(signal) {
            std::mem::drop(stray);
        }
    }

    /// Dispatch one job per chunk and wait for all of them.
    ///
    /// `prepare` runs on the calling thread, in chunk order, and builds the job for a chunk.  Every job is built before
    /// anything is dispatched, so a panic in `prepare` (a panicking `Clone`, say) fails the call with nothing running
    /// and no signal checked out.  `base` is added to chunk offsets when reporting faults.
    fn run_chunks<J>(&self, chunks: Chunks, base: usize, mut prepare: impl FnMut(Chunk) -> J) -> Result<()>
    where
        J: FnOnce() + Send + 'static,
    {
        let mut jobs = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            match catch_unwind(AssertUnwindSafe(|| prepare(chunk))) {
                Ok(job) => jobs.push((chunk, job)),
                Err(payload) => {
                    let fault = fault_from_panic(chunk, base, payload.as_ref());
                    return Err(WorkerFaults {
                        first: fault,
                        others: vec![],
                    }
                    .into());
                }
            }
        }

        log::trace!("Dispatching {} chunks", jobs.len());

        let signal = self.take_signal();
        let countdown = signal.as_ref().map(|s| s.0.clone()).unwrap_or_default();
        countdown.reset(jobs.len());
        let faults: FaultLog = Default::default();

        for (chunk, job) in jobs {
            let countdown = countdown.clone();
            let faults = faults.clone();
            self.workers.submit(move || {
                let _done = SignalOnDrop(&*countdown);
                if let Err(payload) = catch_unwind(AssertUnwindSafe(job)) {
                    let fault = fault_from_panic(chunk, base, payload.as_ref());
                    faults.lock().unwrap_or_else(|e| e.into_inner()).push(fault);
                }
            });
        }

        countdown.wait();
        self.give_back_signal(signal);

        let faults = std::mem::take(&mut *faults.lock().unwrap_or_else(|e| e.into_inner()));
        match WorkerFaults::from_vec(faults) {
            Some(f) => Err(f.into()),
            None => Ok(()),
        }
    }

    #[cfg(test)]
    fn signal_counts(&self) -> (usize, usize) {
        let signals = self.signals.lock().unwrap();
        (signals.free_count(), signals.active_count())
    }
}

impl std::fmt::Debug for Partitioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Partitioner")
            .field("workers", &self.workers)
            .field("max_chunks", &self.max_chunks)
            .field("min_parallel_len", &self.min_parallel_len)
            .finish()
    }
}

/// Run the whole of a call as chunk 0 on the calling thread.
fn run_on_caller(range: Range<usize>, work: impl FnOnce()) -> Result<()> {
    match catch_unwind(AssertUnwindSafe(work)) {
        Ok(()) => Ok(()),
        Err(payload) => {
            let chunk = Chunk {
                index: 0,
                offset: 0,
                len: range.len(),
            };
            let fault = fault_from_panic(chunk, range.start, payload.as_ref());
            Err(WorkerFaults {
                first: fault,
                others: vec![],
            }
            .into())
        }
    }
}

fn fault_from_panic(chunk: Chunk, base: usize, payload: &(dyn std::any::Any + Send)) -> WorkerFault {
    let fault = WorkerFault {
        chunk: chunk.index,
        range: base + chunk.offset..base + chunk.offset + chunk.len,
        message: panic_message(payload),
    };
    log::warn!("Partitioned {}", fault);
    fault
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}

/// [Partitioner::for_each_element_in] on the [Partitioner::global] partitioner.
pub fn for_each_element<T, F>(items: &[T], action: F) -> Result<()>
where
    T: Clone + Send + 'static,
    F: Fn(&T) + Send + Sync + 'static,
{
    Partitioner::global().for_each_element_in(items, action)
}

/// [Partitioner::for_range] on the [Partitioner::global] partitioner.
pub fn for_range<F>(range: Range<usize>, body: F) -> Result<()>
where
    F: Fn(usize) + Send + Sync + 'static,
{
    Partitioner::global().for_range(range, body)
}
