//! Where partitioned work actually runs.
use std::num::NonZeroUsize;
use std::sync::Arc;

use crate::error::{ConfigError, Result};

#[derive(Clone)]
enum WorkerPoolKind {
    Inline,
    Threaded(Arc<rayon::ThreadPool>),
}

/// A fire-and-forget job queue.
///
/// The threaded kind hands jobs to a dedicated rayon pool.  The inline kind runs each job on the submitting thread
/// before `submit` returns, which is what tests and single-core machines want.  Nothing comes back from a job except
/// what the job itself arranges, which for the partitioner is a countdown signal.
#[derive(Clone)]
pub struct WorkerPoolHandle {
    kind: WorkerPoolKind,
}

impl WorkerPoolHandle {
    /// Spawn a pool with the given number of background threads, named `{name_prefix}-{index}`.
    pub fn new_threaded(threads: NonZeroUsize, name_prefix: &str) -> Result<Self> {
        let prefix = name_prefix.to_string();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.get())
            .thread_name(move |i| format!("{prefix}-{i}"))
            .build()
            .map_err(ConfigError::from)?;

        log::debug!(
            "Started worker pool with {} threads named {}-*",
            threads,
            name_prefix
        );

        Ok(WorkerPoolHandle {
            kind: WorkerPoolKind::Threaded(Arc::new(pool)),
        })
    }

    /// A pool which runs every job on the thread that submits it.
    pub fn new_inline() -> Self {
        WorkerPoolHandle {
            kind: WorkerPoolKind::Inline,
        }
    }

    /// How many jobs can run at once.
    pub fn threads(&self) -> NonZeroUsize {
        match &self.kind {
            WorkerPoolKind::Inline => NonZeroUsize::MIN,
            WorkerPoolKind::Threaded(p) => {
                NonZeroUsize::new(p.current_num_threads()).unwrap_or(NonZeroUsize::MIN)
            }
        }
    }

    pub fn is_inline(&self) -> bool {
        matches!(self.kind, WorkerPoolKind::Inline)
    }

    /// Is the calling thread one of this pool's workers?
    ///
    /// Blocking a worker on jobs queued behind it can deadlock the pool, so callers check this first.
    pub fn is_worker_thread(&self) -> bool {
        match &self.kind {
            WorkerPoolKind::Inline => false,
            WorkerPoolKind::Threaded(p) => p.current_thread_index().is_some(),
        }
    }

    /// Queue a job.
    ///
    /// Jobs must not panic; a panic in a threaded job aborts the process, per rayon's default handler.
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) {
        match &self.kind {
            WorkerPoolKind::Inline => job(),
            WorkerPoolKind::Threaded(p) => p.spawn(job),
        }
    }
}

impl std::fmt::Debug for WorkerPoolHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPoolHandle")
            .field("inline", &self.is_inline())
            .field("threads", &self.threads())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    #[test]
    fn test_inline_runs_immediately() {
        let pool = WorkerPoolHandle::new_inline();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let counter = counter.clone();
            pool.submit(move || {
                counter.fetch_add(1, Ordering::Relaxed);
            });
        }

        assert_eq!(counter.load(Ordering::Relaxed), 3);
        assert!(!pool.is_worker_thread());
        assert_eq!(pool.threads().get(), 1);
    }

    #[test]
    fn test_threaded_runs_on_workers() {
        let pool = WorkerPoolHandle::new_threaded(NonZeroUsize::new(2).unwrap(), "test-worker").unwrap();
        assert_eq!(pool.threads().get(), 2);
        assert!(!pool.is_worker_thread());

        let (tx, rx) = mpsc::channel();
        for _ in 0..4 {
            let tx = tx.clone();
            let inner = pool.clone();
            pool.submit(move || {
                let name = std::thread::current().name().map(str::to_string);
                tx.send((name, inner.is_worker_thread())).unwrap();
            });
        }
        std::mem::drop(tx);

        let got = rx.iter().collect::<Vec<_>>();
        assert_eq!(got.len(), 4);
        for (name, on_worker) in got {
            assert!(on_worker);
            assert!(name.unwrap().starts_with("test-worker-"));
        }
    }
}
