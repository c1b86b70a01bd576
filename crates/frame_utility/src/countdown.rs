use crate::sync::{Condvar, Mutex, MutexGuard};

/// A reusable counter which releases a waiter once it has been signalled down to zero.
///
/// The partitioner resets one of these to the number of chunks it dispatches, each chunk signals once, and the calling
/// thread waits.  Signals can be pooled and reused as long as nobody resets one which still has a waiter.
#[derive(Debug)]
pub struct CountdownSignal {
    remaining: Mutex<usize>,
    zero: Condvar,
}

impl CountdownSignal {
    pub fn new(initial: usize) -> Self {
        CountdownSignal {
            remaining: Mutex::new(initial),
            zero: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, usize> {
        // Nothing panics while holding this lock, so poisoning can only come from a bug in this file.
        self.remaining
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    /// Set the number of signals needed before waiters are released.
    pub fn reset(&self, count: usize) {
        *self.lock() = count;
    }

    /// How many signals are still outstanding.
    pub fn current(&self) -> usize {
        *self.lock()
    }

    /// Record one completion.
    ///
    /// Panics if the count is already zero, which means more chunks signalled than were dispatched.
    pub fn signal(&self) {
        let mut guard = self.lock();
        assert!(*guard > 0, "Countdown signalled more times than it was reset to");
        *guard -= 1;
        if *guard == 0 {
            self.zero.notify_all();
        }
    }

    /// Block until the count reaches zero.
    pub fn wait(&self) {
        let mut guard = self.lock();
        while *guard != 0 {
            guard = self.zero.wait(guard).unwrap_or_else(|e| e.into_inner());
        }
    }
}

impl Default for CountdownSignal {
    fn default() -> Self {
        CountdownSignal::new(0)
    }
}

/// Signals a [CountdownSignal] when dropped, including while unwinding.
pub(crate) struct SignalOnDrop<'a>(pub(crate) &'a CountdownSignal);

impl Drop for SignalOnDrop<'_> {
    fn drop(&mut self) {
        self.0.signal();
    }
}
