//! Synchronization primitives which switch to Loom's under `cfg(loom)`.
//!
//! Only the countdown signal goes through here.  Everything else talks to rayon, which Loom can't model anyway.
#[cfg(not(loom))]
mod not_loom {
    pub use std::sync::{Arc, Condvar, Mutex, MutexGuard};

    #[cfg(test)]
    pub use std::thread::spawn;

    #[cfg(test)]
    pub fn wrap_test(what: impl Fn() + Sync + Send + 'static) {
        what()
    }
}

#[cfg(not(loom))]
pub(crate) use not_loom::*;

#[cfg(loom)]
mod with_loom {
    pub use loom::sync::{Arc, Condvar, Mutex, MutexGuard};

    #[cfg(test)]
    pub use loom::thread::spawn;

    #[cfg(test)]
    pub fn wrap_test(what: impl Fn() + Sync + Send + 'static) {
        loom::model(what)
    }
}

#[cfg(loom)]
pub(crate) use with_loom::*;
