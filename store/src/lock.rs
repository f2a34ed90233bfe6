//! Single-writer lock.
//!
//! At most one read-write transaction may be active per repository. The
//! flag lives behind a mutex and waiters park on a condition variable, so a
//! queued writer costs nothing while it waits. Release happens in
//! [`WriterGuard`]'s `Drop`, which runs exactly once no matter how the
//! owning transaction ends.
//!
//! Acquiring a second writer on a thread that already holds one never
//! returns under [`WriterWait::Indefinite`](crate::config::WriterWait); with a
//! bounded wait it fails with [`StoreError::LockTimeout`].

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{StoreError, StoreResult};

#[derive(Debug, Default)]
pub(crate) struct WriterLock {
    held: Mutex<bool>,
    released: Condvar,
}

impl WriterLock {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Block until the lock is free, or until `timeout` elapses.
    pub(crate) fn acquire(&self, timeout: Option<Duration>) -> StoreResult<WriterGuard<'_>> {
        let started = Instant::now();
        let deadline = timeout.map(|t| started + t);
        let mut held = self.held.lock();
        while *held {
            match deadline {
                None => self.released.wait(&mut held),
                Some(deadline) => {
                    if self.released.wait_until(&mut held, deadline).timed_out() && *held {
                        return Err(StoreError::LockTimeout {
                            waited_ms: started.elapsed().as_millis() as u64,
                        });
                    }
                }
            }
        }
        *held = true;
        Ok(WriterGuard { lock: self })
    }

    #[cfg(test)]
    pub(crate) fn is_held(&self) -> bool {
        *self.held.lock()
    }

    fn release(&self) {
        let mut held = self.held.lock();
        *held = false;
        drop(held);
        self.released.notify_one();
    }
}

/// Proof of holding the writer lock. Dropping it releases the lock.
#[derive(Debug)]
pub(crate) struct WriterGuard<'a> {
    lock: &'a WriterLock,
}

impl Drop for WriterGuard<'_> {
    fn drop(&mut self) {
        self.lock.release();
    }
}
