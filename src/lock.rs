//! Critical sections guarding subject mutation
//!
//! Subjects never implement their own mutual exclusion. A backend hands each
//! subject a [`CriticalSection`] that is wide enough for every writer of that
//! backend: an in-process lock for the memory and file backends, a
//! distributed lock client for a backend shared between nodes.

use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::error::{RepoError, Result};

/// Marker for whatever a critical section keeps alive while held
pub trait Held {}

impl<T> Held for T {}

/// Proof of holding a critical section; dropping it leaves the section
pub type SectionGuard<'a> = Box<dyn Held + 'a>;

/// Mutual exclusion over a subject's (or a backend's) mutable state
pub trait CriticalSection: Send + Sync {
    /// Block until the section is entered, or fail with
    /// [`RepoError::LockTimeout`] / [`RepoError::Unavailable`].
    fn enter(&self) -> Result<SectionGuard<'_>>;
}

/// An in-process lock with an optional acquisition timeout
#[derive(Debug, Default)]
pub struct InProcessLock {
    held: Mutex<bool>,
    released: Condvar,
    timeout: Option<Duration>,
}

impl InProcessLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Option<Duration>) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, bool>> {
        self.held
            .lock()
            .map_err(|_| RepoError::unavailable("subject lock poisoned"))
    }
}

struct InProcessGuard<'a> {
    lock: &'a InProcessLock,
}

impl Drop for InProcessGuard<'_> {
    fn drop(&mut self) {
        // A poisoned flag is still released so later writers can observe the poison themselves.
        let mut held = match self.lock.held.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *held = false;
        self.lock.released.notify_one();
    }
}

impl CriticalSection for InProcessLock {
    fn enter(&self) -> Result<SectionGuard<'_>> {
        let mut held = self.state()?;
        let deadline = self.timeout.map(|t| (t, Instant::now() + t));
        while *held {
            held = match deadline {
                None => self
                    .released
                    .wait(held)
                    .map_err(|_| RepoError::unavailable("subject lock poisoned"))?,
                Some((timeout, deadline)) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(RepoError::LockTimeout(timeout));
                    }
                    self.released
                        .wait_timeout(held, deadline - now)
                        .map_err(|_| RepoError::unavailable("subject lock poisoned"))?
                        .0
                }
            };
        }
        *held = true;
        Ok(Box::new(InProcessGuard { lock: self }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_excludes_concurrent_holders() {
        let lock = Arc::new(InProcessLock::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let lock = Arc::clone(&lock);
                let inside = Arc::clone(&inside);
                thread::spawn(move || {
                    for _ in 0..100 {
                        let _guard = lock.enter().unwrap();
                        assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn test_timeout_is_recoverable() {
        let lock = InProcessLock::with_timeout(Some(Duration::from_millis(20)));
        let _held = lock.enter().unwrap();
        let err = lock.enter().err().unwrap();
        assert!(matches!(err, RepoError::LockTimeout(_)));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_reentry_after_release() {
        let lock = InProcessLock::new();
        drop(lock.enter().unwrap());
        drop(lock.enter().unwrap());
    }
}
