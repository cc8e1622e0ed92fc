//! Single-flight execution guard.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::trace;

/// Allows at most one execution in flight.
///
/// `try_acquire` is a compare-and-swap on the flag; the returned permit clears
/// it on drop, so every exit path releases exactly once.
#[derive(Debug, Default)]
pub struct ExecutionGuard {
    executing: AtomicBool,
    active_delegate: Mutex<Option<String>>,
    acquisitions: AtomicU64,
    releases: AtomicU64,
}

impl ExecutionGuard {
    /// Create a released guard.
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the guard, or `None` if an execution is already in flight.
    pub fn try_acquire(self: &Arc<Self>) -> Option<ExecutionPermit> {
        self.executing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
        trace!("Execution guard acquired");
        Some(ExecutionPermit {
            guard: Arc::clone(self),
        })
    }

    /// Whether an execution is in flight.
    pub fn is_executing(&self) -> bool {
        self.executing.load(Ordering::Acquire)
    }

    /// Delegate id used by the in-flight execution, if any.
    pub fn active_delegate(&self) -> Option<String> {
        self.active_delegate
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of successful acquisitions.
    pub fn acquisitions(&self) -> u64 {
        self.acquisitions.load(Ordering::Relaxed)
    }

    /// Number of releases.
    pub fn releases(&self) -> u64 {
        self.releases.load(Ordering::Relaxed)
    }

    fn set_active_delegate(&self, delegate: Option<String>) {
        *self.active_delegate.lock().unwrap_or_else(PoisonError::into_inner) = delegate;
    }
}

/// Proof of holding the guard. Releases it on drop.
#[derive(Debug)]
pub struct ExecutionPermit {
    guard: Arc<ExecutionGuard>,
}

impl ExecutionPermit {
    /// Record the delegate carrying out this execution.
    pub fn set_active_delegate(&self, delegate: impl Into<String>) {
        self.guard.set_active_delegate(Some(delegate.into()));
    }
}

impl Drop for ExecutionPermit {
    fn drop(&mut self) {
        self.guard.set_active_delegate(None);
        self.guard.releases.fetch_add(1, Ordering::Relaxed);
        self.guard.executing.store(false, Ordering::Release);
        trace!("Execution guard released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_while_held() {
        let guard = Arc::new(ExecutionGuard::new());

        let permit = guard.try_acquire().unwrap();
        assert!(guard.is_executing());
        assert!(guard.try_acquire().is_none());

        drop(permit);
        assert!(!guard.is_executing());
        assert!(guard.try_acquire().is_some());
    }

    #[test]
    fn release_happens_once_per_permit() {
        let guard = Arc::new(ExecutionGuard::new());

        for _ in 0..3 {
            let permit = guard.try_acquire().unwrap();
            permit.set_active_delegate("agent-1");
            assert_eq!(guard.active_delegate().as_deref(), Some("agent-1"));
        }

        assert_eq!(guard.acquisitions(), 3);
        assert_eq!(guard.releases(), 3);
        assert_eq!(guard.active_delegate(), None);
    }

    #[test]
    fn released_when_holder_panics() {
        let guard = Arc::new(ExecutionGuard::new());
        let cloned = Arc::clone(&guard);

        let result = std::thread::spawn(move || {
            let _permit = cloned.try_acquire().unwrap();
            panic!("execution blew up");
        })
        .join();

        assert!(result.is_err());
        assert!(!guard.is_executing());
        assert_eq!(guard.releases(), 1);
    }

    #[test]
    fn concurrent_acquire_admits_one() {
        let guard = Arc::new(ExecutionGuard::new());
        let barrier = Arc::new(std::sync::Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let guard = Arc::clone(&guard);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    guard.try_acquire().map(std::mem::forget).is_some()
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();

        assert_eq!(winners, 1);
        assert!(guard.is_executing());
    }
}
