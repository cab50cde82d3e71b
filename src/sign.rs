//! Per-group exclusive locks.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dashmap::DashMap;

/// Exclusive lock serializing segment advancement for one group.
///
/// Not reentrant: calling [`Sign::set`] twice from the same thread deadlocks.
#[derive(Debug, Default)]
pub struct Sign {
    lock: Mutex<()>,
}

/// Held sign. Dropping it releases the sign.
#[must_use = "the sign is released as soon as the guard is dropped"]
pub struct SignGuard<'a> {
    _guard: MutexGuard<'a, ()>,
}

impl Sign {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until the sign is held exclusively.
    pub fn set(&self) -> SignGuard<'_> {
        // The lock guards no data, so a holder that panicked left nothing
        // inconsistent behind.
        let guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        SignGuard { _guard: guard }
    }

    /// Takes the sign only if nobody holds it.
    pub fn try_set(&self) -> Option<SignGuard<'_>> {
        match self.lock.try_lock() {
            Ok(guard) => Some(SignGuard { _guard: guard }),
            Err(std::sync::TryLockError::Poisoned(e)) => Some(SignGuard {
                _guard: e.into_inner(),
            }),
            Err(std::sync::TryLockError::WouldBlock) => None,
        }
    }
}

impl SignGuard<'_> {
    /// Releases the sign.
    pub fn unset(self) {}
}

/// Lazily created signs keyed by group name.
///
/// Signs are never evicted, so memory grows with the number of distinct
/// groups seen by this process.
#[derive(Debug, Default)]
pub struct SignRegistry {
    signs: DashMap<String, Arc<Sign>>,
}

impl SignRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the sign for `key`, registering a new one on first use.
    ///
    /// Concurrent first callers for the same key all receive the same sign.
    pub fn acquire(&self, key: &str) -> Arc<Sign> {
        if let Some(sign) = self.signs.get(key) {
            return Arc::clone(sign.value());
        }

        let entry = self
            .signs
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Sign::new()));
        Arc::clone(entry.value())
    }

    /// Number of registered signs.
    pub fn len(&self) -> usize {
        self.signs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn same_key_returns_same_sign() {
        let registry = SignRegistry::new();
        let a = registry.acquire("orders");
        let b = registry.acquire("orders");
        let c = registry.acquire("users");

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn concurrent_first_acquire_converges() {
        let registry = Arc::new(SignRegistry::new());
        let barrier = Arc::new(Barrier::new(16));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    registry.acquire("hot-group")
                })
            })
            .collect();

        let signs: Vec<Arc<Sign>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for sign in &signs[1..] {
            assert!(Arc::ptr_eq(&signs[0], sign));
        }
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn set_is_exclusive() {
        let sign = Arc::new(Sign::new());
        let inside = Arc::new(AtomicBool::new(false));
        let entered = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let sign = Arc::clone(&sign);
                let inside = Arc::clone(&inside);
                let entered = Arc::clone(&entered);
                thread::spawn(move || {
                    for _ in 0..100 {
                        let _held = sign.set();
                        assert!(!inside.swap(true, Ordering::SeqCst), "two holders");
                        entered.fetch_add(1, Ordering::Relaxed);
                        inside.store(false, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(entered.load(Ordering::Relaxed), 800);
    }

    #[test]
    fn try_set_fails_while_held() {
        let sign = Sign::new();
        let held = sign.set();
        assert!(sign.try_set().is_none());
        held.unset();
        assert!(sign.try_set().is_some());
    }

    #[test]
    fn panicked_holder_does_not_stall_the_group() {
        let sign = Arc::new(Sign::new());
        let s = Arc::clone(&sign);
        let result = thread::spawn(move || {
            let _held = s.set();
            panic!("holder died");
        })
        .join();
        assert!(result.is_err());

        let (tx, rx) = std::sync::mpsc::channel();
        let s = Arc::clone(&sign);
        thread::spawn(move || {
            let _held = s.set();
            tx.send(()).unwrap();
        });
        rx.recv_timeout(Duration::from_secs(5))
            .expect("sign should be recoverable after a panic");
    }
}
