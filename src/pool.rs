//! Fixed-capacity pool of reusable resources.
//!
//! Resources travel through a bounded channel: checking one out receives it,
//! returning it sends it back. A resource is therefore held by at most one
//! caller at a time, and both directions can be bounded by a timeout.

use std::ops::{Deref, DerefMut};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};

use crate::contracts::PoolError;

/// Bounded pool of resources created up front by a factory.
///
/// The pool does not validate resources. A dead connection is handed out
/// like any other and fails at the point of use.
pub struct Pool<T> {
    id: String,
    capacity: usize,
    tx: Sender<T>,
    rx: Receiver<T>,
}

impl<T> Pool<T> {
    /// Creates a pool holding `size` resources built by `factory`.
    ///
    /// Fails with the first factory error, or with [`PoolError::EmptyPool`]
    /// if `size` is zero.
    pub fn init<F, E>(id: impl Into<String>, size: usize, mut factory: F) -> Result<Self, E>
    where
        F: FnMut() -> Result<T, E>,
        E: From<PoolError>,
    {
        let id = id.into();
        if size == 0 {
            return Err(PoolError::EmptyPool(id).into());
        }

        let (tx, rx) = crossbeam_channel::bounded(size);
        let pool = Self {
            id,
            capacity: size,
            tx,
            rx,
        };

        for _ in 0..size {
            let resource = factory()?;
            if !pool.put(resource, Duration::ZERO) {
                return Err(PoolError::Overfilled(pool.id.clone()).into());
            }
        }

        tracing::debug!(pool = %pool.id, size, "Resource pool initialized");
        Ok(pool)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of resources currently idle in the pool.
    pub fn available(&self) -> usize {
        self.rx.len()
    }

    /// Takes a resource, waiting at most `timeout` for one to be returned.
    pub fn get(&self, timeout: Duration) -> Option<T> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// Returns a resource, waiting at most `timeout` for room in the pool.
    ///
    /// A `false` result means the resource was dropped instead of returned.
    pub fn put(&self, resource: T, timeout: Duration) -> bool {
        self.tx.send_timeout(resource, timeout).is_ok()
    }

    /// Takes a resource wrapped in a guard that returns it on drop.
    ///
    /// `timeout` bounds both the wait for a resource and the return.
    pub fn checkout(&self, timeout: Duration) -> Result<Pooled<'_, T>, PoolError> {
        match self.get(timeout) {
            Some(resource) => Ok(Pooled {
                pool: self,
                resource: Some(resource),
                timeout,
            }),
            None => Err(PoolError::Timeout {
                pool: self.id.clone(),
                timeout,
            }),
        }
    }
}

/// A resource checked out of a [`Pool`].
pub struct Pooled<'a, T> {
    pool: &'a Pool<T>,
    resource: Option<T>,
    timeout: Duration,
}

impl<T> Deref for Pooled<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Only taken in drop
        self.resource.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl<T> DerefMut for Pooled<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.resource.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl<T> Drop for Pooled<'_, T> {
    fn drop(&mut self) {
        if let Some(resource) = self.resource.take() {
            if !self.pool.put(resource, self.timeout) {
                tracing::warn!(
                    pool = %self.pool.id,
                    timeout = ?self.timeout,
                    "Failed to return resource to pool, resource leaked"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};
    use std::thread;

    const TIMEOUT: Duration = Duration::from_millis(50);

    fn counting_pool(size: usize) -> Pool<usize> {
        let mut next = 0;
        Pool::init::<_, PoolError>("test", size, || {
            next += 1;
            Ok(next)
        })
        .unwrap()
    }

    #[test]
    fn init_builds_every_resource() {
        let pool = counting_pool(3);
        assert_eq!(pool.capacity(), 3);
        assert_eq!(pool.available(), 3);

        let mut seen = HashSet::new();
        for _ in 0..3 {
            seen.insert(pool.get(TIMEOUT).unwrap());
        }
        assert_eq!(seen, HashSet::from([1, 2, 3]));
    }

    #[test]
    fn init_propagates_first_factory_error() {
        let mut calls = 0;
        let result = Pool::<u32>::init("test", 4, || {
            calls += 1;
            if calls == 2 {
                Err(PoolError::EmptyPool("factory".into()))
            } else {
                Ok(calls)
            }
        });
        assert!(matches!(result, Err(PoolError::EmptyPool(name)) if name == "factory"));
        assert_eq!(calls, 2);
    }

    #[test]
    fn init_rejects_zero_size() {
        let result = Pool::<u32>::init::<_, PoolError>("empty", 0, || Ok(1));
        assert!(matches!(result, Err(PoolError::EmptyPool(_))));
    }

    #[test]
    fn get_times_out_when_exhausted() {
        let pool = counting_pool(1);
        let held = pool.get(TIMEOUT).unwrap();
        assert!(pool.get(TIMEOUT).is_none());

        assert!(pool.put(held, TIMEOUT));
        assert!(pool.get(TIMEOUT).is_some());
    }

    #[test]
    fn checkout_returns_resource_on_drop() {
        let pool = counting_pool(1);
        {
            let guard = pool.checkout(TIMEOUT).unwrap();
            assert_eq!(*guard, 1);
            assert_eq!(pool.available(), 0);
            assert!(matches!(
                pool.checkout(TIMEOUT),
                Err(PoolError::Timeout { .. })
            ));
        }
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn put_fails_when_pool_is_full() {
        let pool = counting_pool(2);
        assert!(!pool.put(99, TIMEOUT));
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn concurrent_holders_never_share_a_resource() {
        let pool = Arc::new(counting_pool(4));
        let in_use = Arc::new(Mutex::new(HashSet::new()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = Arc::clone(&pool);
                let in_use = Arc::clone(&in_use);
                thread::spawn(move || {
                    for _ in 0..50 {
                        let guard = pool.checkout(Duration::from_secs(5)).unwrap();
                        assert!(
                            in_use.lock().unwrap().insert(*guard),
                            "resource {} handed out twice",
                            *guard
                        );
                        thread::yield_now();
                        in_use.lock().unwrap().remove(&*guard);
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(pool.available(), 4);
    }
}
