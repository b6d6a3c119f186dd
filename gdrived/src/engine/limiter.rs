use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Semaphore;

/// Process-wide cap on in-flight remote calls. Waiters are served in
/// arrival order.
#[derive(Clone)]
pub struct ConcurrencyLimiter {
    inner: Arc<Inner>,
}

struct Inner {
    sem: Semaphore,
    capacity: usize,
    active: AtomicUsize,
    pending: AtomicUsize,
}

struct Counter<'a>(&'a AtomicUsize);

impl<'a> Counter<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for Counter<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ConcurrencyLimiter {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(Inner {
                sem: Semaphore::new(capacity),
                capacity,
                active: AtomicUsize::new(0),
                pending: AtomicUsize::new(0),
            }),
        }
    }

    /// Waits for a free slot, then runs `task` while holding it.
    pub async fn schedule<F, T>(&self, task: F) -> T
    where
        F: Future<Output = T>,
    {
        let waiting = Counter::enter(&self.inner.pending);
        // The semaphore lives as long as `inner` and is never closed.
        let permit = self.inner.sem.acquire().await;
        drop(waiting);
        let _running = Counter::enter(&self.inner.active);
        let output = task.await;
        drop(permit);
        output
    }

    pub fn active(&self) -> usize {
        self.inner.active.load(Ordering::SeqCst)
    }

    pub fn pending(&self) -> usize {
        self.inner.pending.load(Ordering::SeqCst)
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::future::join_all;
    use std::time::Duration;

    #[tokio::test]
    async fn never_exceeds_capacity() {
        let limiter = ConcurrencyLimiter::new(3);
        let peak = Arc::new(AtomicUsize::new(0));

        let calls = (0..20).map(|_| {
            let limiter = limiter.clone();
            let peak = peak.clone();
            async move {
                limiter
                    .schedule(async {
                        peak.fetch_max(limiter.active(), Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(5)).await;
                    })
                    .await
            }
        });
        join_all(calls).await;

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(limiter.active(), 0);
        assert_eq!(limiter.pending(), 0);
    }

    #[tokio::test]
    async fn waiters_run_in_submission_order() {
        let limiter = ConcurrencyLimiter::new(1);
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let calls = (0..5).map(|n| {
            let limiter = limiter.clone();
            let order = order.clone();
            async move {
                limiter
                    .schedule(async {
                        order.lock().unwrap().push(n);
                        tokio::task::yield_now().await;
                    })
                    .await
            }
        });
        join_all(calls).await;

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        assert_eq!(ConcurrencyLimiter::new(0).capacity(), 1);
    }
}
