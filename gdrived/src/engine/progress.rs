use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::info;

use super::limiter::ConcurrencyLimiter;

/// Periodically logs how far a phase has come and how busy the limiter is.
/// The ticker stops when dropped.
pub struct ProgressTicker {
    count: Arc<AtomicUsize>,
    handle: Option<JoinHandle<()>>,
}

impl ProgressTicker {
    /// A zero `every` disables logging; the counter still works.
    pub fn start(phase: &'static str, every: Duration, limiter: ConcurrencyLimiter) -> Self {
        let count = Arc::new(AtomicUsize::new(0));
        let handle = (!every.is_zero()).then(|| {
            let count = count.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(every);
                interval.tick().await;
                loop {
                    interval.tick().await;
                    info!(
                        phase,
                        done = count.load(Ordering::Relaxed),
                        active = limiter.active(),
                        pending = limiter.pending(),
                        "progress"
                    );
                }
            })
        });
        Self { count, handle }
    }

    pub fn add(&self, n: usize) {
        self.count.fetch_add(n, Ordering::Relaxed);
    }

    #[cfg(test)]
    fn done(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }
}

impl Drop for ProgressTicker {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
