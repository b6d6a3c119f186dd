use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::engine::task::TaskTracker;

/// Resolves on Ctrl-C. If the handler cannot be installed it never resolves.
pub async fn ctrl_c() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

/// Drives `work` until it finishes or `signal` fires. On a signal the token
/// is cancelled and `work` gets `grace` to reach its own checkpoints and
/// return; after that every task still `copying` is marked `interrupt`.
/// Returns `None` only when `work` did not finish within the grace period.
/// Remote calls still in flight at that point are abandoned, not aborted.
pub async fn run_until<W, S, T>(
    work: W,
    signal: S,
    grace: Duration,
    tracker: &TaskTracker,
    cancel: &CancellationToken,
) -> Option<T>
where
    W: Future<Output = T>,
    S: Future<Output = ()>,
{
    tokio::pin!(work);
    tokio::select! {
        output = &mut work => return Some(output),
        _ = signal => {}
    }

    warn!(grace_ms = grace.as_millis() as u64, "termination requested");
    cancel.cancel();
    let output = match tokio::time::timeout(grace, &mut work).await {
        Ok(output) => Some(output),
        Err(_) => {
            warn!("work did not stop within the grace period");
            None
        }
    };
    match tracker.interrupt_all().await {
        Ok(0) => {}
        Ok(count) => info!(count, "running tasks marked as interrupted"),
        Err(err) => error!(error = %err, "failed to mark running tasks as interrupted"),
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::task::TaskStatus;
    use crate::store::Store;

    const GRACE: Duration = Duration::from_millis(50);

    #[tokio::test]
    async fn signal_interrupts_running_tasks() {
        let tracker = TaskTracker::new(Store::open_in_memory().await.unwrap());
        tracker.create("src", "dst", "root").await.unwrap();
        let cancel = CancellationToken::new();

        let output = run_until(
            std::future::pending::<()>(),
            async {},
            GRACE,
            &tracker,
            &cancel,
        )
        .await;

        assert!(output.is_none());
        assert!(cancel.is_cancelled());
        let task = tracker.find("src", "dst").await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Interrupt);
    }

    #[tokio::test]
    async fn cancelled_work_can_finish_within_grace() {
        let tracker = TaskTracker::new(Store::open_in_memory().await.unwrap());
        let task = tracker.create("src", "dst", "root").await.unwrap();
        let cancel = CancellationToken::new();

        let work = async {
            cancel.cancelled().await;
            tracker.record_file(task.id, "f1").await.unwrap();
            tracker.interrupt(task.id).await.unwrap();
            "stopped"
        };
        let output = run_until(work, async {}, Duration::from_secs(5), &tracker, &cancel).await;

        assert_eq!(output, Some("stopped"));
        let task = tracker.find("src", "dst").await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Interrupt);
        assert!(task.copied_file_ids.contains("f1"));
    }

    #[tokio::test]
    async fn finished_work_is_returned() {
        let tracker = TaskTracker::new(Store::open_in_memory().await.unwrap());
        let cancel = CancellationToken::new();

        let output = run_until(
            async { 42 },
            std::future::pending::<()>(),
            GRACE,
            &tracker,
            &cancel,
        )
        .await;

        assert_eq!(output, Some(42));
        assert!(!cancel.is_cancelled());
    }
}
