//! Bounded draining of in-flight round tasks
//!
//! ## Usage
//!
//! ```ignore
//! let tracker = RoundTracker::new();
//!
//! let guard = tracker.register_task();
//! tokio::spawn(async move {
//!     let _guard = guard;
//!     participant_call().await;
//! });
//!
//! tracker.drain(Duration::from_secs(2)).await;
//! ```

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const DRAIN_CHECK_INTERVAL: Duration = Duration::from_millis(10);

tokio::task_local! {
    static IN_TRACKED_TASK: ();
}

/// Counts tasks spawned for broadcast rounds so they can be drained.
#[derive(Debug, Default)]
pub struct RoundTracker {
    active_tasks: Arc<AtomicU32>,
    shutdown_initiated: AtomicBool,
}

impl RoundTracker {
    /// Create an empty tracker
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new active task
    pub fn register_task(&self) -> TaskGuard {
        self.active_tasks.fetch_add(1, Ordering::SeqCst);
        TaskGuard {
            active_tasks: Arc::clone(&self.active_tasks),
            completed: false,
        }
    }

    /// Get the count of active tasks
    #[must_use]
    pub fn active_task_count(&self) -> u32 {
        self.active_tasks.load(Ordering::SeqCst)
    }

    /// Check if a drain has been requested
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown_initiated.load(Ordering::SeqCst)
    }

    /// Run `future` marked as a tracked task, so a drain requested from
    /// inside it does not wait on itself.
    pub async fn scope<F: std::future::Future>(future: F) -> F::Output {
        IN_TRACKED_TASK.scope((), future).await
    }

    /// Whether the caller runs inside a tracked task.
    #[must_use]
    pub fn in_tracked_task() -> bool {
        IN_TRACKED_TASK.try_with(|_| ()).is_ok()
    }

    /// Wait up to `timeout` for active tasks to finish.
    ///
    /// Returns `true` when every task completed in time. Tasks still running
    /// after the timeout are abandoned, not aborted. Called from inside a
    /// tracked task this returns immediately.
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.shutdown_initiated.store(true, Ordering::SeqCst);

        if Self::in_tracked_task() {
            warn!("drain requested from inside a round task, not waiting");
            return self.active_task_count() == 0;
        }

        let drain_start = Instant::now();
        loop {
            let active = self.active_task_count();
            if active == 0 {
                info!("All round tasks completed");
                return true;
            }

            let elapsed = drain_start.elapsed();
            if elapsed >= timeout {
                warn!(
                    active_tasks = active,
                    timeout_ms = timeout.as_millis() as u64,
                    "Drain timeout exceeded, abandoning remaining round tasks"
                );
                return false;
            }

            debug!(
                active_tasks = active,
                elapsed_ms = elapsed.as_millis() as u64,
                "Waiting for round tasks to complete..."
            );

            tokio::time::sleep(DRAIN_CHECK_INTERVAL.min(timeout - elapsed)).await;
        }
    }
}

/// Guard for tracking active tasks
///
/// Automatically decrements the active task count when dropped.
#[derive(Debug)]
pub struct TaskGuard {
    active_tasks: Arc<AtomicU32>,
    completed: bool,
}

impl TaskGuard {
    /// Mark the task as completed (prevents double decrement)
    pub fn complete(mut self) {
        self.completed = true;
        self.active_tasks.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        if !self.completed {
            self.active_tasks.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_task_guard() {
        let tracker = RoundTracker::new();

        assert_eq!(tracker.active_task_count(), 0);

        {
            let _guard1 = tracker.register_task();
            let _guard2 = tracker.register_task();
            assert_eq!(tracker.active_task_count(), 2);
        }

        // Guards dropped, count should be 0
        assert_eq!(tracker.active_task_count(), 0);
    }

    #[tokio::test]
    async fn test_task_guard_complete() {
        let tracker = RoundTracker::new();

        let guard = tracker.register_task();
        assert_eq!(tracker.active_task_count(), 1);

        guard.complete();
        assert_eq!(tracker.active_task_count(), 0);
    }

    #[tokio::test]
    async fn test_drain_waits_for_tasks() {
        let tracker = RoundTracker::new();
        let guard = tracker.register_task();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            drop(guard);
        });

        assert!(tracker.drain(Duration::from_secs(2)).await);
        assert!(tracker.is_shutting_down());
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_drain_gives_up_after_timeout() {
        let tracker = RoundTracker::new();
        let _stuck = tracker.register_task();

        let start = Instant::now();
        assert!(!tracker.drain(Duration::from_millis(50)).await);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_drain_from_inside_tracked_task_returns_immediately() {
        let tracker = Arc::new(RoundTracker::new());
        let guard = tracker.register_task();
        let inner = Arc::clone(&tracker);

        let start = Instant::now();
        let drained = RoundTracker::scope(async move {
            let _guard = guard;
            inner.drain(Duration::from_secs(5)).await
        })
        .await;

        assert!(!drained);
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
