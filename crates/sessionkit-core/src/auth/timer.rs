use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;

/// A delayed action owned by the component that scheduled it.
///
/// Dropping the handle aborts the action if it has not run yet.
#[derive(Debug)]
pub struct ScheduledTask {
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    /// Run `action` once after `delay` on the current tokio runtime
    pub fn after<F>(delay: Duration, action: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            action.await;
        });
        Self { handle }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_delay() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let task = ScheduledTask::after(Duration::from_secs(3), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(2900)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(task.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let task = ScheduledTask::after(Duration::from_secs(1), async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        drop(task);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
