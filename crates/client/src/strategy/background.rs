//! Fire-and-forget task tracking.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinSet;

/// Background refreshes spawned on behalf of a coordinator.
///
/// Results never reach the caller that triggered them; finished tasks are
/// reaped on the next spawn.
#[derive(Clone, Default)]
pub struct Background {
    tasks: Arc<Mutex<JoinSet<()>>>,
}

impl Background {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.tasks.lock().await;
        while let Some(done) = tasks.try_join_next() {
            if let Err(e) = done {
                tracing::warn!(error = %e, "background task aborted");
            }
        }
        tasks.spawn(task);
    }

    /// Number of tasks not yet reaped.
    pub async fn pending(&self) -> usize {
        self.tasks.lock().await.len()
    }

    /// Wait for every spawned task, including any spawned while waiting.
    pub async fn settle(&self) {
        loop {
            let mut batch = std::mem::take(&mut *self.tasks.lock().await);
            if batch.is_empty() {
                return;
            }
            while let Some(done) = batch.join_next().await {
                if let Err(e) = done {
                    tracing::warn!(error = %e, "background task aborted");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_settle_waits_for_spawned_tasks() {
        let background = Background::new();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let counter = counter.clone();
            background
                .spawn(async move {
                    tokio::task::yield_now().await;
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .await;
        }

        background.settle().await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(background.pending().await, 0);
    }

    #[tokio::test]
    async fn test_panicking_task_is_contained() {
        let background = Background::new();
        background.spawn(async { panic!("boom") }).await;
        background.settle().await;
        assert_eq!(background.pending().await, 0);
    }
}
