use log::{debug, warn};
use std::fmt::Display;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time;

/// Bounded, tracked pool for fire-and-forget replica writes.
///
/// Submitting never waits: when every worker is busy the task is dropped. `drain` lets shutdown
/// wait for in-flight tasks for a grace period and abort whatever is left.
#[derive(Debug)]
pub struct ReplicationPool {
    permits: Arc<Semaphore>,
    tasks: Mutex<JoinSet<()>>,
}

impl ReplicationPool {
    pub fn new(workers: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(workers.max(1))),
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    /// Runs `task` in the background if a worker is free. Returns whether it was accepted.
    pub fn submit<F>(&self, description: impl Display, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Ok(permit) = self.permits.clone().try_acquire_owned() else {
            warn!("replication pool unavailable, dropping {description}");
            return false;
        };

        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);

        // Reap finished tasks so the set doesn't grow without bound
        while tasks.try_join_next().is_some() {}

        tasks.spawn(async move {
            let _permit = permit;
            task.await;
        });

        debug!("scheduled {description}");

        true
    }

    pub fn in_flight(&self) -> usize {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        while tasks.try_join_next().is_some() {}
        tasks.len()
    }

    /// Stops accepting work and waits up to `grace` for running tasks.
    ///
    /// Returns the number of tasks that were abandoned.
    pub async fn drain(&self, grace: Duration) -> usize {
        self.permits.close();

        let mut tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));

        let finished = time::timeout(grace, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;

        if finished.is_ok() {
            return 0;
        }

        let abandoned = tasks.len();
        tasks.abort_all();
        warn!("abandoned {abandoned} replication tasks after {grace:?}");

        abandoned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_tasks_run_in_background() {
        let pool = ReplicationPool::new(4);
        let done = Arc::new(AtomicUsize::new(0));

        for i in 0..3 {
            let done = done.clone();
            assert!(pool.submit(format!("task {i}"), async move {
                done.fetch_add(1, Ordering::SeqCst);
            }));
        }

        assert_eq!(pool.drain(Duration::from_secs(1)).await, 0);
        assert_eq!(done.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_saturated_pool_drops_tasks() {
        let pool = ReplicationPool::new(1);

        assert!(pool.submit("blocker", std::future::pending::<()>()));
        assert!(!pool.submit("dropped", async {}));
        assert_eq!(pool.in_flight(), 1);

        assert_eq!(pool.drain(Duration::from_millis(50)).await, 1);
    }

    #[tokio::test]
    async fn test_drain_abandons_slow_tasks() {
        let pool = ReplicationPool::new(4);
        let finished = Arc::new(AtomicUsize::new(0));

        let fast = finished.clone();
        pool.submit("fast", async move {
            fast.fetch_add(1, Ordering::SeqCst);
        });
        let slow = finished.clone();
        pool.submit("slow", async move {
            time::sleep(Duration::from_secs(30)).await;
            slow.fetch_add(1, Ordering::SeqCst);
        });

        let started = time::Instant::now();
        let abandoned = pool.drain(Duration::from_millis(100)).await;

        assert_eq!(abandoned, 1);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_closed_pool_rejects_work() {
        let pool = ReplicationPool::new(2);
        pool.drain(Duration::from_millis(10)).await;

        assert!(!pool.submit("late", async {}));
    }
}
