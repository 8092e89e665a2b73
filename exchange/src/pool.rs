//! Bounded worker pool
//!
//! Every workflow step and every sweep item runs as its own tokio task, so a
//! slow oracle never blocks the caller. A semaphore caps how many of those
//! tasks are in flight at once.

use crate::{Error, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::debug;

/// Worker pool with a fixed concurrency limit
#[derive(Debug, Clone)]
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
}

impl WorkerPool {
    /// Create a pool running at most `max_concurrent` tasks at a time
    pub fn new(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        }
    }

    /// Concurrency limit
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Free worker slots
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Spawn `task` once a slot is free; the slot is held until it completes
    pub fn spawn<F, T>(&self, task: F) -> JoinHandle<Result<T>>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let semaphore = self.semaphore.clone();
        tokio::spawn(async move {
            let _permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| Error::Worker(format!("Semaphore error: {}", e)))?;
            debug!(available = semaphore.available_permits(), "Worker slot acquired");
            task.await
        })
    }

    /// Run `task` on the pool and wait for its result
    pub async fn run<F, T>(&self, task: F) -> Result<T>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        self.spawn(task).await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_run_returns_result() {
        let pool = WorkerPool::new(2);
        assert_eq!(pool.run(async { Ok(7) }).await.unwrap(), 7);

        let failed: Result<()> = pool
            .run(async { Err(Error::InvalidCommand("boom".to_string())) })
            .await;
        assert!(matches!(failed, Err(Error::InvalidCommand(_))));
    }

    #[tokio::test]
    async fn test_panic_becomes_worker_error() {
        let pool = WorkerPool::new(1);
        let result: Result<()> = pool.run(async { panic!("worker crashed") }).await;
        assert!(matches!(result, Err(Error::Worker(_))));
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let pool = WorkerPool::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let running = running.clone();
                let peak = peak.clone();
                pool.spawn(async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(pool.max_concurrent(), 2);
    }
}
