use rayon::{ThreadPool, ThreadPoolBuilder};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::errors::ClusteringError;
use crate::models::config::ResourceLimits;

/// Bounded pool for CPU-bound analysis tasks.
///
/// Each task holds a semaphore permit for its whole life and runs on tokio's
/// blocking thread pool, so at most `workers` tasks compute at once. Data
/// parallel work inside a task (rayon) runs on a dedicated pool of the same
/// size instead of rayon's global pool.
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    threads: Arc<ThreadPool>,
    workers: usize,
}

impl WorkerPool {
    /// Create a pool with `workers` concurrent slots (at least one).
    pub fn new(workers: usize) -> Result<Self, ClusteringError> {
        let workers = workers.max(1);
        let threads = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|idx| format!("clustering-worker-{}", idx))
            .build()
            .map_err(|e| ClusteringError::Worker(format!("failed to build thread pool: {}", e)))?;
        Ok(Self {
            semaphore: Arc::new(Semaphore::new(workers)),
            threads: Arc::new(threads),
            workers,
        })
    }

    /// Size the pool from resource limits.
    ///
    /// # Arguments
    /// * `limits` - `n_jobs` and `max_memory` from the optimization config
    /// * `estimated_task_bytes` - Rough working set of one task
    pub fn from_limits(limits: &ResourceLimits, estimated_task_bytes: u64) -> Result<Self, ClusteringError> {
        Self::new(resolve_worker_count(limits, estimated_task_bytes)?)
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run a blocking task once a slot is free.
    ///
    /// The task runs inside the pool's rayon threads, so `par_iter` calls in it
    /// use at most `workers` threads. A panicking task surfaces as
    /// `ClusteringError::Worker`.
    pub async fn run<F, T>(&self, task: F) -> Result<T, ClusteringError>
    where
        F: FnOnce() -> Result<T, ClusteringError> + Send + 'static,
        T: Send + 'static,
    {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| ClusteringError::Worker(e.to_string()))?;

        let threads = self.threads.clone();
        let handle = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            threads.install(task)
        });
        handle.await?
    }

    /// Free slots (for monitoring)
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}

/// min(n_jobs, available parallelism, max_memory / task bytes), at least 1.
/// `n_jobs` of zero or below means every available core.
pub fn resolve_worker_count(limits: &ResourceLimits, estimated_task_bytes: u64) -> Result<usize, ClusteringError> {
    let cores = std::thread::available_parallelism().map_or(1, |n| n.get());

    let requested = match limits.n_jobs {
        Some(n) if n > 0 => usize::try_from(n).unwrap_or(usize::MAX),
        _ => cores,
    };

    let by_memory = match &limits.max_memory {
        Some(limit) => {
            let bytes = limit.to_bytes()?;
            let per_task = estimated_task_bytes.max(1);
            usize::try_from(bytes / per_task).unwrap_or(usize::MAX)
        }
        None => usize::MAX,
    };

    let workers = requested.min(cores).min(by_memory).max(1);
    debug!(
        "Worker pool sizing: requested {}, cores {}, memory allows {} -> {}",
        requested, cores, by_memory, workers
    );
    Ok(workers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::config::MemoryLimit;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_worker_count_respects_every_limit() {
        let cores = std::thread::available_parallelism().map_or(1, |n| n.get());

        let limits = ResourceLimits {
            max_memory: None,
            n_jobs: Some(-1),
        };
        assert_eq!(resolve_worker_count(&limits, 1024).unwrap(), cores);

        let limits = ResourceLimits {
            max_memory: None,
            n_jobs: Some(1),
        };
        assert_eq!(resolve_worker_count(&limits, 1024).unwrap(), 1);

        let limits = ResourceLimits {
            max_memory: Some(MemoryLimit::Bytes(10)),
            n_jobs: None,
        };
        // Memory for less than one task still yields one worker.
        assert_eq!(resolve_worker_count(&limits, 1024).unwrap(), 1);
    }

    #[test]
    fn test_invalid_memory_limit_is_rejected() {
        let limits = ResourceLimits {
            max_memory: Some(MemoryLimit::Text("plenty".to_string())),
            n_jobs: None,
        };
        assert!(resolve_worker_count(&limits, 1024).is_err());
    }

    #[tokio::test]
    async fn test_concurrent_limit() {
        let pool = Arc::new(WorkerPool::new(2).unwrap());
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..6 {
            let pool = pool.clone();
            let running = running.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                pool.run(move || {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(50));
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
                .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(pool.available_permits(), 2);
    }

    #[tokio::test]
    async fn test_panicking_task_is_worker_error() {
        let pool = WorkerPool::new(1).unwrap();
        let result: Result<(), ClusteringError> = pool.run(|| panic!("boom")).await;
        assert!(matches!(result, Err(ClusteringError::Worker(_))));
        // The permit is released even though the task panicked.
        assert_eq!(pool.available_permits(), 1);
    }

    #[tokio::test]
    async fn test_parallel_work_inside_task_is_bounded_by_workers() {
        let limits = ResourceLimits {
            max_memory: None,
            n_jobs: Some(1),
        };
        let pool = WorkerPool::from_limits(&limits, 1024).unwrap();
        let threads = pool.run(|| Ok(rayon::current_num_threads())).await.unwrap();
        assert_eq!(pool.workers(), 1);
        assert_eq!(threads, 1);

        let pool = WorkerPool::new(2).unwrap();
        let threads = pool.run(|| Ok(rayon::current_num_threads())).await.unwrap();
        assert_eq!(threads, 2);
    }
}
