use std::sync::Arc;

use anyhow::{Error, Result};
use tantivy::{Executor, IndexReader, Searcher};
use tokio::sync::{oneshot, Semaphore};

/// A thread pool that waits for a given task after passing
/// the given reader searcher as an arg to complete before
/// resolving the future.
///
/// This is mostly used to run CPU heavy tasks without blocking the
/// scheduler. Basically tokio's spawn_blocking but with a set pool.
pub struct SearcherExecutorPool {
    reader: IndexReader,
    executor: Arc<Executor>,
    limiter: Semaphore,
    thread_pool: rayon::ThreadPool,
}

impl SearcherExecutorPool {
    /// Creates a new thread pool with a set concurrency.
    ///
    /// The set concurrency determines the number of threads spawned,
    /// each search may additionally fan out over `threads_per_reader`
    /// segment workers.
    pub fn create(
        reader: IndexReader,
        threads_per_reader: usize,
        max_concurrency: usize,
    ) -> Result<Self> {
        if max_concurrency == 0 {
            return Err(Error::msg("max concurrency must be at least 1."));
        }

        let limiter = Semaphore::new(max_concurrency);
        let thread_pool = rayon::ThreadPoolBuilder::new()
            .thread_name(|n| format!("executor-pool-worker-{}", n))
            .num_threads(max_concurrency)
            .build()?;

        let executor = if threads_per_reader <= 1 {
            Executor::single_thread()
        } else {
            Executor::multi_thread(threads_per_reader, "reader-executor-")?
        };

        Ok(Self {
            reader,
            executor: Arc::new(executor),
            limiter,
            thread_pool,
        })
    }

    /// Spawns a new function into the pool and returns
    /// the results once complete.
    pub async fn spawn<F, T>(&self, func: F) -> Result<T>
    where
        F: FnOnce(Searcher, &Executor) -> T + Send + 'static,
        T: Send + 'static,
    {
        let _permit = self.limiter.acquire().await?;
        let searcher = self.reader.searcher();
        let executor = self.executor.clone();
        let (tx, rx) = oneshot::channel();
        self.thread_pool.spawn(move || {
            let result = func(searcher, executor.as_ref());
            let _ = tx.send(result);
        });

        Ok(rx.await?)
    }

    #[inline]
    pub fn searcher(&self) -> Searcher {
        self.reader.searcher()
    }

    /// Makes the latest commit visible to any new searchers.
    pub fn reload(&self) -> Result<()> {
        self.reader.reload().map_err(Error::from)
    }
}
