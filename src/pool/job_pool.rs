use crate::{KvsError, Result};
use tracing::debug;

/// A fixed-size pool for the job dispatcher, backed by a [`Rayon`] thread pool.
///
/// [`Rayon`]: https://docs.rs/rayon/latest/rayon/index.html
pub struct JobPool {
    pool: rayon::ThreadPool,
    threads: usize,
}

impl JobPool {
    /// creates a pool with the given number of `threads`
    pub fn new(threads: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("job-{}", i))
            .build()
            .map_err(|e| KvsError::StringErr(format!("could not build job pool: {:?}", &e)))?;
        debug!("created job pool with {} threads", &threads);

        Ok(Self { pool, threads })
    }

    /// number of threads in the pool
    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Runs `worker` once on every thread of the pool, passing it the worker number,
    /// and returns when all of them have returned.
    pub fn run_workers<F>(&self, worker: F)
    where
        F: Fn(usize) + Sync,
    {
        let worker = &worker;
        self.pool.scope(|scope| {
            for id in 0..self.threads {
                scope.spawn(move |_| worker(id));
            }
        });
    }
}
