//! Bounded worker pool for pixel comparison and rendering.
//!
//! Jobs run on a dedicated rayon pool so a large diff never occupies the
//! caller's thread.  A panicking job is reported as [`TrackerError::Worker`]
//! instead of tearing down the pool.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc;

use crate::error::{Result, TrackerError};
use crate::log_err;

pub struct RenderPool {
    pool: rayon::ThreadPool,
}

impl RenderPool {
    pub fn new(threads: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|i| format!("pxtrack-render-{}", i))
            .build()
            .map_err(|e| TrackerError::Worker(e.to_string()))?;
        Ok(Self { pool })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Queue `f`; the returned [`Job`] yields its result.
    pub fn spawn<T, F>(&self, f: F) -> Job<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        self.pool.spawn(move || {
            let result = catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|panic| {
                let msg = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                log_err!("render job panicked: {}", msg);
                Err(TrackerError::Worker(msg))
            });
            // the caller may have stopped waiting
            let _ = tx.send(result);
        });
        Job { rx }
    }
}

/// Pending result of [`RenderPool::spawn`].
pub struct Job<T> {
    rx: mpsc::Receiver<Result<T>>,
}

impl<T> Job<T> {
    /// Block until the job finishes.
    pub fn wait(self) -> Result<T> {
        self.rx
            .recv()
            .map_err(|_| TrackerError::Worker("render job vanished".into()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jobs_return_results() {
        let pool = RenderPool::new(2).unwrap();
        let jobs: Vec<_> = (0..8u32).map(|i| pool.spawn(move || Ok(i * 2))).collect();
        let sum: u32 = jobs.into_iter().map(|j| j.wait().unwrap()).sum();
        assert_eq!(sum, 56);
        assert_eq!(pool.threads(), 2);
    }

    #[test]
    fn panics_become_errors() {
        let pool = RenderPool::new(1).unwrap();
        let job = pool.spawn::<(), _>(|| panic!("boom"));
        match job.wait() {
            Err(TrackerError::Worker(msg)) => assert_eq!(msg, "boom"),
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
        // the pool survives
        assert_eq!(pool.spawn(|| Ok(1)).wait().unwrap(), 1);
    }
}
