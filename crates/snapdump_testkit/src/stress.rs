//! Concurrency helpers.
//!
//! Runs an operation on several threads released at the same instant, so
//! tests can observe how contended operations resolve.

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

/// Result of a concurrent run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        Self {
            total_ops: successful + failed,
            successful_ops: successful,
            failed_ops: failed,
            duration,
        }
    }
}

/// Runs `op(thread_index)` on `threads` threads at once.
///
/// Returns every thread's result in thread order.
pub fn run_concurrently<F, T>(threads: usize, op: F) -> Vec<T>
where
    F: Fn(usize) -> T + Send + Sync + 'static,
    T: Send + 'static,
{
    let op = Arc::new(op);
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let op = Arc::clone(&op);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                op(t)
            })
        })
        .collect();

    handles
        .into_iter()
        .map(|h| h.join().expect("Thread panicked"))
        .collect()
}

/// Runs `op` concurrently and counts successes and failures.
pub fn stress_concurrent<F, T, E>(threads: usize, op: F) -> StressTestResult
where
    F: Fn(usize) -> Result<T, E> + Send + Sync + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    let start = Instant::now();
    let results = run_concurrently(threads, op);
    let successful = results.iter().filter(|r| r.is_ok()).count();
    StressTestResult::new(successful, results.len() - successful, start.elapsed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn results_in_thread_order() {
        let out = run_concurrently(4, |t| t * 10);
        assert_eq!(out, [0, 10, 20, 30]);
    }

    #[test]
    fn exactly_one_wins_a_flag() {
        let flag = Arc::new(AtomicBool::new(false));
        let result = stress_concurrent(8, move |_| {
            flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        });
        assert_eq!(result.successful_ops, 1);
        assert_eq!(result.failed_ops, 7);
    }
}
