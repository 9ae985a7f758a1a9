//! Parallel Execution
//!
//! Fan-out helpers for independent sub-analyses. Results always come back in
//! argument position, never in completion order.

use crate::error::{AnalysisError, Result};

/// Run two closures, concurrently on the rayon pool when `parallel` is set.
pub fn join<A, B, RA, RB>(parallel: bool, a: A, b: B) -> (RA, RB)
where
    A: FnOnce() -> RA + Send,
    B: FnOnce() -> RB + Send,
    RA: Send,
    RB: Send,
{
    if parallel {
        rayon::join(a, b)
    } else {
        (a(), b())
    }
}

/// Helper for running blocking work off the async runtime
pub struct AsyncParallelExecutor;

impl AsyncParallelExecutor {
    /// Execute two blocking tasks in parallel
    ///
    /// Used to load the "before" and "after" files at the same time.
    pub async fn execute_pair<F1, F2, R1, R2>(task1: F1, task2: F2) -> Result<(R1, R2)>
    where
        F1: FnOnce() -> Result<R1> + Send + 'static,
        F2: FnOnce() -> Result<R2> + Send + 'static,
        R1: Send + 'static,
        R2: Send + 'static,
    {
        let handle1 = tokio::task::spawn_blocking(task1);
        let handle2 = tokio::task::spawn_blocking(task2);
        let (result1, result2) = tokio::join!(handle1, handle2);

        let result1 = result1.map_err(|e| AnalysisError::Execution(format!("Task execution failed: {}", e)))?;
        let result2 = result2.map_err(|e| AnalysisError::Execution(format!("Task execution failed: {}", e)))?;
        Ok((result1?, result2?))
    }
}
