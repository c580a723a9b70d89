//! Execution limit enforcement: the timeout wrapper and the counter guards
//! consulted by `importScript`.

use crate::config::ExecutionLimits;
use crate::error::{Error, Result};
use std::future::Future;
use std::time::Duration;

/// Run `future` against a wall-clock bound.
///
/// Whichever settles first wins; on expiry the caller observes
/// [`Error::Timeout`] and the timer is dropped so it cannot keep the
/// scheduler alive. A bound of 0 always fails without polling the future.
pub async fn execute_with_timeout<F, T>(future: F, timeout_ms: u64) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if timeout_ms == 0 {
        return Err(Error::Timeout(0));
    }
    match tokio::time::timeout(Duration::from_millis(timeout_ms), future).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout(timeout_ms)),
    }
}

/// Fail once the import stack is already at the configured depth.
pub fn check_recursion(limits: &ExecutionLimits, depth: usize) -> Result<()> {
    if depth >= limits.max_recursion_depth {
        return Err(Error::RecursionLimit {
            depth,
            max: limits.max_recursion_depth,
        });
    }
    Ok(())
}

/// Fail once the import counter is already at the configured bound.
pub fn check_imports(limits: &ExecutionLimits, count: usize) -> Result<()> {
    if count >= limits.max_imported_scripts {
        return Err(Error::ImportLimit {
            count,
            max: limits.max_imported_scripts,
        });
    }
    Ok(())
}
