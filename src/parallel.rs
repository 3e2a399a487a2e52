//! Worker pools for the per-cell-type stages.

use crate::error::{NicheError, Result};

/// Run `op` inside a dedicated rayon pool of `n_threads` workers.
///
/// `None` uses the global pool; `Some(1)` still goes through a pool so the
/// code path is the same.
pub fn install<T, F>(n_threads: Option<usize>, op: F) -> Result<T>
where
    T: Send,
    F: FnOnce() -> T + Send,
{
    match n_threads {
        None => Ok(op()),
        Some(0) => Err(NicheError::InvalidParameter(
            "n_threads must be at least 1".to_string(),
        )),
        Some(n) => {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(n)
                .build()
                .map_err(|e| NicheError::Pipeline(format!("Cannot build worker pool: {}", e)))?;
            Ok(pool.install(op))
        }
    }
}
