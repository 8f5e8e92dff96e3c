use std::future::Future;

use crate::error::BackendError;

/// Execute a single fallible backend call, swallowing any [`BackendError`]
/// into `None` and logging it at debug level.
///
/// Per the base spec's failure taxonomy a backend call failure and a backend
/// declining the operation (e.g. returning `Ok(false)`) are handled
/// identically by most callers, so this only absorbs the `Err` case; callers
/// that care about the `true`/`false` distinction filter the `Some` value
/// themselves.
pub async fn swallow<T, Fut>(op_name: &str, backend_index: usize, fut: Fut) -> Option<T>
where
    Fut: Future<Output = Result<T, BackendError>>,
{
    match fut.await {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::debug!(op = op_name, backend_index, error = %err, "backend call failed");
            None
        }
    }
}
