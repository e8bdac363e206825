//! Running synchronous file and crypto work off the async executor.

use tracing::Span;

use vaultic_common::{Error, Result};

/// Run `work` on the blocking pool, inside the caller's tracing span.
///
/// If the calling future is dropped the work still runs to completion and
/// its output is dropped with the join handle.
pub(crate) async fn run_blocking<T, F>(what: &'static str, work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let span = Span::current();
    tokio::task::spawn_blocking(move || span.in_scope(work))
        .await
        .map_err(|e| Error::Cancelled(format!("{} task failed: {}", what, e)))?
}
