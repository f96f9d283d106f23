// ABOUTME: Detached background work for synchronous teardown paths.
// ABOUTME: Spawns on the ambient Tokio runtime, or drives the future inline when none exists.

use std::future::Future;

use tokio::runtime::Handle;

/// Run `fut` without waiting for it.
///
/// The future must handle its own failures; nothing is reported back to the caller.
pub(crate) fn forget<F>(fut: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    match Handle::try_current() {
        Ok(handle) => {
            handle.spawn(fut);
        }
        Err(_) => {
            tracing::debug!("no Tokio runtime available, running detached work inline");
            futures::executor::block_on(fut);
        }
    }
}
