// ABOUTME: Registry of dependents whose lifetime is tied to a managed channel.
// ABOUTME: Maps handles to async disposers with atomic remove-and-dispose semantics.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;

use crate::error::ChannelError;
use crate::task::forget;

static NEXT_DEPENDENT_ID: AtomicU64 = AtomicU64::new(1);

/// Future returned by a [`Disposer`].
pub type DisposeFuture = BoxFuture<'static, anyhow::Result<()>>;

/// Tears a dependent down. Ownership moves into the registry on registration.
pub type Disposer = Box<dyn FnOnce() -> DisposeFuture + Send>;

/// Build a [`Disposer`] from an async closure.
pub fn disposer<F, Fut>(f: F) -> Disposer
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Box::new(move || Box::pin(f()))
}

/// Identity of a dependent client.
///
/// Each call to [`DependentHandle::new`] yields a process-unique id; clones compare equal.
#[derive(Debug, Clone)]
pub struct DependentHandle {
    id: u64,
    label: Arc<str>,
}

impl DependentHandle {
    pub fn new(label: impl Into<Arc<str>>) -> Self {
        Self {
            id: NEXT_DEPENDENT_ID.fetch_add(1, Ordering::Relaxed),
            label: label.into(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl PartialEq for DependentHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for DependentHandle {}

impl Hash for DependentHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for DependentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.label, self.id)
    }
}

/// Why [`DependentRegistry::add`] refused a registration. The disposer is handed back.
pub enum Rejected {
    /// The handle is already registered.
    Duplicate(Disposer),
    /// The registry has been closed by a disposal cascade.
    Closed(Disposer),
}

impl fmt::Debug for Rejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejected::Duplicate(_) => f.write_str("Duplicate"),
            Rejected::Closed(_) => f.write_str("Closed"),
        }
    }
}

#[derive(Default)]
struct RegistryState {
    entries: HashMap<DependentHandle, Disposer>,
    closed: bool,
}

/// Thread-safe map from dependent handle to disposer.
///
/// The only serialized step is the per-handle remove; whichever path removes an entry
/// first owns its disposer, so a dependent is disposed at most once no matter how many
/// paths race for it.
#[derive(Default)]
pub struct DependentRegistry {
    state: Mutex<RegistryState>,
}

impl fmt::Debug for DependentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependentRegistry")
            .field("len", &self.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl DependentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, handle: DependentHandle, disposer: Disposer) -> Result<(), Rejected> {
        self.add_with(handle, disposer, || {})
    }

    /// Register `handle` and run `on_added` before the registry can be closed.
    ///
    /// `on_added` runs under the registry lock and must not block or touch the registry.
    pub fn add_with<F>(
        &self,
        handle: DependentHandle,
        disposer: Disposer,
        on_added: F,
    ) -> Result<(), Rejected>
    where
        F: FnOnce(),
    {
        let mut state = self.lock();
        if state.closed {
            return Err(Rejected::Closed(disposer));
        }
        if state.entries.contains_key(&handle) {
            return Err(Rejected::Duplicate(disposer));
        }
        state.entries.insert(handle, disposer);
        on_added();
        Ok(())
    }

    /// Remove `handle`, returning its disposer if it was still registered.
    pub fn remove(&self, handle: &DependentHandle) -> Option<Disposer> {
        self.lock().entries.remove(handle)
    }

    /// Remove and dispose `handle`. Returns `false` if another path got there first.
    pub async fn dispose_one(&self, handle: &DependentHandle) -> bool {
        let Some(disposer) = self.remove(handle) else {
            return false;
        };
        if let Err(err) = run_disposer(handle, disposer).await {
            report_failure(&err);
        }
        true
    }

    /// Remove `handle` and run its disposer in the background.
    pub fn dispose_one_detached(&self, handle: &DependentHandle) -> bool {
        let Some(disposer) = self.remove(handle) else {
            return false;
        };
        let handle = handle.clone();
        forget(async move {
            if let Err(err) = run_disposer(&handle, disposer).await {
                report_failure(&err);
            }
        });
        true
    }

    /// Close the registry and dispose every dependent, waiting for all disposers.
    ///
    /// Returns how many dependents this call disposed.
    pub async fn dispose_all(&self) -> usize {
        let handles = self.close();
        let disposals = handles.iter().map(|handle| self.dispose_one(handle));
        join_all(disposals)
            .await
            .into_iter()
            .filter(|disposed| *disposed)
            .count()
    }

    /// Close the registry and start disposing every dependent without waiting.
    pub fn dispose_all_detached(&self) -> usize {
        self.close()
            .iter()
            .filter(|handle| self.dispose_one_detached(handle))
            .count()
    }

    /// Copy of the currently registered handles.
    pub fn snapshot(&self) -> Vec<DependentHandle> {
        self.lock().entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Refuse further registrations and snapshot what is left, atomically.
    fn close(&self) -> Vec<DependentHandle> {
        let mut state = self.lock();
        state.closed = true;
        state.entries.keys().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Run a disposer, turning both errors and panics into [`ChannelError::DependentDisposal`].
pub(crate) async fn run_disposer(
    handle: &DependentHandle,
    disposer: Disposer,
) -> Result<(), ChannelError> {
    let outcome = AssertUnwindSafe(async move { disposer().await })
        .catch_unwind()
        .await;
    let reason = match outcome {
        Ok(Ok(())) => return Ok(()),
        Ok(Err(err)) => format!("{err:#}"),
        Err(panic) => format!("panicked: {}", panic_message(panic.as_ref())),
    };
    Err(ChannelError::DependentDisposal {
        dependent: handle.to_string(),
        reason,
    })
}

/// Single sink for failures from background dependent teardown.
pub(crate) fn report_failure(err: &ChannelError) {
    tracing::warn!(error = %err, "dependent teardown failed");
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
