// ABOUTME: ManagedChannel owns an underlying channel and every dependent tied to it.
// ABOUTME: Provides connect, call invoker creation, dependent tracking, and coordinated disposal.

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::diagnostics::ChannelDiagnostics;
use crate::error::ChannelError;
use crate::interceptor::TrafficInterceptor;
use crate::invoker::CallInvoker;
use crate::registry::{
    report_failure, run_disposer, DependentHandle, DependentRegistry, Disposer, Rejected,
};
use crate::stats::ChannelStats;
use crate::task::forget;
use crate::transport::{ChannelState, UnderlyingChannel};

/// Callback fired exactly once when a channel finishes disposal.
pub type OnDispose<C> = Box<dyn FnOnce(&ManagedChannel<C>) + Send>;

/// A channel wrapper that owns the underlying transport and the dependents built on it.
///
/// Dependents (typically long-lived streaming sessions) register a disposer and a
/// disconnect signal. Whichever comes first, the dependent disconnecting or the channel
/// being disposed, tears the dependent down; the other path finds it gone and does
/// nothing.
///
/// Dropping an undisposed channel runs [`ManagedChannel::dispose`].
pub struct ManagedChannel<C: UnderlyingChannel> {
    id: u64,
    target: String,
    channel: Arc<C>,
    disposed: AtomicBool,
    dependents: Arc<DependentRegistry>,
    watchers: TaskTracker,
    cancel: CancellationToken,
    on_dispose: Mutex<Option<OnDispose<C>>>,
    diagnostics: Option<ChannelDiagnostics>,
    interceptor: Option<TrafficInterceptor>,
}

impl<C: UnderlyingChannel> fmt::Debug for ManagedChannel<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedChannel")
            .field("id", &self.id)
            .field("target", &self.target)
            .field("state", &self.state())
            .field("disposed", &self.is_disposed())
            .field("dependents", &self.dependents.len())
            .field("diagnostics", &self.has_diagnostics())
            .finish()
    }
}

impl<C: UnderlyingChannel> ManagedChannel<C> {
    pub fn new<F>(id: u64, target: impl Into<String>, channel: C, on_dispose: F) -> Self
    where
        F: FnOnce(&ManagedChannel<C>) + Send + 'static,
    {
        Self {
            id,
            target: target.into(),
            channel: Arc::new(channel),
            disposed: AtomicBool::new(false),
            dependents: Arc::new(DependentRegistry::new()),
            watchers: TaskTracker::new(),
            cancel: CancellationToken::new(),
            on_dispose: Mutex::new(Some(Box::new(on_dispose))),
            diagnostics: None,
            interceptor: None,
        }
    }

    /// Attach diagnostics. Call invokers created afterwards meter their traffic.
    pub fn with_diagnostics(mut self, diagnostics: ChannelDiagnostics) -> Self {
        self.interceptor = Some(TrafficInterceptor::new(Arc::clone(diagnostics.stats())));
        self.diagnostics = Some(diagnostics);
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn state(&self) -> ChannelState {
        self.channel.state()
    }

    pub fn underlying(&self) -> &C {
        &self.channel
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    pub fn has_diagnostics(&self) -> bool {
        self.diagnostics.is_some()
    }

    pub fn diagnostics(&self) -> Option<&ChannelDiagnostics> {
        self.diagnostics.as_ref()
    }

    /// Traffic counters, present only when diagnostics are attached.
    pub fn stats(&self) -> Option<&Arc<ChannelStats>> {
        self.diagnostics.as_ref().map(ChannelDiagnostics::stats)
    }

    /// Wait until the underlying channel is ready or `deadline` passes.
    pub async fn connect(&self, deadline: Option<Instant>) -> Result<(), ChannelError> {
        self.ensure_live()?;
        self.channel.connect(deadline).await
    }

    /// A call invoker bound to the underlying channel.
    pub fn create_call_invoker(&self) -> Result<CallInvoker, ChannelError> {
        self.ensure_live()?;
        let channel = self.channel.call_channel()?;
        Ok(match &self.interceptor {
            Some(interceptor) => CallInvoker::instrumented(channel, interceptor.clone()),
            None => CallInvoker::new(channel),
        })
    }

    /// Tie a dependent's lifetime to this channel.
    ///
    /// `disconnected` resolving (or panicking) deregisters and disposes the dependent.
    /// If the channel is already being disposed, the dependent is disposed right away
    /// and `Disposed` is returned. Without a Tokio runtime nothing is registered and
    /// `RuntimeUnavailable` is returned.
    pub fn manage_dependent<S>(
        &self,
        handle: DependentHandle,
        disposer: Disposer,
        disconnected: S,
    ) -> Result<(), ChannelError>
    where
        S: Future + Send + 'static,
    {
        let Ok(runtime) = Handle::try_current() else {
            return Err(ChannelError::RuntimeUnavailable {
                dependent: handle.to_string(),
            });
        };

        let watcher = self.watch(handle.clone(), disconnected);
        let added = self.dependents.add_with(handle.clone(), disposer, || {
            // Still under the registry lock: any later cascade waits on this watcher.
            self.watchers.spawn_on(watcher, &runtime);
        });
        match added {
            Ok(()) => {
                tracing::debug!(
                    channel_id = self.id,
                    dependent = %handle,
                    "dependent registered"
                );
                Ok(())
            }
            Err(Rejected::Duplicate(_)) => Err(ChannelError::DuplicateDependent {
                dependent: handle.to_string(),
            }),
            Err(Rejected::Closed(disposer)) => {
                tracing::debug!(
                    channel_id = self.id,
                    dependent = %handle,
                    "channel already disposed, tearing down late dependent"
                );
                forget(async move {
                    if let Err(err) = run_disposer(&handle, disposer).await {
                        report_failure(&err);
                    }
                });
                Err(self.disposed_error())
            }
        }
    }

    /// Wait for `disconnected` or channel disposal, whichever comes first.
    fn watch<S>(
        &self,
        handle: DependentHandle,
        disconnected: S,
    ) -> impl Future<Output = ()> + Send + 'static
    where
        S: Future + Send + 'static,
    {
        let registry = Arc::clone(&self.dependents);
        let cancel = self.cancel.clone();
        let channel_id = self.id;
        let signal = AssertUnwindSafe(disconnected)
            .catch_unwind()
            .map(|outcome| outcome.is_err());

        async move {
            tokio::select! {
                panicked = signal => {
                    if panicked {
                        tracing::error!(
                            channel_id,
                            dependent = %handle,
                            "disconnect signal panicked, treating dependent as disconnected"
                        );
                    }
                    if registry.dispose_one(&handle).await {
                        tracing::debug!(channel_id, dependent = %handle, "dependent disconnected");
                    }
                }
                () = cancel.cancelled() => {}
            }
        }
    }

    /// Handles of the dependents registered right now.
    pub fn managed_dependents(&self) -> Vec<DependentHandle> {
        self.dependents.snapshot()
    }

    /// Dispose without waiting.
    ///
    /// Dependents are removed and their disposers started in the background; the
    /// underlying shutdown is started but not awaited and its failure is only logged.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _teardown = Teardown(self);

        self.stop_watchers();
        let dependents = self.dependents.dispose_all_detached();
        tracing::debug!(
            channel_id = self.id,
            address = %self.target,
            dependents,
            "disposing channel"
        );

        let channel = Arc::clone(&self.channel);
        let channel_id = self.id;
        forget(async move {
            if let Err(err) = channel.shutdown().await {
                tracing::warn!(channel_id, error = %err, "channel shutdown failed");
            }
        });
    }

    /// Dispose and wait for every dependent disposer and the underlying shutdown.
    ///
    /// Returns the shutdown failure, if any. The teardown callback fires either way.
    /// Dropping the returned future early fires the callback immediately; the dependent
    /// cascade and the shutdown still run to completion in the background.
    pub async fn dispose_and_wait(&self) -> Result<(), ChannelError> {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let _teardown = Teardown(self);

        self.stop_watchers();
        let cascade = self.cascade_and_shutdown();
        match Handle::try_current() {
            Ok(runtime) => runtime.spawn(cascade).await.unwrap_or_else(|err| {
                Err(ChannelError::ShutdownFailed(format!(
                    "teardown task failed: {err}"
                )))
            }),
            Err(_) => cascade.await,
        }
    }

    /// Dispose every dependent, wait for the watchers, then shut the transport down.
    fn cascade_and_shutdown(
        &self,
    ) -> impl Future<Output = Result<(), ChannelError>> + Send + 'static {
        let dependents = Arc::clone(&self.dependents);
        let watchers = self.watchers.clone();
        let channel = Arc::clone(&self.channel);
        let channel_id = self.id;
        let target = self.target.clone();

        async move {
            let disposed = dependents.dispose_all().await;
            watchers.wait().await;
            tracing::debug!(
                channel_id,
                address = %target,
                dependents = disposed,
                "dependents disposed, shutting down channel"
            );

            let result = channel.shutdown().await;
            if let Err(err) = &result {
                tracing::warn!(channel_id, error = %err, "channel shutdown failed");
            }
            result
        }
    }

    fn stop_watchers(&self) {
        self.cancel.cancel();
        self.watchers.close();
    }

    fn ensure_live(&self) -> Result<(), ChannelError> {
        if self.is_disposed() {
            return Err(self.disposed_error());
        }
        Ok(())
    }

    fn disposed_error(&self) -> ChannelError {
        ChannelError::Disposed {
            id: self.id,
            target: self.target.clone(),
        }
    }

    fn fire_on_dispose(&self) {
        let callback = self
            .on_dispose
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(callback) = callback {
            callback(self);
        }
    }
}

/// Fires the teardown callback when disposal ends, however it ends.
struct Teardown<'a, C: UnderlyingChannel>(&'a ManagedChannel<C>);

impl<C: UnderlyingChannel> Drop for Teardown<'_, C> {
    fn drop(&mut self) {
        self.0.fire_on_dispose();
    }
}

impl<C: UnderlyingChannel> Drop for ManagedChannel<C> {
    fn drop(&mut self) {
        if !self.is_disposed() {
            self.dispose();
        }
    }
}

impl<C: UnderlyingChannel> TryFrom<&ManagedChannel<C>> for CallInvoker {
    type Error = ChannelError;

    fn try_from(channel: &ManagedChannel<C>) -> Result<Self, Self::Error> {
        channel.create_call_invoker()
    }
}
