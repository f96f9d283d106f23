// ABOUTME: Channel provider that builds managed tonic channels from configuration.
// ABOUTME: Assigns channel ids, tracks live channels, and evicts them on disposal.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::join_all;

use crate::config::ChannelConfig;
use crate::diagnostics::ChannelDiagnostics;
use crate::error::ChannelError;
use crate::managed::ManagedChannel;
use crate::transport::TonicChannel;

/// A managed channel over tonic transport.
pub type TonicManagedChannel = ManagedChannel<TonicChannel>;

type LiveChannels = Mutex<HashMap<u64, Arc<TonicManagedChannel>>>;

/// Creates managed channels and keeps track of the ones not yet disposed.
#[derive(Debug, Default)]
pub struct ChannelProvider {
    next_id: AtomicU64,
    channels: Arc<LiveChannels>,
}

impl ChannelProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a lazily-connecting channel for `config` and start tracking it.
    ///
    /// Must be called within a Tokio runtime.
    pub fn create_channel(
        &self,
        config: &ChannelConfig,
    ) -> Result<Arc<TonicManagedChannel>, ChannelError> {
        let channel = TonicChannel::lazy(config.endpoint()?);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let target = channel.target().to_string();

        // Weak so the channels map and its entries don't keep each other alive.
        let live = Arc::downgrade(&self.channels);
        let mut managed = ManagedChannel::new(
            id,
            target,
            channel,
            move |disposed: &TonicManagedChannel| {
                if let Some(live) = live.upgrade() {
                    let evicted = live
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .remove(&disposed.id());
                    drop(evicted);
                }
            },
        );
        if config.diagnostics {
            managed = managed.with_diagnostics(ChannelDiagnostics::capture(config.options()));
        }

        let managed = Arc::new(managed);
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::clone(&managed));

        tracing::debug!(
            channel_id = id,
            address = %managed.target(),
            diagnostics = config.diagnostics,
            "created managed channel"
        );
        Ok(managed)
    }

    /// Channel with default settings and keep-alive disabled.
    pub fn from_address(&self, address: &str) -> Result<Arc<TonicManagedChannel>, ChannelError> {
        self.create_channel(&ChannelConfig::new(address).without_keep_alive())
    }

    pub fn get(&self, id: u64) -> Option<Arc<TonicManagedChannel>> {
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    /// Live channels ordered by id.
    pub fn channels(&self) -> Vec<Arc<TonicManagedChannel>> {
        let mut channels: Vec<_> = self
            .channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        channels.sort_by_key(|c| c.id());
        channels
    }

    pub fn len(&self) -> usize {
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dispose every live channel and wait for all of them.
    ///
    /// Every channel is disposed even if some fail; the first failure is returned.
    pub async fn shutdown_all(&self) -> Result<(), ChannelError> {
        let channels = self.channels();
        let count = channels.len();
        let results = join_all(channels.iter().map(|c| c.dispose_and_wait())).await;
        tracing::debug!(channels = count, "shut down all managed channels");
        results.into_iter().find_map(Result::err).map_or(Ok(()), Err)
    }
}
