// ABOUTME: Underlying transport seam for managed channels.
// ABOUTME: Defines the UnderlyingChannel trait and its tonic-backed TonicChannel implementation.

use std::fmt;
use std::sync::{PoisonError, RwLock};

use futures::future::BoxFuture;
use tokio::time::Instant;
use tonic::transport::{Channel, Endpoint};

use crate::error::ChannelError;

/// Connectivity state of an underlying channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelState {
    /// No connection attempt has been made yet.
    Idle,
    /// A connection attempt is in flight.
    Connecting,
    /// Connected and able to carry calls.
    Ready,
    /// The last connection attempt failed.
    TransientFailure,
    /// Shut down; no further calls are possible.
    Shutdown,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChannelState::Idle => "idle",
            ChannelState::Connecting => "connecting",
            ChannelState::Ready => "ready",
            ChannelState::TransientFailure => "transient-failure",
            ChannelState::Shutdown => "shutdown",
        };
        f.write_str(name)
    }
}

/// A transport connection a [`ManagedChannel`](crate::ManagedChannel) wraps.
///
/// Implementations must be safe for concurrent use; the managed channel only reads
/// state, hands out call channels, and shuts the transport down once.
pub trait UnderlyingChannel: Send + Sync + 'static {
    /// Current connectivity state.
    fn state(&self) -> ChannelState;

    /// A tonic channel for issuing calls.
    fn call_channel(&self) -> Result<Channel, ChannelError>;

    /// Wait until the transport is ready, or until `deadline` passes.
    fn connect(&self, deadline: Option<Instant>) -> BoxFuture<'_, Result<(), ChannelError>>;

    /// Release the transport.
    fn shutdown(&self) -> BoxFuture<'_, Result<(), ChannelError>>;
}

struct TonicState {
    channel: Option<Channel>,
    state: ChannelState,
}

/// [`UnderlyingChannel`] over a tonic [`Endpoint`].
///
/// Starts with a lazily-connecting channel so calls can be issued before
/// [`UnderlyingChannel::connect`] is ever awaited. A successful `connect` swaps in an
/// eagerly-established channel.
pub struct TonicChannel {
    endpoint: Endpoint,
    target: String,
    inner: RwLock<TonicState>,
}

impl fmt::Debug for TonicChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TonicChannel")
            .field("target", &self.target)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl TonicChannel {
    /// Wrap `endpoint` without connecting. Must be called within a Tokio runtime.
    pub fn lazy(endpoint: Endpoint) -> Self {
        let target = endpoint.uri().to_string();
        let channel = endpoint.connect_lazy();
        Self {
            endpoint,
            target,
            inner: RwLock::new(TonicState {
                channel: Some(channel),
                state: ChannelState::Idle,
            }),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    fn set_state(&self, state: ChannelState) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if inner.state != ChannelState::Shutdown {
            inner.state = state;
        }
    }

    async fn connect_inner(&self, deadline: Option<Instant>) -> Result<(), ChannelError> {
        match self.state() {
            ChannelState::Ready => return Ok(()),
            ChannelState::Shutdown => {
                return Err(ChannelError::TransportClosed {
                    target: self.target.clone(),
                })
            }
            _ => {}
        }

        self.set_state(ChannelState::Connecting);
        let attempt = self.endpoint.connect();
        let result = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, attempt).await {
                Ok(result) => result.map_err(ChannelError::from),
                Err(_) => Err(ChannelError::DeadlineExceeded {
                    target: self.target.clone(),
                }),
            },
            None => attempt.await.map_err(ChannelError::from),
        };

        match result {
            Ok(channel) => {
                let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
                if inner.state == ChannelState::Shutdown {
                    return Err(ChannelError::TransportClosed {
                        target: self.target.clone(),
                    });
                }
                inner.channel = Some(channel);
                inner.state = ChannelState::Ready;
                drop(inner);
                tracing::debug!(address = %self.target, "gRPC channel connected");
                Ok(())
            }
            Err(err) => {
                self.set_state(ChannelState::TransientFailure);
                tracing::debug!(address = %self.target, error = %err, "gRPC channel connect failed");
                Err(err)
            }
        }
    }
}

impl UnderlyingChannel for TonicChannel {
    fn state(&self) -> ChannelState {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .state
    }

    fn call_channel(&self) -> Result<Channel, ChannelError> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .channel
            .clone()
            .ok_or_else(|| ChannelError::TransportClosed {
                target: self.target.clone(),
            })
    }

    fn connect(&self, deadline: Option<Instant>) -> BoxFuture<'_, Result<(), ChannelError>> {
        Box::pin(self.connect_inner(deadline))
    }

    fn shutdown(&self) -> BoxFuture<'_, Result<(), ChannelError>> {
        Box::pin(async move {
            let channel = {
                let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
                inner.state = ChannelState::Shutdown;
                inner.channel.take()
            };
            // Connections close once the last clone handed to an invoker is dropped.
            drop(channel);
            tracing::debug!(address = %self.target, "gRPC channel shut down");
            Ok(())
        })
    }
}
