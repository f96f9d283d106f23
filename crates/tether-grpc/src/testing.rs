// ABOUTME: In-memory UnderlyingChannel used by unit tests.
// ABOUTME: Records connect/shutdown calls and can be told to fail or hang.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::BoxFuture;
use tokio::time::Instant;
use tonic::transport::{Channel, Endpoint};

use crate::error::ChannelError;
use crate::transport::{ChannelState, UnderlyingChannel};

#[derive(Debug, Default)]
pub(crate) struct CallCounts {
    pub connects: AtomicUsize,
    pub shutdowns: AtomicUsize,
}

impl CallCounts {
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectBehavior {
    Succeed,
    Fail,
    Hang,
}

#[derive(Debug)]
pub(crate) struct FakeChannel {
    state: Mutex<ChannelState>,
    connect: ConnectBehavior,
    fail_shutdown: bool,
    counts: Arc<CallCounts>,
}

impl FakeChannel {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ChannelState::Idle),
            connect: ConnectBehavior::Succeed,
            fail_shutdown: false,
            counts: Arc::new(CallCounts::default()),
        }
    }

    pub fn failing_connect(mut self) -> Self {
        self.connect = ConnectBehavior::Fail;
        self
    }

    pub fn hanging_connect(mut self) -> Self {
        self.connect = ConnectBehavior::Hang;
        self
    }

    pub fn failing_shutdown(mut self) -> Self {
        self.fail_shutdown = true;
        self
    }

    pub fn counts(&self) -> Arc<CallCounts> {
        Arc::clone(&self.counts)
    }

    fn set_state(&self, state: ChannelState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }
}

impl UnderlyingChannel for FakeChannel {
    fn state(&self) -> ChannelState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn call_channel(&self) -> Result<Channel, ChannelError> {
        Ok(Endpoint::from_static("http://127.0.0.1:1").connect_lazy())
    }

    fn connect(&self, deadline: Option<Instant>) -> BoxFuture<'_, Result<(), ChannelError>> {
        Box::pin(async move {
            self.counts.connects.fetch_add(1, Ordering::SeqCst);
            self.set_state(ChannelState::Connecting);
            match self.connect {
                ConnectBehavior::Succeed => {
                    self.set_state(ChannelState::Ready);
                    Ok(())
                }
                ConnectBehavior::Fail => {
                    self.set_state(ChannelState::TransientFailure);
                    Err(ChannelError::ConnectionFailed("connection refused".into()))
                }
                ConnectBehavior::Hang => match deadline {
                    Some(deadline) => {
                        tokio::time::sleep_until(deadline).await;
                        self.set_state(ChannelState::TransientFailure);
                        Err(ChannelError::DeadlineExceeded {
                            target: "fake".into(),
                        })
                    }
                    None => futures::future::pending().await,
                },
            }
        })
    }

    fn shutdown(&self) -> BoxFuture<'_, Result<(), ChannelError>> {
        Box::pin(async move {
            self.counts.shutdowns.fetch_add(1, Ordering::SeqCst);
            self.set_state(ChannelState::Shutdown);
            if self.fail_shutdown {
                Err(ChannelError::ShutdownFailed("transport wedged".into()))
            } else {
                Ok(())
            }
        })
    }
}
