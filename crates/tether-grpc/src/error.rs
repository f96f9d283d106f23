// ABOUTME: Error types for the tether-grpc crate.
// ABOUTME: Covers disposal, dependent teardown, and underlying transport failures.

use thiserror::Error;

/// Errors raised by managed channels and their collaborators.
#[derive(Error, Debug)]
pub enum ChannelError {
    /// A lifecycle operation was attempted after disposal began.
    #[error("channel {id} ({target}) has been disposed")]
    Disposed { id: u64, target: String },

    /// A dependent's disposer failed or panicked.
    #[error("disposing dependent {dependent} failed: {reason}")]
    DependentDisposal { dependent: String, reason: String },

    /// The same dependent handle was registered twice.
    #[error("dependent {dependent} is already managed by this channel")]
    DuplicateDependent { dependent: String },

    /// Watching a dependent for disconnection needs a Tokio runtime and none was running.
    #[error("no Tokio runtime available to watch dependent {dependent}")]
    RuntimeUnavailable { dependent: String },

    /// Invalid target address format.
    #[error("invalid channel target: {0}")]
    InvalidAddress(String),

    /// Failed to connect to the target.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The connect deadline elapsed before the channel became ready.
    #[error("deadline exceeded while connecting to {target}")]
    DeadlineExceeded { target: String },

    /// Shutting down the underlying transport failed.
    #[error("shutdown failed: {0}")]
    ShutdownFailed(String),

    /// The underlying transport has already been shut down.
    #[error("transport for {target} is shut down")]
    TransportClosed { target: String },
}

impl ChannelError {
    /// Whether this failure originated in the wrapped transport.
    pub fn is_transport_failure(&self) -> bool {
        matches!(
            self,
            ChannelError::InvalidAddress(_)
                | ChannelError::ConnectionFailed(_)
                | ChannelError::DeadlineExceeded { .. }
                | ChannelError::ShutdownFailed(_)
                | ChannelError::TransportClosed { .. }
        )
    }
}

impl From<tonic::transport::Error> for ChannelError {
    fn from(err: tonic::transport::Error) -> Self {
        ChannelError::ConnectionFailed(err.to_string())
    }
}
