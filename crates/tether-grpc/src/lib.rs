// ABOUTME: Managed gRPC channels whose disposal tears down every dependent built on them.
// ABOUTME: Provides channel lifecycle, dependent tracking, call invokers, and traffic metering.

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod interceptor;
pub mod invoker;
pub mod managed;
pub mod method;
pub mod provider;
pub mod registry;
pub mod stats;
pub mod transport;

mod task;
#[cfg(test)]
mod testing;

// Channel lifecycle
pub use managed::{ManagedChannel, OnDispose};
pub use provider::{ChannelProvider, TonicManagedChannel};
pub use transport::{ChannelState, TonicChannel, UnderlyingChannel};

// Configuration and diagnostics
pub use config::{ChannelConfig, KeepAliveConfig};
pub use diagnostics::{ChannelDiagnostics, ChannelOption};

// Error types
pub use error::ChannelError;

// Dependents
pub use registry::{
    disposer, DependentHandle, DependentRegistry, DisposeFuture, Disposer, Rejected,
};

// Calls and traffic metering
pub use interceptor::TrafficInterceptor;
pub use invoker::CallInvoker;
pub use method::{Marshaller, MarshallerCodec, MethodDescriptor, MethodType};
pub use stats::{ChannelStats, RateCounter, StatsSnapshot};
