// ABOUTME: Integration tests for managed channel lifecycle through the public API.
// ABOUTME: Covers provider pools, dependent teardown, custom transports, and traffic metering.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use prost::Message;
use tether_grpc::{
    disposer, CallInvoker, ChannelConfig, ChannelError, ChannelProvider, ChannelState,
    ChannelStats, DependentHandle, Disposer, ManagedChannel, MethodDescriptor, MethodType,
    TrafficInterceptor, UnderlyingChannel,
};
use tokio::sync::oneshot;
use tonic::transport::{Channel, Endpoint};

#[derive(Clone, PartialEq, Message)]
struct Ping {
    #[prost(string, tag = "1")]
    note: String,
    #[prost(uint64, tag = "2")]
    sequence: u64,
}

fn counting_disposer(count: &Arc<AtomicUsize>) -> Disposer {
    let count = Arc::clone(count);
    disposer(move || async move {
        count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })
}

async fn wait_for(count: &AtomicUsize, expected: usize) {
    for _ in 0..200 {
        if count.load(Ordering::SeqCst) == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Transport whose shutdown always fails.
struct WedgedTransport {
    shutdowns: Arc<AtomicUsize>,
    state: Mutex<ChannelState>,
}

impl UnderlyingChannel for WedgedTransport {
    fn state(&self) -> ChannelState {
        *self.state.lock().unwrap()
    }

    fn call_channel(&self) -> Result<Channel, ChannelError> {
        Ok(Endpoint::from_static("http://127.0.0.1:1").connect_lazy())
    }

    fn connect(
        &self,
        _deadline: Option<tokio::time::Instant>,
    ) -> BoxFuture<'_, Result<(), ChannelError>> {
        Box::pin(async move {
            *self.state.lock().unwrap() = ChannelState::Ready;
            Ok(())
        })
    }

    fn shutdown(&self) -> BoxFuture<'_, Result<(), ChannelError>> {
        Box::pin(async move {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
            Err(ChannelError::ShutdownFailed("socket stuck in close".into()))
        })
    }
}

#[tokio::test]
async fn provider_shutdown_tears_down_sessions_once() {
    tether_log::init_test();
    let provider = ChannelProvider::new();
    let disposed = Arc::new(AtomicUsize::new(0));

    let first = provider.from_address("http://127.0.0.1:1").unwrap();
    let second = provider.from_address("http://127.0.0.1:2").unwrap();

    let (hang_up, disconnected) = oneshot::channel::<()>();
    first
        .manage_dependent(
            DependentHandle::new("hub-session"),
            counting_disposer(&disposed),
            disconnected,
        )
        .unwrap();
    second
        .manage_dependent(
            DependentHandle::new("feed-session"),
            counting_disposer(&disposed),
            futures::future::pending::<()>(),
        )
        .unwrap();

    hang_up.send(()).unwrap();
    wait_for(&disposed, 1).await;
    assert_eq!(disposed.load(Ordering::SeqCst), 1);
    assert!(first.managed_dependents().is_empty());
    assert_eq!(second.managed_dependents().len(), 1);

    provider.shutdown_all().await.unwrap();
    assert_eq!(disposed.load(Ordering::SeqCst), 2);
    assert!(provider.is_empty());
    assert!(first.is_disposed() && second.is_disposed());
}

#[tokio::test]
async fn disposed_channel_rejects_work_and_disposes_late_sessions() {
    tether_log::init_test();
    let provider = ChannelProvider::new();
    let channel = provider.from_address("http://127.0.0.1:1").unwrap();
    channel.dispose_and_wait().await.unwrap();

    assert!(matches!(
        channel.connect(None).await,
        Err(ChannelError::Disposed { .. })
    ));
    assert!(matches!(
        CallInvoker::try_from(&*channel),
        Err(ChannelError::Disposed { .. })
    ));

    let disposed = Arc::new(AtomicUsize::new(0));
    let err = channel
        .manage_dependent(
            DependentHandle::new("late"),
            counting_disposer(&disposed),
            futures::future::pending::<()>(),
        )
        .unwrap_err();
    assert!(matches!(err, ChannelError::Disposed { .. }));
    wait_for(&disposed, 1).await;
    assert_eq!(disposed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn connect_failure_leaves_channel_usable() {
    tether_log::init_test();
    let provider = ChannelProvider::new();
    let config = ChannelConfig::new("http://127.0.0.1:1")
        .without_keep_alive()
        .with_connect_timeout(Duration::from_millis(200));
    let channel = provider.create_channel(&config).unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    let err = channel.connect(Some(deadline)).await.unwrap_err();
    assert!(err.is_transport_failure());
    assert!(!channel.is_disposed());
    assert!(channel.create_call_invoker().is_ok());

    channel.dispose_and_wait().await.unwrap();
    assert_eq!(channel.state(), ChannelState::Shutdown);
}

#[tokio::test]
async fn custom_transport_shutdown_failure_surfaces_only_when_awaited() {
    tether_log::init_test();
    let shutdowns = Arc::new(AtomicUsize::new(0));
    let torn_down = Arc::new(AtomicUsize::new(0));

    let awaited = {
        let torn_down = Arc::clone(&torn_down);
        ManagedChannel::new(
            10,
            "wedged://awaited",
            WedgedTransport {
                shutdowns: Arc::clone(&shutdowns),
                state: Mutex::new(ChannelState::Idle),
            },
            move |_: &ManagedChannel<WedgedTransport>| {
                torn_down.fetch_add(1, Ordering::SeqCst);
            },
        )
    };
    awaited.connect(None).await.unwrap();
    assert_eq!(awaited.state(), ChannelState::Ready);

    let err = awaited.dispose_and_wait().await.unwrap_err();
    assert!(matches!(err, ChannelError::ShutdownFailed(_)));
    assert_eq!(torn_down.load(Ordering::SeqCst), 1);

    let detached = ManagedChannel::new(
        11,
        "wedged://detached",
        WedgedTransport {
            shutdowns: Arc::clone(&shutdowns),
            state: Mutex::new(ChannelState::Idle),
        },
        |_: &ManagedChannel<WedgedTransport>| {},
    );
    detached.dispose();
    wait_for(&shutdowns, 2).await;
    assert_eq!(shutdowns.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn instrumented_channel_meters_payloads() {
    tether_log::init_test();
    let provider = ChannelProvider::new();
    let channel = provider
        .create_channel(&ChannelConfig::new("http://127.0.0.1:1").with_diagnostics())
        .unwrap();
    assert!(channel.create_call_invoker().unwrap().is_instrumented());

    let stats = Arc::clone(channel.stats().unwrap());
    let method: MethodDescriptor<Ping, Ping> =
        MethodDescriptor::prost(MethodType::DuplexStreaming, "tether.Echo", "Chat");
    let metered = TrafficInterceptor::new(Arc::clone(&stats)).wrap(&method);

    let ping = Ping {
        note: "are you there".to_string(),
        sequence: 42,
    };
    let plain_bytes = method.request_marshaller().serialize(&ping).unwrap();
    let metered_bytes = metered.request_marshaller().serialize(&ping).unwrap();
    assert_eq!(plain_bytes, metered_bytes);

    let echoed = metered
        .response_marshaller()
        .deserialize(metered_bytes.clone())
        .unwrap();
    assert_eq!(echoed, ping);

    let traffic = channel.diagnostics().unwrap().traffic();
    assert_eq!(traffic.sent_bytes, plain_bytes.len() as u64);
    assert_eq!(traffic.received_bytes, plain_bytes.len() as u64);
    assert_eq!(traffic.sent_bytes_per_second, plain_bytes.len() as u64);
}

#[tokio::test]
async fn shared_stats_aggregate_across_interceptors() {
    let stats = Arc::new(ChannelStats::new());
    let method: MethodDescriptor<Ping, Ping> =
        MethodDescriptor::prost(MethodType::Unary, "tether.Echo", "Ping");

    let ping = Ping {
        note: String::new(),
        sequence: 1,
    };
    for _ in 0..3 {
        let wrapped = TrafficInterceptor::new(Arc::clone(&stats)).wrap(&method);
        wrapped.request_marshaller().serialize(&ping).unwrap();
    }
    assert_eq!(stats.sent_bytes(), 3 * ping.encoded_len() as u64);
    assert_eq!(stats.received_bytes(), 0);
}
