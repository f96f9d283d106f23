// ABOUTME: Call invoker for issuing RPCs over a managed channel.
// ABOUTME: Dispatches the four call shapes and applies traffic metering when enabled.

use futures::Stream;
use tonic::client::Grpc;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::Channel;
use tonic::{Request, Response, Status, Streaming};

use crate::interceptor::TrafficInterceptor;
use crate::method::{MethodDescriptor, MethodType};

/// Issues calls over a tonic channel.
///
/// Obtained from [`ManagedChannel::create_call_invoker`](crate::ManagedChannel::create_call_invoker).
/// When the channel carries diagnostics, every descriptor is wrapped by the channel's
/// [`TrafficInterceptor`] before dispatch. Request metadata, timeouts and extensions travel
/// on the `tonic::Request` untouched.
#[derive(Debug, Clone)]
pub struct CallInvoker {
    inner: Grpc<Channel>,
    interceptor: Option<TrafficInterceptor>,
}

impl CallInvoker {
    pub fn new(channel: Channel) -> Self {
        Self {
            inner: Grpc::new(channel),
            interceptor: None,
        }
    }

    pub fn instrumented(channel: Channel, interceptor: TrafficInterceptor) -> Self {
        Self {
            inner: Grpc::new(channel),
            interceptor: Some(interceptor),
        }
    }

    pub fn is_instrumented(&self) -> bool {
        self.interceptor.is_some()
    }

    pub async fn unary<Req, Resp>(
        &mut self,
        method: &MethodDescriptor<Req, Resp>,
        request: Request<Req>,
    ) -> Result<Response<Resp>, Status>
    where
        Req: Send + Sync + 'static,
        Resp: Send + Sync + 'static,
    {
        let (method, path) = self.prepare(method, MethodType::Unary)?;
        self.ready().await?;
        self.inner.unary(request, path, method.codec()).await
    }

    pub async fn server_streaming<Req, Resp>(
        &mut self,
        method: &MethodDescriptor<Req, Resp>,
        request: Request<Req>,
    ) -> Result<Response<Streaming<Resp>>, Status>
    where
        Req: Send + Sync + 'static,
        Resp: Send + Sync + 'static,
    {
        let (method, path) = self.prepare(method, MethodType::ServerStreaming)?;
        self.ready().await?;
        self.inner
            .server_streaming(request, path, method.codec())
            .await
    }

    pub async fn client_streaming<Req, Resp, S>(
        &mut self,
        method: &MethodDescriptor<Req, Resp>,
        request: Request<S>,
    ) -> Result<Response<Resp>, Status>
    where
        Req: Send + Sync + 'static,
        Resp: Send + Sync + 'static,
        S: Stream<Item = Req> + Send + 'static,
    {
        let (method, path) = self.prepare(method, MethodType::ClientStreaming)?;
        self.ready().await?;
        self.inner
            .client_streaming(request, path, method.codec())
            .await
    }

    pub async fn duplex_streaming<Req, Resp, S>(
        &mut self,
        method: &MethodDescriptor<Req, Resp>,
        request: Request<S>,
    ) -> Result<Response<Streaming<Resp>>, Status>
    where
        Req: Send + Sync + 'static,
        Resp: Send + Sync + 'static,
        S: Stream<Item = Req> + Send + 'static,
    {
        let (method, path) = self.prepare(method, MethodType::DuplexStreaming)?;
        self.ready().await?;
        self.inner.streaming(request, path, method.codec()).await
    }

    /// Check the call shape, resolve the route, and apply metering if enabled.
    fn prepare<Req, Resp>(
        &self,
        method: &MethodDescriptor<Req, Resp>,
        expected: MethodType,
    ) -> Result<(MethodDescriptor<Req, Resp>, PathAndQuery), Status>
    where
        Req: 'static,
        Resp: 'static,
    {
        if method.kind() != expected {
            return Err(Status::internal(format!(
                "{} is a {} method, not {}",
                method.full_name(),
                method.kind(),
                expected
            )));
        }

        let path = PathAndQuery::try_from(method.full_name())
            .map_err(|e| Status::internal(format!("invalid method path: {e}")))?;

        let method = match &self.interceptor {
            Some(interceptor) => interceptor.wrap(method),
            None => method.clone(),
        };
        Ok((method, path))
    }

    async fn ready(&mut self) -> Result<(), Status> {
        self.inner
            .ready()
            .await
            .map_err(|e| Status::unknown(format!("Service was not ready: {e}")))
    }
}
