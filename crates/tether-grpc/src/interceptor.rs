// ABOUTME: Traffic-counting decorator for method descriptors.
// ABOUTME: Records serialized request and received response payload sizes into ChannelStats.

use std::sync::Arc;

use prost::bytes::Bytes;

use crate::method::{Marshaller, MethodDescriptor};
use crate::stats::ChannelStats;

/// Wraps method descriptors so every payload passes through the channel's byte counters.
///
/// The request serializer runs first and its output length is recorded as sent bytes;
/// the response length is recorded as received bytes before the deserializer runs.
/// Payloads and control flow are never altered.
#[derive(Debug, Clone)]
pub struct TrafficInterceptor {
    stats: Arc<ChannelStats>,
}

impl TrafficInterceptor {
    pub fn new(stats: Arc<ChannelStats>) -> Self {
        Self { stats }
    }

    pub fn stats(&self) -> &Arc<ChannelStats> {
        &self.stats
    }

    /// Decorate `method`'s request encoding and response decoding with byte counting.
    pub fn wrap<Req, Resp>(
        &self,
        method: &MethodDescriptor<Req, Resp>,
    ) -> MethodDescriptor<Req, Resp>
    where
        Req: 'static,
        Resp: 'static,
    {
        let request = method.request_marshaller().clone();
        let response = method.response_marshaller().clone();

        let sent = Arc::clone(&self.stats);
        let request_out = request.clone();
        let counted_request = Marshaller::new(
            move |item: &Req| {
                let payload = request_out.serialize(item)?;
                sent.add_sent_bytes(payload.len());
                Ok(payload)
            },
            move |payload: Bytes| request.deserialize(payload),
        );

        let received = Arc::clone(&self.stats);
        let response_in = response.clone();
        let counted_response = Marshaller::new(
            move |item: &Resp| response.serialize(item),
            move |payload: Bytes| {
                received.add_received_bytes(payload.len());
                response_in.deserialize(payload)
            },
        );

        method.with_marshallers(counted_request, counted_response)
    }
}
