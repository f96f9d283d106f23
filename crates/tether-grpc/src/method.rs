// ABOUTME: Method descriptors with independent request/response marshallers.
// ABOUTME: MarshallerCodec adapts a descriptor's encode/decode pair to tonic's Codec trait.

use std::fmt;
use std::sync::Arc;

use prost::bytes::{Buf, BufMut, Bytes};
use tonic::codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder};
use tonic::Status;

type SerializeFn<T> = dyn Fn(&T) -> Result<Bytes, Status> + Send + Sync;
type DeserializeFn<T> = dyn Fn(Bytes) -> Result<T, Status> + Send + Sync;

/// The shape of an RPC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodType {
    Unary,
    ClientStreaming,
    ServerStreaming,
    DuplexStreaming,
}

impl fmt::Display for MethodType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MethodType::Unary => "unary",
            MethodType::ClientStreaming => "client-streaming",
            MethodType::ServerStreaming => "server-streaming",
            MethodType::DuplexStreaming => "duplex-streaming",
        };
        f.write_str(name)
    }
}

/// A serializer/deserializer pair for one message type.
pub struct Marshaller<T> {
    serialize: Arc<SerializeFn<T>>,
    deserialize: Arc<DeserializeFn<T>>,
}

impl<T> Clone for Marshaller<T> {
    fn clone(&self) -> Self {
        Self {
            serialize: Arc::clone(&self.serialize),
            deserialize: Arc::clone(&self.deserialize),
        }
    }
}

impl<T> fmt::Debug for Marshaller<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Marshaller").finish_non_exhaustive()
    }
}

impl<T> Marshaller<T> {
    pub fn new<S, D>(serialize: S, deserialize: D) -> Self
    where
        S: Fn(&T) -> Result<Bytes, Status> + Send + Sync + 'static,
        D: Fn(Bytes) -> Result<T, Status> + Send + Sync + 'static,
    {
        Self {
            serialize: Arc::new(serialize),
            deserialize: Arc::new(deserialize),
        }
    }

    pub fn serialize(&self, item: &T) -> Result<Bytes, Status> {
        (self.serialize)(item)
    }

    pub fn deserialize(&self, payload: Bytes) -> Result<T, Status> {
        (self.deserialize)(payload)
    }
}

impl<T> Marshaller<T>
where
    T: prost::Message + Default + 'static,
{
    /// Marshaller backed by the message's protobuf encoding.
    pub fn prost() -> Self {
        Self::new(
            |item: &T| Ok(Bytes::from(item.encode_to_vec())),
            |payload: Bytes| T::decode(payload).map_err(|e| Status::internal(e.to_string())),
        )
    }
}

/// Everything needed to issue one RPC: its shape, its route, and how to (de)serialize.
pub struct MethodDescriptor<Req, Resp> {
    kind: MethodType,
    service: String,
    name: String,
    request: Marshaller<Req>,
    response: Marshaller<Resp>,
}

impl<Req, Resp> Clone for MethodDescriptor<Req, Resp> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            service: self.service.clone(),
            name: self.name.clone(),
            request: self.request.clone(),
            response: self.response.clone(),
        }
    }
}

impl<Req, Resp> fmt::Debug for MethodDescriptor<Req, Resp> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDescriptor")
            .field("kind", &self.kind)
            .field("service", &self.service)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl<Req, Resp> MethodDescriptor<Req, Resp> {
    pub fn new(
        kind: MethodType,
        service: impl Into<String>,
        name: impl Into<String>,
        request: Marshaller<Req>,
        response: Marshaller<Resp>,
    ) -> Self {
        Self {
            kind,
            service: service.into(),
            name: name.into(),
            request,
            response,
        }
    }

    pub fn kind(&self) -> MethodType {
        self.kind
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// HTTP/2 path of the method, e.g. `/chat.ChatService/Send`.
    pub fn full_name(&self) -> String {
        format!("/{}/{}", self.service, self.name)
    }

    pub fn request_marshaller(&self) -> &Marshaller<Req> {
        &self.request
    }

    pub fn response_marshaller(&self) -> &Marshaller<Resp> {
        &self.response
    }

    /// Replace both marshallers, keeping the route and call type.
    pub fn with_marshallers(&self, request: Marshaller<Req>, response: Marshaller<Resp>) -> Self {
        Self {
            kind: self.kind,
            service: self.service.clone(),
            name: self.name.clone(),
            request,
            response,
        }
    }

    pub(crate) fn codec(&self) -> MarshallerCodec<Req, Resp> {
        MarshallerCodec {
            request: self.request.clone(),
            response: self.response.clone(),
        }
    }
}

impl<Req, Resp> MethodDescriptor<Req, Resp>
where
    Req: prost::Message + Default + 'static,
    Resp: prost::Message + Default + 'static,
{
    /// Descriptor for a method whose messages are protobuf encoded.
    pub fn prost(kind: MethodType, service: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(kind, service, name, Marshaller::prost(), Marshaller::prost())
    }
}

/// tonic codec driven by a descriptor's marshallers.
pub struct MarshallerCodec<Req, Resp> {
    request: Marshaller<Req>,
    response: Marshaller<Resp>,
}

impl<Req, Resp> Codec for MarshallerCodec<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    type Encode = Req;
    type Decode = Resp;
    type Encoder = MarshallerEncoder<Req>;
    type Decoder = MarshallerDecoder<Resp>;

    fn encoder(&mut self) -> Self::Encoder {
        MarshallerEncoder(self.request.clone())
    }

    fn decoder(&mut self) -> Self::Decoder {
        MarshallerDecoder(self.response.clone())
    }
}

pub struct MarshallerEncoder<T>(Marshaller<T>);

impl<T> Encoder for MarshallerEncoder<T> {
    type Item = T;
    type Error = Status;

    fn encode(&mut self, item: Self::Item, dst: &mut EncodeBuf<'_>) -> Result<(), Self::Error> {
        let payload = self.0.serialize(&item)?;
        dst.put_slice(&payload);
        Ok(())
    }
}

pub struct MarshallerDecoder<T>(Marshaller<T>);

impl<T> Decoder for MarshallerDecoder<T> {
    type Item = T;
    type Error = Status;

    fn decode(&mut self, src: &mut DecodeBuf<'_>) -> Result<Option<Self::Item>, Self::Error> {
        let payload = src.copy_to_bytes(src.remaining());
        self.0.deserialize(payload).map(Some)
    }
}
