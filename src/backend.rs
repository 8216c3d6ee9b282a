//! Backing RPC client
//!
//! The instance manager talks to the backing service through [`RpcBackend`],
//! exchanging JSON values. [`GrpcBackend`] is the production implementation:
//! it converts JSON to dynamic protobuf messages using the descriptor pool
//! and calls the service over a lazily connected tonic channel.

use crate::error::{Error, Result};
use crate::types::OperationDescriptor;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use prost::bytes::Buf;
use prost::Message;
use prost_reflect::{DescriptorPool, DynamicMessage, MessageDescriptor, SerializeOptions};
use serde_json::Value;
use tonic::client::Grpc;
use tonic::codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder};
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::{Channel, Endpoint};
use tonic::Status;

/// Stream of response messages from a server- or bidi-streaming call
pub type ResponseStream = BoxStream<'static, std::result::Result<Value, Status>>;

/// Invokes operations of the backing service
///
/// All four streaming shapes take already-complete input: request streams
/// are collected by the gateway before the call starts.
#[async_trait]
pub trait RpcBackend: Send + Sync + 'static {
    async fn invoke_unary(
        &self,
        operation: &OperationDescriptor,
        request: Value,
    ) -> std::result::Result<Value, Status>;

    async fn invoke_server_stream(
        &self,
        operation: &OperationDescriptor,
        request: Value,
    ) -> std::result::Result<ResponseStream, Status>;

    async fn invoke_client_stream(
        &self,
        operation: &OperationDescriptor,
        requests: Vec<Value>,
    ) -> std::result::Result<Value, Status>;

    async fn invoke_bidi_stream(
        &self,
        operation: &OperationDescriptor,
        requests: Vec<Value>,
    ) -> std::result::Result<ResponseStream, Status>;
}

/// Error text recorded on an instance for a failed call
///
/// Falls back to the code description when the status carries no message.
pub fn status_error_text(status: &Status) -> String {
    if status.message().is_empty() {
        status.code().description().to_string()
    } else {
        status.message().to_string()
    }
}

/// gRPC backend driven by a protobuf descriptor pool
#[derive(Clone)]
pub struct GrpcBackend {
    channel: Channel,
    pool: DescriptorPool,
    endpoint: String,
}

impl std::fmt::Debug for GrpcBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrpcBackend")
            .field("endpoint", &self.endpoint)
            .field("services", &self.pool.services().count())
            .finish()
    }
}

impl GrpcBackend {
    /// Create a backend whose channel connects on first use
    pub fn connect_lazy(endpoint: impl Into<String>, pool: DescriptorPool) -> Result<Self> {
        let endpoint = endpoint.into();
        let channel = Endpoint::from_shared(endpoint.clone())
            .map_err(|e| Error::Config(format!("invalid backend endpoint {}: {}", endpoint, e)))?
            .connect_lazy();
        Ok(Self {
            channel,
            pool,
            endpoint,
        })
    }

    /// Use an existing channel
    pub fn from_channel(channel: Channel, pool: DescriptorPool) -> Self {
        Self {
            channel,
            pool,
            endpoint: String::from("<channel>"),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn method(
        &self,
        operation: &OperationDescriptor,
    ) -> std::result::Result<(MessageDescriptor, MessageDescriptor, PathAndQuery), Status> {
        let service = self
            .pool
            .get_service_by_name(&operation.service)
            .ok_or_else(|| Status::unimplemented(format!("unknown service {}", operation.service)))?;
        let method = service
            .methods()
            .find(|m| m.name() == operation.name)
            .ok_or_else(|| Status::unimplemented(format!("unknown method {}", operation.grpc_path())))?;
        let path = PathAndQuery::try_from(operation.grpc_path())
            .map_err(|e| Status::internal(format!("invalid gRPC path: {e}")))?;
        Ok((method.input(), method.output(), path))
    }

    async fn ready(&self) -> std::result::Result<Grpc<Channel>, Status> {
        let mut grpc = Grpc::new(self.channel.clone());
        grpc.ready()
            .await
            .map_err(|e| Status::unavailable(format!("backend not ready: {e}")))?;
        Ok(grpc)
    }
}

#[async_trait]
impl RpcBackend for GrpcBackend {
    async fn invoke_unary(
        &self,
        operation: &OperationDescriptor,
        request: Value,
    ) -> std::result::Result<Value, Status> {
        let (input, output, path) = self.method(operation)?;
        let message = json_to_message(&input, request)?;
        let mut grpc = self.ready().await?;
        let response = grpc
            .unary(tonic::Request::new(message), path, ReflectCodec::new(output))
            .await?;
        message_to_json(&response.into_inner())
    }

    async fn invoke_server_stream(
        &self,
        operation: &OperationDescriptor,
        request: Value,
    ) -> std::result::Result<ResponseStream, Status> {
        let (input, output, path) = self.method(operation)?;
        let message = json_to_message(&input, request)?;
        let mut grpc = self.ready().await?;
        let response = grpc
            .server_streaming(tonic::Request::new(message), path, ReflectCodec::new(output))
            .await?;
        Ok(response
            .into_inner()
            .map(|item| item.and_then(|msg| message_to_json(&msg)))
            .boxed())
    }

    async fn invoke_client_stream(
        &self,
        operation: &OperationDescriptor,
        requests: Vec<Value>,
    ) -> std::result::Result<Value, Status> {
        let (input, output, path) = self.method(operation)?;
        let messages = requests
            .into_iter()
            .map(|r| json_to_message(&input, r))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let mut grpc = self.ready().await?;
        let response = grpc
            .client_streaming(
                tonic::Request::new(stream::iter(messages)),
                path,
                ReflectCodec::new(output),
            )
            .await?;
        message_to_json(&response.into_inner())
    }

    async fn invoke_bidi_stream(
        &self,
        operation: &OperationDescriptor,
        requests: Vec<Value>,
    ) -> std::result::Result<ResponseStream, Status> {
        let (input, output, path) = self.method(operation)?;
        let messages = requests
            .into_iter()
            .map(|r| json_to_message(&input, r))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let mut grpc = self.ready().await?;
        let response = grpc
            .streaming(
                tonic::Request::new(stream::iter(messages)),
                path,
                ReflectCodec::new(output),
            )
            .await?;
        Ok(response
            .into_inner()
            .map(|item| item.and_then(|msg| message_to_json(&msg)))
            .boxed())
    }
}

/// Build a dynamic message from its proto3 JSON form
pub fn json_to_message(
    descriptor: &MessageDescriptor,
    value: Value,
) -> std::result::Result<DynamicMessage, Status> {
    DynamicMessage::deserialize(descriptor.clone(), value).map_err(|e| {
        Status::invalid_argument(format!("invalid {} message: {e}", descriptor.full_name()))
    })
}

/// Render a dynamic message as JSON keyed by proto field names
pub fn message_to_json(message: &DynamicMessage) -> std::result::Result<Value, Status> {
    let options = SerializeOptions::new()
        .use_proto_field_name(true)
        .stringify_64_bit_integers(false)
        .skip_default_fields(false);
    message
        .serialize_with_options(serde_json::value::Serializer, &options)
        .map_err(|e| Status::internal(format!("failed to render response: {e}")))
}

/// Codec for dynamic protobuf messages
#[derive(Clone)]
struct ReflectCodec {
    output_desc: MessageDescriptor,
}

impl ReflectCodec {
    fn new(output_desc: MessageDescriptor) -> Self {
        Self { output_desc }
    }
}

impl Codec for ReflectCodec {
    type Encode = DynamicMessage;
    type Decode = DynamicMessage;
    type Encoder = ReflectEncoder;
    type Decoder = ReflectDecoder;

    fn encoder(&mut self) -> Self::Encoder {
        ReflectEncoder
    }

    fn decoder(&mut self) -> Self::Decoder {
        ReflectDecoder {
            desc: self.output_desc.clone(),
        }
    }
}

struct ReflectEncoder;

impl Encoder for ReflectEncoder {
    type Item = DynamicMessage;
    type Error = Status;

    fn encode(
        &mut self,
        item: Self::Item,
        dst: &mut EncodeBuf<'_>,
    ) -> std::result::Result<(), Self::Error> {
        item.encode(dst)
            .map_err(|e| Status::internal(format!("encode error: {e}")))
    }
}

struct ReflectDecoder {
    desc: MessageDescriptor,
}

impl Decoder for ReflectDecoder {
    type Item = DynamicMessage;
    type Error = Status;

    fn decode(
        &mut self,
        src: &mut DecodeBuf<'_>,
    ) -> std::result::Result<Option<Self::Item>, Self::Error> {
        // an empty frame is a valid message with all fields at default
        let msg = DynamicMessage::decode(self.desc.clone(), src.copy_to_bytes(src.remaining()))
            .map_err(|e| Status::internal(format!("decode error: {e}")))?;
        Ok(Some(msg))
    }
}
