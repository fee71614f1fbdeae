//! # Reflection Transport
//!
//! The gRPC Server Reflection Protocol exists in two generations, `grpc.reflection.v1` and
//! the older `grpc.reflection.v1alpha`. Both expose the same bidirectional
//! `ServerReflectionInfo` stream with wire compatible messages, but live under different
//! service paths, and plenty of servers only implement one of them.
//!
//! This module hides that split behind a single request/response abstraction:
//!
//! * [`ReflectionConnector`] opens a [`ReflectionStream`] for a concrete dialect.
//!   [`GrpcReflectionConnector`] is the `tonic` implementation.
//! * [`ReflectionTransport`] owns at most one open stream and negotiates the dialect:
//!   with [`ReflectDialect::Unknown`] it tries `v1` first and, if the server answers
//!   `UNIMPLEMENTED`, retries the same request once over `v1alpha`. The first dialect that
//!   succeeds is pinned for the lifetime of the transport.
//!
//! Requests on a stream are strictly sequential: one request is written, one response is
//! read back before the next request goes out.
use super::dialect::ReflectDialect;
use crate::BoxError;
use http_body::Body as HttpBody;
use std::future::Future;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Code, Streaming, client::GrpcService, transport::Channel};
use tonic_reflection::pb::{v1, v1alpha};
use tracing::debug;

// The host defined in the reflection requests doesn't seem to be a mandatory field
// and there is no documentation about what it is about.
// So we won't enforce it from the user.
const EMPTY_HOST: &str = "";

#[derive(Debug, thiserror::Error)]
pub enum ReflectionError {
    #[error("The reflection stream returned an error status: '{0}'")]
    Status(#[source] tonic::Status),

    #[error("Reflection stream closed unexpectedly")]
    StreamClosed,

    #[error("Internal error: Failed to send request to stream")]
    SendFailed,

    #[error("The reflection transport has been closed")]
    Closed,

    #[error("Protocol error: Received unexpected response type: {0}")]
    UnexpectedResponse(String),
}

impl ReflectionError {
    fn is_unimplemented(&self) -> bool {
        matches!(self, ReflectionError::Status(status) if status.code() == Code::Unimplemented)
    }
}

/// A reflection question, independent of the protocol generation that carries it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReflectionQuery {
    FileContainingSymbol(String),
    FileContainingExtension {
        containing_type: String,
        extension_number: i32,
    },
    FileByFilename(String),
    ListServices,
}

/// A reflection answer, independent of the protocol generation that carried it.
#[derive(Debug, Clone, PartialEq)]
pub enum ReflectionReply {
    /// Serialized `FileDescriptorProto`s.
    FileDescriptors(Vec<Vec<u8>>),
    /// Fully qualified service names.
    Services(Vec<String>),
    /// An in-band `ErrorResponse`. The stream stays usable.
    Error { code: Code, message: String },
}

impl ReflectionReply {
    /// Whether this reply can be the answer to `query`.
    pub fn answers(&self, query: &ReflectionQuery) -> bool {
        match self {
            ReflectionReply::Error { .. } => true,
            ReflectionReply::Services(_) => matches!(query, ReflectionQuery::ListServices),
            ReflectionReply::FileDescriptors(_) => !matches!(query, ReflectionQuery::ListServices),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ReflectionReply::FileDescriptors(_) => "FileDescriptorResponse",
            ReflectionReply::Services(_) => "ListServiceResponse",
            ReflectionReply::Error { .. } => "ErrorResponse",
        }
    }
}

/// One live bidirectional reflection stream speaking a single dialect.
pub trait ReflectionStream: Send {
    /// Writes `query` and waits for the matching response.
    fn round_trip(
        &mut self,
        query: ReflectionQuery,
    ) -> impl Future<Output = Result<ReflectionReply, ReflectionError>> + Send;
}

/// Opens reflection streams.
pub trait ReflectionConnector: Send {
    type Stream: ReflectionStream;

    /// Opens a stream for `dialect`, which is always [`ReflectDialect::V1`] or
    /// [`ReflectDialect::V1Alpha`].
    fn open(
        &mut self,
        dialect: ReflectDialect,
    ) -> impl Future<Output = Result<Self::Stream, ReflectionError>> + Send;
}

enum TransportState<S> {
    NoStream,
    StreamOpen { dialect: ReflectDialect, stream: S },
    Closed,
}

/// Dialect negotiation and stream lifecycle on top of a [`ReflectionConnector`].
pub struct ReflectionTransport<C: ReflectionConnector> {
    connector: C,
    dialect: ReflectDialect,
    state: TransportState<C::Stream>,
}

impl<C: ReflectionConnector> ReflectionTransport<C> {
    /// `dialect` pins the protocol generation up front; [`ReflectDialect::Unknown`] negotiates.
    pub fn new(connector: C, dialect: ReflectDialect) -> Self {
        Self {
            connector,
            dialect,
            state: TransportState::NoStream,
        }
    }

    /// The pinned dialect, or [`ReflectDialect::Unknown`] while nothing succeeded yet.
    pub fn dialect(&self) -> ReflectDialect {
        self.dialect
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, TransportState::StreamOpen { .. })
    }

    /// Sends one query and returns its response, opening a stream on demand.
    pub async fn send(&mut self, query: ReflectionQuery) -> Result<ReflectionReply, ReflectionError> {
        let candidate = match self.dialect {
            ReflectDialect::Unknown => ReflectDialect::V1,
            pinned => pinned,
        };

        match self.exchange(candidate, query.clone()).await {
            Ok(reply) => {
                self.pin(candidate);
                Ok(reply)
            }
            Err(err)
                if err.is_unimplemented()
                    && self.dialect == ReflectDialect::Unknown
                    && candidate == ReflectDialect::V1 =>
            {
                debug!("server does not implement grpc.reflection.v1, retrying with v1alpha");
                let reply = self.exchange(ReflectDialect::V1Alpha, query).await?;
                self.pin(ReflectDialect::V1Alpha);
                Ok(reply)
            }
            Err(err) => Err(err),
        }
    }

    /// Drops the open stream. The pinned dialect is kept.
    pub fn reset(&mut self) {
        if !matches!(self.state, TransportState::Closed) {
            self.state = TransportState::NoStream;
        }
    }

    /// Drops the open stream for good. Later sends fail with [`ReflectionError::Closed`].
    pub fn close(&mut self) {
        self.state = TransportState::Closed;
    }

    fn pin(&mut self, dialect: ReflectDialect) {
        if self.dialect != dialect {
            debug!(%dialect, "pinned reflection dialect");
            self.dialect = dialect;
        }
    }

    async fn exchange(
        &mut self,
        dialect: ReflectDialect,
        query: ReflectionQuery,
    ) -> Result<ReflectionReply, ReflectionError> {
        // The stream stays out of `state` until its reply is read, so a cancelled exchange
        // takes the stream down with it and the next send starts on a fresh one.
        let mut stream = match std::mem::replace(&mut self.state, TransportState::NoStream) {
            TransportState::Closed => {
                self.state = TransportState::Closed;
                return Err(ReflectionError::Closed);
            }
            TransportState::StreamOpen {
                dialect: open,
                stream,
            } if open == dialect => stream,
            // Never keep a stream of the other dialect around.
            _ => self.connector.open(dialect).await?,
        };

        let reply = stream.round_trip(query.clone()).await?;

        if !reply.answers(&query) {
            return Err(ReflectionError::UnexpectedResponse(format!(
                "{} in reply to {query:?}",
                reply.kind()
            )));
        }

        self.state = TransportState::StreamOpen { dialect, stream };
        Ok(reply)
    }
}

/// A [`ReflectionConnector`] over any `tonic` gRPC service, speaking both dialects.
#[derive(Debug, Clone)]
pub struct GrpcReflectionConnector<S = Channel> {
    v1: v1::server_reflection_client::ServerReflectionClient<S>,
    v1alpha: v1alpha::server_reflection_client::ServerReflectionClient<S>,
}

impl<S> GrpcReflectionConnector<S>
where
    S: GrpcService<tonic::body::Body> + Clone,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    pub fn new(service: S) -> Self {
        Self {
            v1: v1::server_reflection_client::ServerReflectionClient::new(service.clone()),
            v1alpha: v1alpha::server_reflection_client::ServerReflectionClient::new(service),
        }
    }
}

impl<S> ReflectionConnector for GrpcReflectionConnector<S>
where
    S: GrpcService<tonic::body::Body> + Send,
    S::Future: Send,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    type Stream = GrpcReflectionStream;

    async fn open(&mut self, dialect: ReflectDialect) -> Result<Self::Stream, ReflectionError> {
        match dialect {
            ReflectDialect::V1Alpha => {
                let (requests, rx) = mpsc::channel(1);
                let responses = self
                    .v1alpha
                    .server_reflection_info(ReceiverStream::new(rx))
                    .await
                    .map_err(ReflectionError::Status)?
                    .into_inner();

                Ok(GrpcReflectionStream::V1Alpha(DialectStream {
                    requests,
                    responses,
                }))
            }
            ReflectDialect::V1 | ReflectDialect::Unknown => {
                let (requests, rx) = mpsc::channel(1);
                let responses = self
                    .v1
                    .server_reflection_info(ReceiverStream::new(rx))
                    .await
                    .map_err(ReflectionError::Status)?
                    .into_inner();

                Ok(GrpcReflectionStream::V1(DialectStream {
                    requests,
                    responses,
                }))
            }
        }
    }
}

/// An open `ServerReflectionInfo` stream of either dialect.
pub enum GrpcReflectionStream {
    V1(DialectStream<v1::ServerReflectionRequest, v1::ServerReflectionResponse>),
    V1Alpha(DialectStream<v1alpha::ServerReflectionRequest, v1alpha::ServerReflectionResponse>),
}

impl ReflectionStream for GrpcReflectionStream {
    async fn round_trip(&mut self, query: ReflectionQuery) -> Result<ReflectionReply, ReflectionError> {
        match self {
            GrpcReflectionStream::V1(stream) => {
                v1_messages::reply(stream.exchange(v1_messages::request(query)).await?)
            }
            GrpcReflectionStream::V1Alpha(stream) => {
                v1alpha_messages::reply(stream.exchange(v1alpha_messages::request(query)).await?)
            }
        }
    }
}

/// The two halves of a bidirectional stream.
pub struct DialectStream<Req, Res> {
    requests: mpsc::Sender<Req>,
    responses: Streaming<Res>,
}

impl<Req, Res> DialectStream<Req, Res> {
    async fn exchange(&mut self, request: Req) -> Result<Res, ReflectionError> {
        self.requests
            .send(request)
            .await
            .map_err(|_| ReflectionError::SendFailed)?;

        self.responses
            .message()
            .await
            .map_err(ReflectionError::Status)?
            .ok_or(ReflectionError::StreamClosed)
    }
}

// Both generations share field numbers and shapes, only the Rust types differ.
macro_rules! dialect_messages {
    ($name:ident, $pb:ident) => {
        mod $name {
            use super::{EMPTY_HOST, ReflectionError, ReflectionQuery, ReflectionReply};
            use tonic::Code;
            use tonic_reflection::pb::$pb::{
                ExtensionRequest, ServerReflectionRequest, ServerReflectionResponse,
                server_reflection_request::MessageRequest,
                server_reflection_response::MessageResponse,
            };

            pub(super) fn request(query: ReflectionQuery) -> ServerReflectionRequest {
                let message_request = match query {
                    ReflectionQuery::FileContainingSymbol(symbol) => {
                        MessageRequest::FileContainingSymbol(symbol)
                    }
                    ReflectionQuery::FileContainingExtension {
                        containing_type,
                        extension_number,
                    } => MessageRequest::FileContainingExtension(ExtensionRequest {
                        containing_type,
                        extension_number,
                    }),
                    ReflectionQuery::FileByFilename(name) => MessageRequest::FileByFilename(name),
                    ReflectionQuery::ListServices => MessageRequest::ListServices(String::new()),
                };

                ServerReflectionRequest {
                    host: EMPTY_HOST.to_string(),
                    message_request: Some(message_request),
                }
            }

            pub(super) fn reply(
                response: ServerReflectionResponse,
            ) -> Result<ReflectionReply, ReflectionError> {
                match response.message_response {
                    Some(MessageResponse::FileDescriptorResponse(res)) => {
                        Ok(ReflectionReply::FileDescriptors(res.file_descriptor_proto))
                    }
                    Some(MessageResponse::ListServicesResponse(res)) => Ok(
                        ReflectionReply::Services(res.service.into_iter().map(|s| s.name).collect()),
                    ),
                    Some(MessageResponse::ErrorResponse(e)) => Ok(ReflectionReply::Error {
                        code: Code::from_i32(e.error_code),
                        message: e.error_message,
                    }),
                    Some(other) => Err(ReflectionError::UnexpectedResponse(format!("{other:?}"))),
                    None => Err(ReflectionError::UnexpectedResponse(
                        "Empty Message".into(),
                    )),
                }
            }
        }
    };
}

dialect_messages!(v1_messages, v1);
dialect_messages!(v1alpha_messages, v1alpha);
