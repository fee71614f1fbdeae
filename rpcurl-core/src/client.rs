//! # RPC Client
//!
//! This module implements the high-level logic for executing dynamic gRPC requests.
//!
//! An [`RpcClient`] shares one connection between two users:
//!
//! 1. A [`ReflectionResolver`] that discovers the schema of the server on demand.
//! 2. A [`GrpcClient`] that performs the calls with `DynamicMessage`s built from that schema.
//!
//! ## Example
//!
//! ```rust,no_run
//! use rpcurl_core::client::{DynamicRequest, RpcClient};
//! use rpcurl_core::config::ClientOptions;
//! use rpcurl_core::printer::TracingPrinter;
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let client = RpcClient::connect(
//!     "http://localhost:50051",
//!     &[],
//!     &ClientOptions::default(),
//!     Arc::new(TracingPrinter),
//! )
//! .await?;
//!
//! let response = client
//!     .call(DynamicRequest {
//!         service: "helloworld.Greeter".to_string(),
//!         method: "SayHello".to_string(),
//!         body: serde_json::json!({ "name": "rpcurl" }),
//!         headers: vec![],
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```
mod types;

pub use types::*;

use crate::{
    BoxError,
    config::ClientOptions,
    grpc::client::{GrpcClient, GrpcRequestError},
    headers::compute_authority,
    printer::Printer,
    reflection::{
        Descriptor, GrpcReflectionConnector, ReflectDialect, ReflectionConnector,
        ReflectionResolver, ResolveError,
    },
    tls::{TlsConfigError, build_https_connector},
};
use futures_util::{Stream, StreamExt};
use http::Uri;
use http_body::Body as HttpBody;
use prost_reflect::{DynamicMessage, MessageDescriptor, MethodDescriptor};
use std::sync::Arc;
use tonic::{
    client::GrpcService,
    transport::{Channel, Endpoint},
};
use tracing::debug;

/// Errors that can occur when connecting to a gRPC server.
#[derive(Debug, thiserror::Error)]
pub enum ClientConnectError {
    #[error("Invalid URL '{0}': {1}")]
    InvalidUrl(String, #[source] tonic::transport::Error),
    #[error("Invalid authority '{0}'")]
    InvalidAuthority(String),
    #[error(transparent)]
    Tls(#[from] TlsConfigError),
    #[error("Failed to connect to '{0}': {1}")]
    ConnectionFailed(String, #[source] tonic::transport::Error),
}

/// Errors that can occur while invoking a method dynamically.
#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    #[error("Failed to resolve '{0}': {1}")]
    Resolve(String, #[source] ResolveError),
    #[error("'{0}' is not a service")]
    NotAService(String),
    #[error("Method '{method}' not found in service '{service}'")]
    MethodNotFound { service: String, method: String },
    #[error("Invalid input: '{0}'")]
    InvalidInput(String),
    #[error("gRPC client request error: '{0}'")]
    GrpcRequestError(#[from] GrpcRequestError),
}

/// The main client for interacting with gRPC servers dynamically.
///
/// Cloning is cheap; clones share the connection and the descriptor cache.
pub struct RpcClient<S = Channel>
where
    GrpcReflectionConnector<S>: ReflectionConnector,
{
    resolver: Arc<ReflectionResolver<GrpcReflectionConnector<S>>>,
    grpc_client: GrpcClient<S>,
}

impl<S: Clone> Clone for RpcClient<S>
where
    GrpcReflectionConnector<S>: ReflectionConnector,
{
    fn clone(&self) -> Self {
        Self {
            resolver: self.resolver.clone(),
            grpc_client: self.grpc_client.clone(),
        }
    }
}

impl RpcClient<Channel> {
    /// Connects to a gRPC server.
    ///
    /// `headers` only contribute the `:authority` of the connection (through a `host`
    /// header); they are not sent. `https` URLs use the TLS materials of `options`.
    ///
    /// # Returns
    ///
    /// * `Ok(RpcClient)` - The connected client. No reflection request was made yet.
    /// * `Err(ClientConnectError)` - If the URL is invalid or the connection cannot be established.
    pub async fn connect(
        addr: &str,
        headers: &[(String, String)],
        options: &ClientOptions,
        printer: Arc<dyn Printer>,
    ) -> Result<Self, ClientConnectError> {
        let mut endpoint = Endpoint::new(addr.to_string())
            .map_err(|e| ClientConnectError::InvalidUrl(addr.to_string(), e))?;

        let authority = compute_authority(addr, headers);
        let scheme = endpoint.uri().scheme_str().unwrap_or("http").to_string();
        let origin: Uri = format!("{scheme}://{authority}")
            .parse()
            .map_err(|_| ClientConnectError::InvalidAuthority(authority.clone()))?;
        endpoint = endpoint.origin(origin);

        debug!(addr, %authority, "connecting");

        let connector = build_https_connector(&options.tls, printer)?;
        let channel = endpoint
            .connect_with_connector(connector)
            .await
            .map_err(|e| ClientConnectError::ConnectionFailed(addr.to_string(), e))?;

        Ok(Self::from_service(channel, options.reflection.dialect))
    }
}

impl<S> RpcClient<S>
where
    S: GrpcService<tonic::body::Body> + Clone + Send,
    S::Future: Send,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    /// Creates a client from an existing Tonic service/channel.
    pub fn from_service(service: S, dialect: ReflectDialect) -> Self {
        Self {
            resolver: Arc::new(ReflectionResolver::from_service(service.clone(), dialect)),
            grpc_client: GrpcClient::new(service),
        }
    }

    /// The schema resolver backing this client.
    pub fn resolver(&self) -> &ReflectionResolver<GrpcReflectionConnector<S>> {
        &self.resolver
    }

    /// Lists the services the server advertises through reflection.
    pub async fn list_services(&self) -> Result<Vec<String>, ResolveError> {
        self.resolver.list_services().await
    }

    /// Resolves any symbol (service, message, enum or extension) through reflection.
    pub async fn describe(&self, symbol: &str) -> Result<Descriptor, ResolveError> {
        self.resolver.find_descriptor_by_name(symbol).await
    }

    /// Resolves `request.service/request.method` and performs the call.
    ///
    /// The JSON body is converted into the method's input type before anything is sent.
    pub async fn call(&self, request: DynamicRequest) -> Result<DynamicResponse, InvokeError> {
        let method = self.find_method(&request.service, &request.method).await?;
        let mut grpc_client = self.grpc_client.clone();

        match (method.is_client_streaming(), method.is_server_streaming()) {
            (false, false) => {
                let payload = json_to_message(&method.input(), request.body)?;
                let result = grpc_client
                    .unary(method, payload, request.headers)
                    .await?;
                Ok(DynamicResponse::Unary(result))
            }
            (false, true) => {
                let payload = json_to_message(&method.input(), request.body)?;
                match grpc_client
                    .server_streaming(method, payload, request.headers)
                    .await?
                {
                    Ok(stream) => Ok(DynamicResponse::Streaming(Ok(stream.collect().await))),
                    Err(status) => Ok(DynamicResponse::Streaming(Err(status))),
                }
            }
            (true, false) => {
                let input_stream = json_array_to_stream(&method.input(), request.body)?;
                let result = grpc_client
                    .client_streaming(method, input_stream, request.headers)
                    .await?;
                Ok(DynamicResponse::Unary(result))
            }
            (true, true) => {
                let input_stream = json_array_to_stream(&method.input(), request.body)?;
                match grpc_client
                    .bidirectional_streaming(method, input_stream, request.headers)
                    .await?
                {
                    Ok(stream) => Ok(DynamicResponse::Streaming(Ok(stream.collect().await))),
                    Err(status) => Ok(DynamicResponse::Streaming(Err(status))),
                }
            }
        }
    }

    async fn find_method(&self, service: &str, method: &str) -> Result<MethodDescriptor, InvokeError> {
        let descriptor = self
            .resolver
            .find_descriptor_by_name(service)
            .await
            .map_err(|e| InvokeError::Resolve(service.to_string(), e))?;

        descriptor
            .service_descriptor()
            .ok_or_else(|| InvokeError::NotAService(service.to_string()))?
            .methods()
            .find(|m| m.name() == method)
            .ok_or_else(|| InvokeError::MethodNotFound {
                service: service.to_string(),
                method: method.to_string(),
            })
    }
}

fn json_to_message(
    descriptor: &MessageDescriptor,
    json: serde_json::Value,
) -> Result<DynamicMessage, InvokeError> {
    DynamicMessage::deserialize(descriptor.clone(), json).map_err(|e| {
        InvokeError::InvalidInput(format!(
            "JSON structure does not match '{}': {e}",
            descriptor.full_name()
        ))
    })
}

fn json_array_to_stream(
    descriptor: &MessageDescriptor,
    json: serde_json::Value,
) -> Result<impl Stream<Item = DynamicMessage> + Send + 'static, InvokeError> {
    match json {
        serde_json::Value::Array(items) => {
            let messages = items
                .into_iter()
                .map(|item| json_to_message(descriptor, item))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(tokio_stream::iter(messages))
        }
        _ => Err(InvokeError::InvalidInput(
            "Client streaming requires a JSON Array body".to_string(),
        )),
    }
}
