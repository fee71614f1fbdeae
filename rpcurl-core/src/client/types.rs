use prost_reflect::DynamicMessage;
use std::fmt::Debug;

/// A request object encapsulating all necessary information to perform a dynamic gRPC call.
#[derive(Debug, Clone)]
pub struct DynamicRequest {
    /// The JSON body of the request.
    /// - For Unary/ServerStreaming: An Object `{}`.
    /// - For ClientStreaming/Bidirectional: An Array of Objects `[{}]`.
    pub body: serde_json::Value,
    /// Custom gRPC metadata (headers) to attach to the request.
    pub headers: Vec<(String, String)>,
    /// The fully qualified name of the service (e.g., `my.package.Service`).
    pub service: String,
    /// The name of the method to call (e.g., `SayHello`).
    pub method: String,
}

impl DynamicRequest {
    /// Splits a method path such as `my.package.Service/Method` (a leading `/` is allowed).
    pub fn split_method_path(path: &str) -> Option<(&str, &str)> {
        let (service, method) = path.trim_start_matches('/').rsplit_once('/')?;

        if service.is_empty() || method.is_empty() {
            return None;
        }

        Some((service, method))
    }
}

/// The result of a dynamic gRPC call, decoded against the method's output type.
#[derive(Debug, Clone)]
pub enum DynamicResponse {
    /// A single response message (for Unary and Client Streaming calls).
    Unary(Result<DynamicMessage, tonic::Status>),
    /// A stream of response messages (for Server Streaming and Bidirectional calls).
    Streaming(Result<Vec<Result<DynamicMessage, tonic::Status>>, tonic::Status>),
}
