//! # rpcurl Core
//!
//! `rpcurl-core` is the library behind the `rpcurl` CLI. It lets a caller talk to any
//! gRPC or Connect server without compile-time knowledge of its Protobuf schema.
//!
//! ## Key Components
//!
//! * **[`ReflectionResolver`](reflection::ReflectionResolver):** Discovers descriptors at
//!   runtime over the gRPC Server Reflection Protocol (`v1`, falling back to `v1alpha`),
//!   caching everything it learns.
//! * **[`RpcClient`](client::RpcClient):** Resolves a method through the resolver and performs
//!   the call with dynamically built messages.
//! * **[`RelayHandler`](relay::RelayHandler):** A browser-friendly relay that unwraps
//!   base64 envelopes sent as simple CORS requests and forwards them over TLS or h2c.
//! * **[`headers`]:** Authority computation and reserved header validation.
//! * **[`tls`]:** rustls client configuration from PEM files.
//!
//! ## Re-exports
//!
//! This crate re-exports `prost`, `prost-reflect`, and `tonic` to ensure that consumers
//! use compatible versions of these underlying dependencies.
pub mod client;
pub mod config;
pub mod grpc;
pub mod headers;
pub mod printer;
pub mod reflection;
pub mod relay;
pub mod tls;

// Re-exports
pub use prost;
pub use prost_reflect;
pub use tonic;

/// Type alias for the standard boxed error used in generic bounds.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
