//! # Server Reflection
//!
//! Runtime schema discovery through the gRPC Server Reflection Protocol.
//!
//! A server is asked for its own Protobuf schema on demand, so `rpcurl` can talk to it
//! without pre-compiled descriptors. Both protocol generations (`v1` and `v1alpha`) are
//! spoken, and everything learned is cached for the lifetime of a [`ReflectionResolver`].
mod cache;
mod descriptor;
mod dialect;
mod resolver;
mod transport;

pub use cache::{CacheInsertError, DescriptorCache};
pub use descriptor::Descriptor;
pub use dialect::{ReflectDialect, UnknownDialectError};
pub use resolver::{MalformedReason, ProtocolError, ReflectionResolver, ResolveError};
pub use transport::{
    DialectStream, GrpcReflectionConnector, GrpcReflectionStream, ReflectionConnector,
    ReflectionError, ReflectionQuery, ReflectionReply, ReflectionStream, ReflectionTransport,
};
