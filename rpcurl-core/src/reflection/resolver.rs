//! # Reflection Resolver
//!
//! Lazily discovers Protobuf descriptors through the Server Reflection Protocol and keeps
//! everything it learns in a [`DescriptorCache`].
//!
//! ## The Resolution Process
//!
//! 1. **Cache**: A lookup that the cache can answer never touches the network.
//! 2. **Ask**: On a miss the resolver asks for the file containing the symbol (or extension).
//! 3. **Complete**: The server may or may not send the imports along. Every import that is
//!    neither cached nor in the batch is requested by filename until the batch is closed.
//!    Each answer is remembered, so a filename is asked for at most once: files stay
//!    available to later batches even when the batch that fetched them fails, and a
//!    NotFound fails every later batch that needs the file. A fetch that gets no answer
//!    is not remembered.
//! 4. **Register**: The batch is linked into the cache in one step and the lookup is answered
//!    from the cache.
//!
//! A single lock serializes lookups, cache updates and the reflection stream. Reflection
//! traffic is rare once the cache is warm, so lookups simply queue behind each other.
use super::{
    cache::{CacheInsertError, DescriptorCache},
    descriptor::Descriptor,
    dialect::ReflectDialect,
    transport::{
        GrpcReflectionConnector, ReflectionConnector, ReflectionError, ReflectionQuery,
        ReflectionReply, ReflectionTransport,
    },
};
use crate::BoxError;
use http_body::Body as HttpBody;
use prost::Message;
use prost_reflect::{ExtensionDescriptor, MessageDescriptor};
use prost_types::{FileDescriptorProto, FileDescriptorSet};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tonic::{Code, client::GrpcService, transport::Channel};
use tracing::debug;

/// An error reported by the remote reflection service.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("server returned {code:?}: {message}")]
pub struct ProtocolError {
    pub code: Code,
    pub message: String,
}

impl From<tonic::Status> for ProtocolError {
    fn from(status: tonic::Status) -> Self {
        Self {
            code: status.code(),
            message: status.message().to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MalformedReason {
    #[error("failed to decode FileDescriptorProto: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("import '{dependency}' of '{file}' is not available from the server")]
    DependencyUnavailable {
        file: String,
        dependency: String,
        #[source]
        remote: Option<ProtocolError>,
    },

    #[error(transparent)]
    Cache(#[from] CacheInsertError),
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("Symbol '{symbol}' not found: the server does not expose it")]
    DescriptorNotFound {
        symbol: String,
        #[source]
        remote: Option<ProtocolError>,
    },

    #[error("Extension {number} of message '{message}' not found: the server does not expose it")]
    ExtensionNotFound {
        message: String,
        number: u32,
        #[source]
        remote: Option<ProtocolError>,
    },

    #[error("'{name}' is a {actual}, not a {expected}")]
    WrongKind {
        name: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("The server sent malformed descriptors while resolving '{target}': {reason}")]
    MalformedDescriptor {
        target: String,
        #[source]
        reason: MalformedReason,
    },

    #[error("Reflection request failed: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Reflection transport failed: '{0}'")]
    Transport(#[from] ReflectionError),
}

struct ResolverState<C: ReflectionConnector> {
    transport: ReflectionTransport<C>,
    cache: DescriptorCache,
    /// Imports fetched by filename that are not cached yet, because the batch that needed
    /// them failed. Later batches pick them up without asking again.
    fetched_imports: HashMap<String, FileDescriptorProto>,
    /// Imports the server answered NotFound for.
    unavailable_imports: HashMap<String, ProtocolError>,
}

/// A schema resolver backed by the server's reflection service.
pub struct ReflectionResolver<C: ReflectionConnector = GrpcReflectionConnector<Channel>> {
    state: Mutex<ResolverState<C>>,
}

impl<S> ReflectionResolver<GrpcReflectionConnector<S>>
where
    S: GrpcService<tonic::body::Body> + Clone + Send,
    S::Future: Send,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    /// Creates a resolver talking to the reflection service reachable through `service`
    /// (e.g., a `Channel`).
    pub fn from_service(service: S, dialect: ReflectDialect) -> Self {
        Self::new(GrpcReflectionConnector::new(service), dialect)
    }
}

impl<C: ReflectionConnector> ReflectionResolver<C> {
    pub fn new(connector: C, dialect: ReflectDialect) -> Self {
        Self {
            state: Mutex::new(ResolverState {
                transport: ReflectionTransport::new(connector, dialect),
                cache: DescriptorCache::new(),
                fetched_imports: HashMap::new(),
                unavailable_imports: HashMap::new(),
            }),
        }
    }

    /// Resolves any named schema element (message, enum, service, extension).
    ///
    /// # Returns
    ///
    /// * `Ok(Descriptor)` - The resolved descriptor.
    /// * `Err(ResolveError::DescriptorNotFound)` - The server does not know the symbol.
    pub async fn find_descriptor_by_name(&self, full_name: &str) -> Result<Descriptor, ResolveError> {
        let mut state = self.state.lock().await;

        if let Some(descriptor) = state.cache.find_descriptor(full_name) {
            return Ok(descriptor);
        }

        debug!(symbol = full_name, "descriptor cache miss");

        let files = state
            .fetch(ReflectionQuery::FileContainingSymbol(full_name.to_string()))
            .await
            .map_err(|err| match err {
                ResolveError::Protocol(remote) if remote.code == Code::NotFound => {
                    ResolveError::DescriptorNotFound {
                        symbol: full_name.to_string(),
                        remote: Some(remote),
                    }
                }
                err => err,
            })?;

        state.register(full_name, files).await?;

        state
            .cache
            .find_descriptor(full_name)
            .ok_or_else(|| ResolveError::DescriptorNotFound {
                symbol: full_name.to_string(),
                remote: None,
            })
    }

    /// Resolves a message type. The returned descriptor is the message factory:
    /// `prost_reflect::DynamicMessage::new(descriptor)` builds instances.
    pub async fn find_message_by_name(&self, full_name: &str) -> Result<MessageDescriptor, ResolveError> {
        match self.find_descriptor_by_name(full_name).await? {
            Descriptor::MessageDescriptor(message) => Ok(message),
            other => Err(ResolveError::WrongKind {
                name: full_name.to_string(),
                expected: "message",
                actual: other.kind(),
            }),
        }
    }

    /// Resolves the message named by a type URL such as `type.googleapis.com/foo.Bar`.
    pub async fn find_message_by_url(&self, url: &str) -> Result<MessageDescriptor, ResolveError> {
        let full_name = url.rsplit_once('/').map_or(url, |(_, name)| name);
        self.find_message_by_name(full_name).await
    }

    /// Resolves extension `number` of the message `message`.
    pub async fn find_extension_by_number(
        &self,
        message: &str,
        number: u32,
    ) -> Result<ExtensionDescriptor, ResolveError> {
        let not_found = |remote| ResolveError::ExtensionNotFound {
            message: message.to_string(),
            number,
            remote,
        };

        let mut state = self.state.lock().await;

        if let Some(extension) = state.cache.find_extension(message, number) {
            return Ok(extension);
        }

        let Ok(extension_number) = i32::try_from(number) else {
            return Err(not_found(None));
        };

        debug!(message, number, "extension cache miss");

        let files = state
            .fetch(ReflectionQuery::FileContainingExtension {
                containing_type: message.to_string(),
                extension_number,
            })
            .await
            .map_err(|err| match err {
                ResolveError::Protocol(remote) if remote.code == Code::NotFound => {
                    not_found(Some(remote))
                }
                err => err,
            })?;

        state.register(&format!("{message}({number})"), files).await?;

        state
            .cache
            .find_extension(message, number)
            .ok_or_else(|| not_found(None))
    }

    /// Lists the services the server advertises. Never cached.
    pub async fn list_services(&self) -> Result<Vec<String>, ResolveError> {
        let mut state = self.state.lock().await;

        match state.transport.send(ReflectionQuery::ListServices).await {
            Ok(ReflectionReply::Services(services)) => Ok(services),
            Ok(ReflectionReply::Error { code, message }) => Err(ProtocolError { code, message }.into()),
            Ok(ReflectionReply::FileDescriptors(_)) => Err(ReflectionError::UnexpectedResponse(
                "FileDescriptorResponse".into(),
            )
            .into()),
            Err(ReflectionError::Status(status)) => Err(ProtocolError::from(status).into()),
            Err(err) => Err(err.into()),
        }
    }

    /// A snapshot of every file resolved so far.
    pub async fn file_descriptor_set(&self) -> FileDescriptorSet {
        self.state.lock().await.cache.file_descriptor_set()
    }

    /// The dialect in use, once negotiated.
    pub async fn dialect(&self) -> ReflectDialect {
        self.state.lock().await.transport.dialect()
    }

    /// Drops the reflection stream; the next lookup opens a new one.
    ///
    /// Cached descriptors are kept. Imports that never made it into the cache may be
    /// requested again.
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;

        state.transport.reset();
        state.fetched_imports.clear();
        state.unavailable_imports.clear();
    }

    /// Closes the reflection stream for good.
    pub async fn close(&self) {
        self.state.lock().await.transport.close();
    }
}

impl<C: ReflectionConnector> ResolverState<C> {
    /// Sends a file-returning query. Remote errors, in-band or as a stream status, come
    /// back as [`ResolveError::Protocol`] for the caller to refine.
    async fn fetch(&mut self, query: ReflectionQuery) -> Result<Vec<Vec<u8>>, ResolveError> {
        match self.transport.send(query).await {
            Ok(ReflectionReply::FileDescriptors(files)) => Ok(files),
            Ok(ReflectionReply::Error { code, message }) => Err(ProtocolError { code, message }.into()),
            Ok(ReflectionReply::Services(_)) => Err(ReflectionError::UnexpectedResponse(
                "ListServiceResponse".into(),
            )
            .into()),
            Err(ReflectionError::Status(status)) => Err(ProtocolError::from(status).into()),
            Err(err) => Err(err.into()),
        }
    }

    /// Completes the batch with any missing imports and links it into the cache.
    async fn register(&mut self, target: &str, raw_files: Vec<Vec<u8>>) -> Result<(), ResolveError> {
        let malformed = |reason: MalformedReason| ResolveError::MalformedDescriptor {
            target: target.to_string(),
            reason,
        };

        let mut batch = decode_files(raw_files).map_err(|e| malformed(e.into()))?;

        loop {
            let missing = self.cache.missing_dependencies(&batch);
            if missing.is_empty() {
                break;
            }

            for (file, dependency) in missing {
                if batch.iter().any(|fd| fd.name() == dependency) {
                    continue;
                }

                if let Some(fd) = self.fetched_imports.get(&dependency) {
                    batch.push(fd.clone());
                    continue;
                }

                if let Some(remote) = self.unavailable_imports.get(&dependency) {
                    return Err(malformed(MalformedReason::DependencyUnavailable {
                        file,
                        dependency,
                        remote: Some(remote.clone()),
                    }));
                }

                debug!(%dependency, "fetching missing import");

                match self
                    .fetch(ReflectionQuery::FileByFilename(dependency.clone()))
                    .await
                {
                    Ok(raw) => {
                        for fd in decode_files(raw).map_err(|e| malformed(e.into()))? {
                            self.fetched_imports
                                .insert(fd.name().to_string(), fd.clone());
                            batch.push(fd);
                        }

                        if !batch.iter().any(|fd| fd.name() == dependency) {
                            return Err(malformed(MalformedReason::DependencyUnavailable {
                                file,
                                dependency,
                                remote: None,
                            }));
                        }
                    }
                    Err(ResolveError::Protocol(remote)) if remote.code == Code::NotFound => {
                        self.unavailable_imports
                            .insert(dependency.clone(), remote.clone());
                        return Err(malformed(MalformedReason::DependencyUnavailable {
                            file,
                            dependency,
                            remote: Some(remote),
                        }));
                    }
                    // Nothing is remembered, a later lookup asks again.
                    Err(err) => return Err(err),
                }
            }
        }

        let added = self
            .cache
            .insert_batch(batch)
            .map_err(|e| malformed(e.into()))?;

        let cache = &self.cache;
        self.fetched_imports
            .retain(|name, _| !cache.contains_file(name));

        debug!(target, added, "registered file descriptors");

        Ok(())
    }
}

fn decode_files(raw_files: Vec<Vec<u8>>) -> Result<Vec<FileDescriptorProto>, prost::DecodeError> {
    raw_files
        .iter()
        .map(|raw| FileDescriptorProto::decode(raw.as_slice()))
        .collect()
}
