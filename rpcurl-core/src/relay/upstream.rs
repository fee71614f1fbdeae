use crate::{
    BoxError,
    config::TlsOptions,
    printer::Printer,
    tls::{LoggingConnector, TlsConfigError, build_https_connector},
};
use bytes::Bytes;
use http::{HeaderMap, Request, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper_util::{client::legacy::Client, rt::TokioExecutor};
use std::{future::Future, sync::Arc};

/// A fully read upstream answer.
#[derive(Debug, Clone, Default)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub trailers: HeaderMap,
}

/// Sends relayed requests to their target.
pub trait Upstream: Send + Sync + 'static {
    fn send(
        &self,
        request: Request<Full<Bytes>>,
    ) -> impl Future<Output = Result<UpstreamResponse, BoxError>> + Send;
}

/// HTTP/2 client: TLS for `https` targets, prior knowledge cleartext for `http`.
#[derive(Debug, Clone)]
pub struct HyperUpstream {
    client: Client<LoggingConnector, Full<Bytes>>,
}

impl HyperUpstream {
    pub fn new(tls: &TlsOptions, printer: Arc<dyn Printer>) -> Result<Self, TlsConfigError> {
        let connector = build_https_connector(tls, printer)?;

        let client = Client::builder(TokioExecutor::new())
            .http2_only(true)
            .build(connector);

        Ok(Self { client })
    }
}

impl Upstream for HyperUpstream {
    async fn send(&self, request: Request<Full<Bytes>>) -> Result<UpstreamResponse, BoxError> {
        let response = self.client.request(request).await?;
        let (parts, body) = response.into_parts();

        let collected = body.collect().await?;
        let trailers = collected.trailers().cloned().unwrap_or_default();

        Ok(UpstreamResponse {
            status: parts.status,
            headers: parts.headers,
            body: collected.to_bytes(),
            trailers,
        })
    }
}
