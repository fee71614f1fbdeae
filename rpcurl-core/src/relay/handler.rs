use super::{
    HeaderPolicySet, HyperUpstream, RelayError, RequestEnvelope, ResponseEnvelope, Upstream,
    decode_base64, encode_base64,
    envelope::{from_header_map, to_header_map},
};
use crate::{
    BoxError,
    config::{ConfigError, RelayConfig},
    printer::Printer,
    tls::TlsConfigError,
};
use bytes::Bytes;
use http::{
    HeaderMap, HeaderValue, Method, Request, Response, StatusCode, Uri, Version,
    header::{ACCESS_CONTROL_ALLOW_ORIGIN, CONTENT_TYPE},
};
use http_body::Body;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use prost::Message;
use std::sync::Arc;
use tracing::{info, warn};

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

#[derive(Debug, thiserror::Error)]
pub enum RelaySetupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Tls(#[from] TlsConfigError),
}

/// Serves relay requests. Holds no per-request state and can be shared freely.
#[derive(Debug)]
pub struct RelayHandler<U: Upstream = HyperUpstream> {
    policy: HeaderPolicySet,
    max_body_bytes: usize,
    allowed_origin: Option<HeaderValue>,
    upstream: U,
}

impl RelayHandler<HyperUpstream> {
    /// A relay dispatching over the shared TLS and h2c clients.
    pub fn new(config: &RelayConfig, printer: Arc<dyn Printer>) -> Result<Self, RelaySetupError> {
        config.validate()?;
        let upstream = HyperUpstream::new(&config.tls, printer)?;
        Self::with_upstream(config, upstream)
    }
}

impl<U: Upstream> RelayHandler<U> {
    pub fn with_upstream(config: &RelayConfig, upstream: U) -> Result<Self, RelaySetupError> {
        config.validate()?;

        let allowed_origin = config
            .allowed_origin
            .as_deref()
            .map(|origin| {
                HeaderValue::from_str(origin).map_err(|_| {
                    ConfigError::Invalid(format!("'{origin}' is not a valid allowed origin"))
                })
            })
            .transpose()?;

        Ok(Self {
            policy: HeaderPolicySet::from_config(config)?,
            max_body_bytes: config.max_body_bytes,
            allowed_origin,
            upstream,
        })
    }

    pub fn upstream(&self) -> &U {
        &self.upstream
    }

    /// Relays one inbound request. Failures are turned into their HTTP status.
    pub async fn handle<B>(&self, request: Request<B>) -> Response<Full<Bytes>>
    where
        B: Body + Send,
        B::Data: Send,
        B::Error: Into<BoxError>,
    {
        let mut response = match self.relay(request).await {
            Ok((target, envelope)) => {
                info!(%target, status = envelope.status, "request relayed");
                text_response(StatusCode::OK, encode_base64(&envelope.encode_to_vec()))
            }
            Err(err) => {
                let status = err.status_code();
                warn!(status = status.as_u16(), error = %err, "relay request rejected");

                if err.has_body() {
                    text_response(status, err.to_string())
                } else {
                    let mut response = Response::new(Full::default());
                    *response.status_mut() = status;
                    response
                }
            }
        };

        if let Some(origin) = &self.allowed_origin {
            response
                .headers_mut()
                .insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
        }

        response
    }

    async fn relay<B>(&self, request: Request<B>) -> Result<(Uri, ResponseEnvelope), RelayError>
    where
        B: Body + Send,
        B::Data: Send,
        B::Error: Into<BoxError>,
    {
        if request.method() != Method::POST {
            return Err(RelayError::MethodNotAllowed);
        }

        if !is_text_plain(request.headers()) {
            return Err(RelayError::UnsupportedMediaType);
        }

        let (parts, body) = request.into_parts();

        let text = Limited::new(body, self.max_body_bytes)
            .collect()
            .await
            .map_err(|e| {
                if e.downcast_ref::<LengthLimitError>().is_some() {
                    RelayError::PayloadTooLarge {
                        limit: self.max_body_bytes,
                    }
                } else {
                    RelayError::IncompleteBody(e)
                }
            })?
            .to_bytes();

        let envelope = RequestEnvelope::decode(decode_base64(&text)?.as_slice())?;

        self.policy.check(&envelope.headers)?;

        let mut headers = to_header_map(&envelope.headers)?;
        self.policy.apply_forwarding(&parts.headers, &mut headers);

        let target = parse_target(&envelope.target)?;

        let mut outbound = Request::new(Full::new(envelope.body));
        *outbound.method_mut() = Method::POST;
        *outbound.uri_mut() = target.clone();
        *outbound.version_mut() = Version::HTTP_2;
        *outbound.headers_mut() = headers;

        let response = self
            .upstream
            .send(outbound)
            .await
            .map_err(RelayError::Upstream)?;

        Ok((
            target,
            ResponseEnvelope {
                status: u32::from(response.status.as_u16()),
                headers: from_header_map(&response.headers),
                body: response.body,
                trailers: from_header_map(&response.trailers),
            },
        ))
    }
}

fn is_text_plain(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .is_some_and(|essence| essence.trim().eq_ignore_ascii_case("text/plain"))
}

fn parse_target(target: &str) -> Result<Uri, RelayError> {
    let invalid = |reason: &str| RelayError::InvalidTarget {
        target: target.to_string(),
        reason: reason.to_string(),
    };

    let uri: Uri = target.parse().map_err(|e: http::uri::InvalidUri| invalid(&e.to_string()))?;

    match uri.scheme_str() {
        Some("http" | "https") => {}
        Some(_) => return Err(invalid("scheme must be http or https")),
        None => return Err(invalid("missing scheme")),
    }

    if uri.authority().is_none() {
        return Err(invalid("missing host"));
    }

    Ok(uri)
}

fn text_response(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(TEXT_PLAIN));
    response
}
