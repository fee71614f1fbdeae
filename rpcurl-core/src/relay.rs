//! # Browser Relay
//!
//! Browsers can only send "simple" cross-origin requests without a CORS preflight: `POST`
//! with a `text/plain` body and no custom headers. The relay accepts exactly that shape.
//! The body is a base64 encoded [`RequestEnvelope`] naming the real target, its headers and
//! the already encoded RPC body. The relay replays it upstream over HTTP/2 (TLS for `https`,
//! prior-knowledge cleartext for `http`) and answers with a base64 [`ResponseEnvelope`].
//!
//! Header policy is a trust boundary: envelope headers come from an untrusted page.
//! * `disallowed` names are refused outright.
//! * `forward` entries copy values from the inbound HTTP request (set by something trusted,
//!   like a reverse proxy doing authentication) over whatever the envelope said.
mod envelope;
mod handler;
mod policy;
mod upstream;

pub use envelope::{Header, RequestEnvelope, ResponseEnvelope, decode_base64, encode_base64};
pub use handler::{RelayHandler, RelaySetupError};
pub use policy::HeaderPolicySet;
pub use upstream::{HyperUpstream, Upstream, UpstreamResponse};

use crate::BoxError;
use http::StatusCode;

/// Everything that can go wrong with a relayed request. Each variant maps to one status.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("method not allowed")]
    MethodNotAllowed,

    #[error("unsupported media type")]
    UnsupportedMediaType,

    #[error("request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error("incomplete request body: {0}")]
    IncompleteBody(#[source] BoxError),

    #[error("invalid base64 body: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    #[error("invalid envelope: {0}")]
    InvalidEnvelope(#[from] prost::DecodeError),

    #[error("header '{0}' is not allowed")]
    DisallowedHeader(String),

    #[error("invalid header '{name}': {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("invalid target '{target}': {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("upstream request failed: {0}")]
    Upstream(#[source] BoxError),
}

impl RelayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            RelayError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            RelayError::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            RelayError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            RelayError::IncompleteBody(_)
            | RelayError::InvalidBase64(_)
            | RelayError::InvalidEnvelope(_)
            | RelayError::DisallowedHeader(_)
            | RelayError::InvalidHeader { .. }
            | RelayError::InvalidTarget { .. } => StatusCode::BAD_REQUEST,
            RelayError::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Method and media type rejections carry no body.
    pub fn has_body(&self) -> bool {
        !matches!(
            self,
            RelayError::MethodNotAllowed | RelayError::UnsupportedMediaType
        )
    }
}
