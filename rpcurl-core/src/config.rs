//! # Configuration
//!
//! Serde models for everything a caller can configure: the relay, the TLS materials used
//! towards upstream servers, and reflection preferences. Every field has a default, so an
//! empty JSON object is a valid configuration.
use crate::reflection::ReflectDialect;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Largest accepted relay request body, counted on the base64 text.
pub const DEFAULT_MAX_BODY_BYTES: usize = 5 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Client side TLS materials.
///
/// With no paths set the platform trust store is used and no client certificate is sent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct TlsOptions {
    /// PEM private key for client authentication. Requires `cert`.
    pub key: Option<PathBuf>,
    /// PEM certificate chain for client authentication. Requires `key`.
    pub cert: Option<PathBuf>,
    /// PEM bundle of trusted roots, replacing the platform trust store.
    pub ca: Option<PathBuf>,
    /// Overrides the name sent in SNI and checked against the server certificate.
    pub server_name: Option<String>,
    /// Skips certificate verification. Handshake signatures are still checked.
    pub insecure: bool,
}

impl TlsOptions {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match (&self.key, &self.cert) {
            (Some(_), None) => Err(ConfigError::Invalid(
                "a TLS client key was given without a certificate".into(),
            )),
            (None, Some(_)) => Err(ConfigError::Invalid(
                "a TLS client certificate was given without a key".into(),
            )),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResolverOptions {
    /// `auto`, `v1` or `v1alpha`.
    pub dialect: ReflectDialect,
}

/// Options for [`RpcClient`](crate::client::RpcClient).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientOptions {
    pub reflection: ResolverOptions,
    pub tls: TlsOptions,
}

/// Copies the values of inbound header `from` onto the upstream request as `to`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ForwardHeader {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RelayConfig {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    /// Header names an envelope may not carry.
    #[serde(default)]
    pub disallowed_headers: Vec<String>,
    /// Applied in order, after the envelope headers.
    #[serde(default)]
    pub forward_headers: Vec<ForwardHeader>,
    /// Value of `Access-Control-Allow-Origin` on every relay response.
    #[serde(default)]
    pub allowed_origin: Option<String>,
    #[serde(default)]
    pub tls: TlsOptions,
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_max_body_bytes() -> usize {
    DEFAULT_MAX_BODY_BYTES
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            max_body_bytes: default_max_body_bytes(),
            disallowed_headers: Vec::new(),
            forward_headers: Vec::new(),
            allowed_origin: None,
            tls: TlsOptions::default(),
        }
    }
}

impl RelayConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config: RelayConfig =
            serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_body_bytes == 0 {
            return Err(ConfigError::Invalid("max_body_bytes must be positive".into()));
        }

        self.tls.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_object_yields_defaults() {
        let config: RelayConfig = serde_json::from_str("{}").unwrap();

        assert_eq!(config, RelayConfig::default());
        assert_eq!(config.max_body_bytes, 5 * 1024 * 1024);
        assert_eq!(config.listen.to_string(), "127.0.0.1:8080");
    }

    #[test]
    fn full_relay_config_parses() {
        let config: RelayConfig = serde_json::from_str(
            r#"{
                "listen": "0.0.0.0:9000",
                "max_body_bytes": 1024,
                "disallowed_headers": ["Cookie"],
                "forward_headers": [{ "from": "x-session", "to": "authorization" }],
                "allowed_origin": "https://app.example.com",
                "tls": { "ca": "/etc/ca.pem", "insecure": true }
            }"#,
        )
        .unwrap();

        assert_eq!(config.max_body_bytes, 1024);
        assert_eq!(config.disallowed_headers, vec!["Cookie"]);
        assert_eq!(config.forward_headers[0].to, "authorization");
        assert_eq!(config.tls.ca.as_deref(), Some(Path::new("/etc/ca.pem")));
        assert!(config.tls.insecure);
    }

    #[test]
    fn unknown_fields_and_dialects_are_rejected() {
        assert!(serde_json::from_str::<RelayConfig>(r#"{ "max_body": 1 }"#).is_err());
        assert!(
            serde_json::from_str::<ClientOptions>(r#"{ "reflection": { "dialect": "v3" } }"#)
                .is_err()
        );
    }

    #[test]
    fn key_and_cert_go_together() {
        let tls = TlsOptions {
            key: Some("client.key".into()),
            ..Default::default()
        };

        assert!(matches!(tls.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn loads_and_validates_files() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "max_body_bytes": 0 }}"#).unwrap();

        assert!(matches!(
            RelayConfig::from_file(file.path()),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            RelayConfig::from_file(Path::new("/definitely/not/here.json")),
            Err(ConfigError::Read { .. })
        ));
    }
}
