//! # CLI
//!
//! This module defines the command-line interface of `rpcurl` using `clap`.
//!
//! It is responsible for parsing user input and performing validation (e.g., ensuring headers
//! are `key:value`). Flags given on the command line override values loaded from a config file.
use clap::{Args, Parser, Subcommand};
use rpcurl_core::client::DynamicRequest;
use rpcurl_core::config::{ClientOptions, ForwardHeader, RelayConfig, TlsOptions};
use rpcurl_core::reflection::ReflectDialect;
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rpcurl", version, about = "curl for RPC")]
pub struct Cli {
    /// Increase log verbosity (-v for debug, -vv for trace). `RUST_LOG` takes precedence.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Perform a gRPC call to a server
    ///
    /// The method is resolved through server reflection and the JSON body is converted to
    /// its input type.
    ///
    /// ## Examples:
    ///
    /// ```bash
    /// rpcurl call http://localhost:50051 my.pkg.Service/Method --body '{"key": "value"}'
    /// ```
    Call {
        /// The server URL to connect to (e.g. http://localhost:50051)
        url: String,
        /// Endpoint (package.Service/Method)
        #[arg(value_parser = parse_endpoint)]
        endpoint: (String, String),
        /// JSON body (Object for Unary, Array for Streaming)
        #[arg(long, value_parser = parse_body, default_value = "{}")]
        body: serde_json::Value,
        /// Request metadata, repeatable (e.g. -H 'authorization: Bearer x')
        #[arg(short = 'H', long = "header", value_parser = parse_header)]
        headers: Vec<(String, String)>,
        #[command(flatten)]
        connect: ConnectArgs,
    },

    /// List the services a server exposes through reflection
    List {
        /// The server URL to connect to (e.g. http://localhost:50051)
        url: String,
        #[command(flatten)]
        connect: ConnectArgs,
    },

    /// Describe a service, message, enum or extension
    Describe {
        /// The server URL to connect to (e.g. http://localhost:50051)
        url: String,
        /// Fully qualified symbol (e.g. my.package.Service)
        symbol: String,
        #[command(flatten)]
        connect: ConnectArgs,
    },

    /// Serve the browser relay
    ///
    /// Accepts base64 envelopes posted as `text/plain` and replays them upstream over
    /// HTTP/2.
    Relay(RelayArgs),
}

#[derive(Args)]
pub struct ConnectArgs {
    /// Reflection protocol: auto, v1 or v1alpha
    #[arg(long, value_parser = parse_dialect)]
    pub reflection: Option<ReflectDialect>,
    /// Host header sent as the `:authority` of the connection
    #[arg(long)]
    pub authority: Option<String>,
    #[command(flatten)]
    pub tls: TlsArgs,
}

impl ConnectArgs {
    pub fn client_options(&self) -> ClientOptions {
        let mut options = ClientOptions::default();
        if let Some(dialect) = self.reflection {
            options.reflection.dialect = dialect;
        }
        self.tls.apply(&mut options.tls);
        options
    }

    /// Headers that only shape the connection.
    pub fn connect_headers(&self) -> Vec<(String, String)> {
        self.authority
            .iter()
            .map(|authority| ("host".to_string(), authority.clone()))
            .collect()
    }
}

#[derive(Args)]
pub struct TlsArgs {
    /// PEM bundle of trusted roots (defaults to the platform trust store)
    #[arg(long)]
    pub cacert: Option<PathBuf>,
    /// PEM client certificate chain
    #[arg(long, requires = "key")]
    pub cert: Option<PathBuf>,
    /// PEM client private key
    #[arg(long, requires = "cert")]
    pub key: Option<PathBuf>,
    /// Server name used for SNI and certificate verification
    #[arg(long)]
    pub servername: Option<String>,
    /// Skip certificate verification
    #[arg(short = 'k', long)]
    pub insecure: bool,
}

impl TlsArgs {
    pub fn apply(&self, tls: &mut TlsOptions) {
        if let Some(ca) = &self.cacert {
            tls.ca = Some(ca.clone());
        }
        if let Some(cert) = &self.cert {
            tls.cert = Some(cert.clone());
        }
        if let Some(key) = &self.key {
            tls.key = Some(key.clone());
        }
        if let Some(name) = &self.servername {
            tls.server_name = Some(name.clone());
        }
        tls.insecure |= self.insecure;
    }
}

#[derive(Args)]
pub struct RelayArgs {
    /// JSON configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Address to listen on
    #[arg(long)]
    pub listen: Option<SocketAddr>,
    /// Largest accepted request body, in bytes of base64 text
    #[arg(long)]
    pub max_body_bytes: Option<usize>,
    /// Header an envelope may not carry, repeatable
    #[arg(long = "disallow-header")]
    pub disallowed_headers: Vec<String>,
    /// Copy an inbound header onto the upstream call (from=to), repeatable
    #[arg(long = "forward-header", value_parser = parse_forward)]
    pub forward_headers: Vec<ForwardHeader>,
    /// Value of Access-Control-Allow-Origin on every response
    #[arg(long)]
    pub allowed_origin: Option<String>,
    #[command(flatten)]
    pub tls: TlsArgs,
}

impl RelayArgs {
    /// Loads the config file, if any, and lays the flags over it.
    pub fn into_config(self) -> Result<RelayConfig, rpcurl_core::config::ConfigError> {
        let mut config = match &self.config {
            Some(path) => RelayConfig::from_file(path)?,
            None => RelayConfig::default(),
        };

        if let Some(listen) = self.listen {
            config.listen = listen;
        }
        if let Some(max) = self.max_body_bytes {
            config.max_body_bytes = max;
        }
        config.disallowed_headers.extend(self.disallowed_headers);
        config.forward_headers.extend(self.forward_headers);
        if self.allowed_origin.is_some() {
            config.allowed_origin = self.allowed_origin;
        }
        self.tls.apply(&mut config.tls);

        config.validate()?;
        Ok(config)
    }
}

fn parse_endpoint(value: &str) -> Result<(String, String), String> {
    DynamicRequest::split_method_path(value)
        .map(|(service, method)| (service.to_string(), method.to_string()))
        .ok_or_else(|| {
            format!("Invalid endpoint format: '{value}'. Expected 'package.Service/Method'")
        })
}

fn parse_header(s: &str) -> Result<(String, String), String> {
    s.split_once(':')
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .ok_or_else(|| "Format must be 'key:value'".to_string())
}

fn parse_body(value: &str) -> Result<serde_json::Value, String> {
    serde_json::from_str(value).map_err(|e| format!("Invalid JSON: {e}"))
}

fn parse_dialect(value: &str) -> Result<ReflectDialect, String> {
    value.parse().map_err(|e: rpcurl_core::reflection::UnknownDialectError| e.to_string())
}

fn parse_forward(value: &str) -> Result<ForwardHeader, String> {
    let (from, to) = value
        .split_once('=')
        .ok_or_else(|| "Format must be 'from=to'".to_string())?;

    if from.trim().is_empty() || to.trim().is_empty() {
        return Err("Header names cannot be empty".to_string());
    }

    Ok(ForwardHeader {
        from: from.trim().to_string(),
        to: to.trim().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_parses_endpoint_headers_and_tls_flags() {
        let cli = Cli::try_parse_from([
            "rpcurl",
            "-v",
            "call",
            "https://api.example.com",
            "demo.Shop/Place",
            "--body",
            r#"{"id": "1"}"#,
            "-H",
            "authorization: Bearer t",
            "--reflection",
            "V1Alpha",
            "--insecure",
        ])
        .unwrap();

        assert_eq!(cli.verbose, 1);
        let Commands::Call {
            endpoint,
            body,
            headers,
            connect,
            ..
        } = cli.command
        else {
            panic!("expected call");
        };

        assert_eq!(endpoint, ("demo.Shop".to_string(), "Place".to_string()));
        assert_eq!(body["id"], "1");
        assert_eq!(headers, vec![("authorization".to_string(), "Bearer t".to_string())]);

        let options = connect.client_options();
        assert_eq!(options.reflection.dialect, ReflectDialect::V1Alpha);
        assert!(options.tls.insecure);
    }

    #[test]
    fn bad_endpoints_and_dialects_are_rejected() {
        assert!(parse_endpoint("demo.Shop").is_err());
        assert!(parse_dialect("v2").is_err());
        assert!(parse_forward("authorization").is_err());
    }

    #[test]
    fn relay_flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "rpcurl",
            "relay",
            "--listen",
            "0.0.0.0:9000",
            "--disallow-header",
            "cookie",
            "--forward-header",
            "x-session=authorization",
            "--allowed-origin",
            "https://app.example.com",
        ])
        .unwrap();

        let Commands::Relay(args) = cli.command else {
            panic!("expected relay");
        };
        let config = args.into_config().unwrap();

        assert_eq!(config.listen.to_string(), "0.0.0.0:9000");
        assert_eq!(config.disallowed_headers, vec!["cookie"]);
        assert_eq!(config.forward_headers[0].from, "x-session");
        assert_eq!(config.forward_headers[0].to, "authorization");
        assert_eq!(config.allowed_origin.as_deref(), Some("https://app.example.com"));
        assert_eq!(config.max_body_bytes, rpcurl_core::config::DEFAULT_MAX_BODY_BYTES);
    }
}
