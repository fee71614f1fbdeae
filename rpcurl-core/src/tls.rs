//! # TLS Materials
//!
//! Builds the `rustls` client configuration used for every TLS connection `rpcurl` opens,
//! whether it calls a server directly or relays to one.
//!
//! * Trust comes from a PEM CA bundle when one is configured, otherwise from the
//!   platform trust store.
//! * A client key and certificate chain are loaded when both are configured.
//! * The certificate verifier is always wrapped in a [`LoggingVerifier`], which reports
//!   every verification step to a [`Printer`]. In `insecure` mode it skips the certificate
//!   checks but still verifies handshake signatures.
//! * Connections are made through a [`LoggingConnector`], which reports the negotiated
//!   protocol version and cipher suite once a handshake completes.
use crate::{
    BoxError,
    config::{ConfigError, TlsOptions},
    printer::Printer,
};
use http::Uri;
use hyper_rustls::{FixedServerNameResolver, HttpsConnector, HttpsConnectorBuilder, MaybeHttpsStream};
use hyper_util::{client::legacy::connect::HttpConnector, rt::TokioIo};
use rustls::{
    ClientConfig, ClientConnection, DigitallySignedStruct, RootCertStore, SignatureScheme,
    client::{
        VerifierBuilderError, WebPkiServerVerifier,
        danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    },
    crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature},
    pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime},
};
use std::{
    fmt,
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
    sync::Arc,
    task::{Context, Poll},
};
use tokio::net::TcpStream;
use tonic::codegen::{BoxFuture, Service};

#[derive(Debug, thiserror::Error)]
pub enum TlsConfigError {
    #[error("Failed to load '{}': {reason}", path.display())]
    CertificateLoad { path: PathBuf, reason: String },

    #[error("Invalid TLS options: {0}")]
    Options(#[from] ConfigError),

    #[error("Invalid TLS server name '{0}'")]
    ServerName(String),

    #[error("TLS configuration rejected: {0}")]
    Rustls(#[from] rustls::Error),

    #[error("Failed to build the certificate verifier: {0}")]
    Verifier(#[from] VerifierBuilderError),
}

/// Builds a client configuration from `options`. Diagnostics go to `printer`.
pub fn build_client_tls_config(
    options: &TlsOptions,
    printer: Arc<dyn Printer>,
) -> Result<ClientConfig, TlsConfigError> {
    options.validate()?;

    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());

    // A configured bundle must load even when it ends up unused.
    let ca_roots = options.ca.as_deref().map(load_root_store).transpose()?;

    let verifier = if options.insecure {
        printer.print(format_args!(
            "TLS certificate verification is disabled (insecure mode)"
        ));
        if let Some(path) = &options.ca {
            printer.print(format_args!(
                "CA bundle '{}' is ignored in insecure mode",
                path.display()
            ));
        }
        LoggingVerifier::insecure(provider.clone(), printer)
    } else {
        let roots = match ca_roots {
            Some(roots) => roots,
            None => native_root_store(printer.as_ref()),
        };

        let webpki = WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider.clone())
            .build()?;

        LoggingVerifier::verified(webpki, provider.clone(), printer)
    };

    let builder = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier));

    let config = match (&options.key, &options.cert) {
        (Some(key), Some(cert)) => {
            builder.with_client_auth_cert(load_certs(cert)?, load_private_key(key)?)?
        }
        _ => builder.with_no_client_auth(),
    };

    Ok(config)
}

/// An HTTP/2 connector for `https` (and cleartext `http`) URIs using `config`.
///
/// When `server_name` is set it replaces the host of every URI for SNI and certificate
/// name checks.
pub fn https_connector(
    config: ClientConfig,
    server_name: Option<&str>,
    printer: Arc<dyn Printer>,
) -> Result<LoggingConnector, TlsConfigError> {
    let builder = HttpsConnectorBuilder::new()
        .with_tls_config(config)
        .https_or_http();

    let builder = match server_name {
        Some(name) => {
            let name = ServerName::try_from(name.to_string())
                .map_err(|_| TlsConfigError::ServerName(name.to_string()))?;
            builder.with_server_name_resolver(FixedServerNameResolver::new(name))
        }
        None => builder,
    };

    Ok(LoggingConnector {
        inner: builder.enable_http2().build(),
        printer,
    })
}

/// [`build_client_tls_config`] followed by [`https_connector`].
pub fn build_https_connector(
    options: &TlsOptions,
    printer: Arc<dyn Printer>,
) -> Result<LoggingConnector, TlsConfigError> {
    let config = build_client_tls_config(options, printer.clone())?;
    https_connector(config, options.server_name.as_deref(), printer)
}

/// A connection made by a [`LoggingConnector`].
pub type Connection = MaybeHttpsStream<TokioIo<TcpStream>>;

/// An [`HttpsConnector`] that reports the parameters of every TLS session it sets up.
#[derive(Clone)]
pub struct LoggingConnector {
    inner: HttpsConnector<HttpConnector>,
    printer: Arc<dyn Printer>,
}

impl fmt::Debug for LoggingConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoggingConnector").finish_non_exhaustive()
    }
}

impl Service<Uri> for LoggingConnector {
    type Response = Connection;
    type Error = BoxError;
    type Future = BoxFuture<Connection, BoxError>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), BoxError>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, uri: Uri) -> Self::Future {
        let connecting = self.inner.call(uri);
        let printer = self.printer.clone();

        Box::pin(async move {
            let connection = connecting.await?;
            if let MaybeHttpsStream::Https(tls) = &connection {
                report_session(tls.inner().get_ref().1, printer.as_ref());
            }
            Ok(connection)
        })
    }
}

fn report_session(session: &ClientConnection, printer: &dyn Printer) {
    let version = session
        .protocol_version()
        .map_or_else(|| "unknown version".to_string(), |v| format!("{v:?}"));

    match session.negotiated_cipher_suite() {
        Some(suite) => printer.print(format_args!(
            "TLS session established: {version}, cipher suite {:?}",
            suite.suite()
        )),
        None => printer.print(format_args!(
            "TLS session established: {version}, no cipher suite negotiated"
        )),
    }

    if let Some(alpn) = session.alpn_protocol() {
        printer.print(format_args!(
            "ALPN protocol: {}",
            String::from_utf8_lossy(alpn)
        ));
    }
}

fn open(path: &Path) -> Result<BufReader<File>, TlsConfigError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| TlsConfigError::CertificateLoad {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsConfigError> {
    let load_error = |reason: String| TlsConfigError::CertificateLoad {
        path: path.to_path_buf(),
        reason,
    };

    let certs = rustls_pemfile::certs(&mut open(path)?)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| load_error(format!("invalid PEM: {e}")))?;

    if certs.is_empty() {
        return Err(load_error("no certificates found".into()));
    }

    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsConfigError> {
    let load_error = |reason: String| TlsConfigError::CertificateLoad {
        path: path.to_path_buf(),
        reason,
    };

    rustls_pemfile::private_key(&mut open(path)?)
        .map_err(|e| load_error(format!("invalid PEM: {e}")))?
        .ok_or_else(|| load_error("no private key found".into()))
}

fn load_root_store(path: &Path) -> Result<RootCertStore, TlsConfigError> {
    let mut roots = RootCertStore::empty();

    for cert in load_certs(path)? {
        roots.add(cert).map_err(|e| TlsConfigError::CertificateLoad {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    }

    Ok(roots)
}

fn native_root_store(printer: &dyn Printer) -> RootCertStore {
    let native = rustls_native_certs::load_native_certs();

    for err in &native.errors {
        printer.print(format_args!("failed to load a platform root certificate: {err}"));
    }

    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(native.certs);
    printer.print(format_args!(
        "loaded {added} platform root certificates ({ignored} ignored)"
    ));

    roots
}

/// Wraps certificate verification and reports each step to a [`Printer`].
pub struct LoggingVerifier {
    /// `None` skips certificate verification.
    inner: Option<Arc<WebPkiServerVerifier>>,
    provider: Arc<CryptoProvider>,
    printer: Arc<dyn Printer>,
}

impl LoggingVerifier {
    pub fn verified(
        inner: Arc<WebPkiServerVerifier>,
        provider: Arc<CryptoProvider>,
        printer: Arc<dyn Printer>,
    ) -> Self {
        Self {
            inner: Some(inner),
            provider,
            printer,
        }
    }

    pub fn insecure(provider: Arc<CryptoProvider>, printer: Arc<dyn Printer>) -> Self {
        Self {
            inner: None,
            provider,
            printer,
        }
    }

    fn report_signature(
        &self,
        version: &str,
        scheme: SignatureScheme,
        result: &Result<HandshakeSignatureValid, rustls::Error>,
    ) {
        match result {
            Ok(_) => self.printer.print(format_args!(
                "{version} handshake signature verified ({scheme:?})"
            )),
            Err(e) => self.printer.print(format_args!(
                "{version} handshake signature rejected ({scheme:?}): {e}"
            )),
        }
    }
}

impl fmt::Debug for LoggingVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoggingVerifier")
            .field("insecure", &self.inner.is_none())
            .finish_non_exhaustive()
    }
}

impl ServerCertVerifier for LoggingVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        self.printer.print(format_args!(
            "server '{}' presented a chain of {} certificate(s)",
            server_name.to_str(),
            intermediates.len() + 1
        ));

        let Some(inner) = &self.inner else {
            self.printer
                .print(format_args!("certificate verification skipped"));
            return Ok(ServerCertVerified::assertion());
        };

        let result =
            inner.verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now);

        match &result {
            Ok(_) => self.printer.print(format_args!("certificate verified")),
            Err(e) => self
                .printer
                .print(format_args!("certificate verification failed: {e}")),
        }

        result
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        let result = verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        );
        self.report_signature("TLS 1.2", dss.scheme, &result);
        result
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        let result = verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        );
        self.report_signature("TLS 1.3", dss.scheme, &result);
        result
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
