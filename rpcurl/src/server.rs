//! Serves a [`RelayHandler`] over HTTP/1.1 and HTTP/2 until Ctrl-C.
use anyhow::Context;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder;
use rpcurl_core::config::RelayConfig;
use rpcurl_core::printer::TracingPrinter;
use rpcurl_core::relay::RelayHandler;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

pub async fn serve(config: RelayConfig) -> anyhow::Result<()> {
    let handler = Arc::new(
        RelayHandler::new(&config, Arc::new(TracingPrinter))
            .context("Failed to set up the relay")?,
    );

    let listener = TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("Failed to listen on {}", config.listen))?;

    info!(
        listen = %config.listen,
        max_body_bytes = config.max_body_bytes,
        disallowed = config.disallowed_headers.len(),
        forwarded = config.forward_headers.len(),
        "relay listening"
    );

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        let (stream, peer) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(err) => {
                    warn!(error = %err, "failed to accept connection");
                    continue;
                }
            },
            _ = &mut shutdown => {
                info!("shutting down");
                return Ok(());
            }
        };

        let handler = handler.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<Incoming>| {
                let handler = handler.clone();
                async move { Ok::<_, Infallible>(handler.handle(req).await) }
            });

            if let Err(err) = Builder::new(TokioExecutor::new())
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                debug!(%peer, error = %err, "connection closed with error");
            }
        });
    }
}
