//! # rpcurl CLI Entry Point
//!
//! The main executable for the rpcurl tool. This file drives the application lifecycle:
//!
//! 1. **Initialization**: Parses command-line arguments using [`cli::Cli`] and installs logging.
//! 2. **Connection**: Connects to the target server through `rpcurl_core`.
//! 3. **Execution**: Resolves and calls methods through an `RpcClient`, or serves the relay.
//! 4. **Presentation**: Prints the resulting data or error status to standard output/error.
mod cli;
mod formatter;
mod server;

use anyhow::Context;
use clap::Parser;
use cli::{Cli, Commands, ConnectArgs};
use formatter::{FormattedString, GenericError, ServiceList};
use rpcurl_core::client::{DynamicRequest, DynamicResponse, RpcClient};
use rpcurl_core::printer::TracingPrinter;
use std::process;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let args = Cli::parse();

    if let Err(err) = init_logging(args.verbose) {
        eprintln!("Failed to initialize logging: {err}");
        process::exit(1);
    }

    if let Err(err) = run(args.command).await {
        eprintln!("{}", FormattedString::from(GenericError("Error:", format!("{err:#}"))));
        process::exit(1);
    }
}

/// `RUST_LOG` wins; otherwise `info`, raised to `debug`/`trace` by `-v`/`-vv`.
fn init_logging(verbose: u8) -> anyhow::Result<()> {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let filter = match std::env::var("RUST_LOG") {
        Ok(directives) => EnvFilter::try_new(&directives)
            .with_context(|| format!("Invalid log filter '{directives}'"))?,
        Err(_) => EnvFilter::new(format!("rpcurl={level},rpcurl_core={level},warn")),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbose > 0)
        .compact()
        .init();

    Ok(())
}

async fn run(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Call {
            url,
            endpoint: (service, method),
            body,
            headers,
            connect,
        } => {
            let client = connect_client(&url, &connect).await?;
            let request = DynamicRequest {
                body,
                headers,
                service,
                method,
            };

            match client.call(request).await? {
                DynamicResponse::Unary(Ok(message)) => println!("{}", FormattedString::from(message)),
                DynamicResponse::Unary(Err(status)) | DynamicResponse::Streaming(Err(status)) => {
                    println!("{}", FormattedString::from(status))
                }
                DynamicResponse::Streaming(Ok(messages)) => {
                    for message in messages {
                        match message {
                            Ok(message) => println!("{}", FormattedString::from(message)),
                            Err(status) => println!("{}", FormattedString::from(status)),
                        }
                    }
                }
            }
        }
        Commands::List { url, connect } => {
            let client = connect_client(&url, &connect).await?;
            let services = client
                .list_services()
                .await
                .context("Failed to list services")?;
            println!("{}", FormattedString::from(ServiceList(services)));
        }
        Commands::Describe {
            url,
            symbol,
            connect,
        } => {
            let client = connect_client(&url, &connect).await?;
            let descriptor = client
                .describe(&symbol)
                .await
                .with_context(|| format!("Failed to describe '{symbol}'"))?;
            println!("{}", FormattedString::from(descriptor));
        }
        Commands::Relay(args) => {
            let config = args.into_config().context("Invalid relay configuration")?;
            server::serve(config).await?;
        }
    }

    Ok(())
}

async fn connect_client(url: &str, connect: &ConnectArgs) -> anyhow::Result<RpcClient> {
    RpcClient::connect(
        url,
        &connect.connect_headers(),
        &connect.client_options(),
        Arc::new(TracingPrinter),
    )
    .await
    .with_context(|| format!("Connection to '{url}' failed"))
}
