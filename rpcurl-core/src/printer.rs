//! # Diagnostic Printer
//!
//! Verbose diagnostics (TLS handshakes, dialect negotiation) are written to a [`Printer`].
//! The sink is fire-and-forget: printing never fails and never blocks on I/O the caller
//! has to care about.
use std::fmt;

/// A sink for verbose diagnostic output.
pub trait Printer: Send + Sync {
    fn print(&self, args: fmt::Arguments<'_>);
}

/// Forwards every line to `tracing` at debug level, under the `rpcurl::verbose` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingPrinter;

impl Printer for TracingPrinter {
    fn print(&self, args: fmt::Arguments<'_>) {
        tracing::debug!(target: "rpcurl::verbose", "{}", args);
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPrinter;

impl Printer for NoopPrinter {
    fn print(&self, _args: fmt::Arguments<'_>) {}
}
