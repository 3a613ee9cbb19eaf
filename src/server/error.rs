//! Error types for the HTTP server.

use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

use crate::parser::Error as ParserError;
use crate::server::tls::CertificateError;

/// Errors that can occur while starting or running the server.
///
/// Per-request failures never show up here: they are decided into an
/// [`Outcome`](crate::server::Outcome) and answered with a status code.
/// What remains are startup failures and transport errors on a single
/// connection.
#[derive(Debug, Error)]
pub enum Error {
    /// Error parsing an HTTP request head.
    #[error("Parse error: {0}")]
    ParseError(#[from] ParserError),

    /// I/O error on a connection.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// The listening socket could not be bound.
    #[error("Failed to listen on {addr}, the port may be in use: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The served root is missing or is not a directory.
    #[error("Served root {} is not an accessible directory", .0.display())]
    InvalidRoot(PathBuf),

    /// The TLS certificate store could not be loaded.
    #[error(transparent)]
    Certificate(#[from] CertificateError),

    /// The client did not finish its request head in time.
    #[error("Timed out waiting for the request head")]
    ReadTimeout,

    /// The client did not take the response in time.
    #[error("Timed out writing the response")]
    WriteTimeout,

    /// The request head exceeded the read buffer.
    #[error("Request head larger than {0} bytes")]
    HeadTooLarge(usize),
}
