//! Errors reported while reading a request head.

use thiserror::Error;

/// Why a request head was rejected. Every variant is answered with 400.
#[derive(Debug, Error)]
pub enum Error {
    /// Nothing but blank lines before the end of the head.
    #[error("Empty request")]
    EmptyRequest,

    /// The request line is not UTF-8 or does not have three parts.
    #[error("Malformed request line: {0}")]
    MalformedRequestLine(String),

    #[error("Unsupported method: {0}")]
    InvalidMethod(String),

    /// Only origin-form targets (`/path?query`) are served.
    #[error("Unsupported request target: {0}")]
    InvalidTarget(String),

    /// The path does not percent-decode to UTF-8.
    #[error("Invalid path encoding: {0}")]
    InvalidEncoding(String),

    #[error("Unsupported HTTP version: {0}")]
    InvalidVersion(String),

    /// A header line without a colon.
    #[error("Invalid header line")]
    InvalidHeaderFormat,

    #[error("Missing {0} header")]
    MissingHeader(String),
}
