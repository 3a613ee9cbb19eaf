//! The request-handling pipeline.
//!
//! A connection is read by [`HttpServer`], its URI decided into an
//! [`Outcome`] by [`RequestHandler`], the outcome turned into a response by
//! [`response::build`], and the exchange recorded by [`AccessLogger`].

pub mod access_log;
pub mod response;
pub mod tls;
mod config;
mod error;
mod handler;
mod http_server;

// Re-export public items
pub use access_log::{AccessLogger, LogEntry};
pub use response::{Body, ResponseDescriptor, StatusCode};
pub use config::ServerConfig;
pub use error::Error;
pub use handler::{
    IncomingRequest, Outcome, RequestHandler, ServedFile, ServedRoot,
    LISTING_DISABLED, TRAVERSAL_REJECTED,
};
pub use http_server::{ConnectionLimits, HttpServer, ServerState, ShutdownHandle};
pub use tls::CertificateError;
