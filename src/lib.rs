//! A minimal static file server for distributing update artifacts.
//!
//! The server exposes a single directory for download over HTTP or, when a
//! PKCS#12 certificate store is configured, over TLS. It is meant to run as
//! a long-lived background process that update clients poll for
//! `current-version.txt` and the artifacts next to it.
//!
//! # Features
//!
//! - Downloads only: no directory listings, no uploads, no routing
//! - Requests trying to leave the served directory are rejected with 403
//! - File bodies are streamed, so memory use does not grow with file size
//! - One access log line per request on standard output
//! - TLS from a passphrase-protected PKCS#12 store via rustls
//!
//! # Examples
//!
//! Serving a directory on an ephemeral port:
//!
//! ```no_run
//! use update_httpd::{HttpServer, ServedRoot, ServerConfig};
//!
//! # async fn run() -> Result<(), update_httpd::ServerError> {
//! let config = ServerConfig { port: 0, ..ServerConfig::default() };
//! let server = HttpServer::new(config, ServedRoot::new("public")?);
//!
//! let stop = server.shutdown_handle();
//! tokio::spawn(async move {
//!     tokio::signal::ctrl_c().await.ok();
//!     stop.shutdown();
//! });
//!
//! server.start().await
//! # }
//! ```
//!
//! Deciding a request without any networking:
//!
//! ```no_run
//! use update_httpd::{Outcome, RequestHandler, ServedRoot};
//!
//! # async fn run() -> Result<(), update_httpd::ServerError> {
//! let handler = RequestHandler::new(ServedRoot::new("public")?);
//! match handler.handle("/../etc/passwd").await {
//!     Outcome::Forbidden(reason) => println!("rejected: {reason}"),
//!     _ => unreachable!(),
//! }
//! # Ok(())
//! # }
//! ```

pub mod bootstrap;
pub mod parser;
pub mod server;

// Re-export commonly used items for convenience
pub use parser::{Error as ParserError, HttpRequest, HttpVersion, Method, parse_request};
pub use server::{
    AccessLogger, Error as ServerError, HttpServer, Outcome, RequestHandler,
    ResponseDescriptor, ServedRoot, ServerConfig, ShutdownHandle, StatusCode,
};
