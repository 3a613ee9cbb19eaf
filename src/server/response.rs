//! Turning outcomes into HTTP responses.
//!
//! The `forbidden`, `not_found`, `file`, `plain_text` and
//! `internal_error` functions build one response each; [`build`] picks the
//! right one for an [`Outcome`]. None of them do I/O. Bytes only move in
//! [`ResponseDescriptor::write_to`].

use std::collections::HashMap;
use std::io;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::server::handler::{Outcome, ServedFile};

const SERVER_NAME: &str = concat!("update-httpd/", env!("CARGO_PKG_VERSION"));
const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

/// HTTP status codes with their standard reason phrases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Ok = 200,
    BadRequest = 400,
    Forbidden = 403,
    NotFound = 404,
    InternalServerError = 500,
    ServiceUnavailable = 503,
}

impl StatusCode {
    /// The numeric status code.
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Get the reason phrase for this status code.
    pub fn reason_phrase(&self) -> &'static str {
        match self {
            StatusCode::Ok => "OK",
            StatusCode::BadRequest => "Bad Request",
            StatusCode::Forbidden => "Forbidden",
            StatusCode::NotFound => "Not Found",
            StatusCode::InternalServerError => "Internal Server Error",
            StatusCode::ServiceUnavailable => "Service Unavailable",
        }
    }
}

/// Where the bytes of a response body come from.
#[derive(Debug)]
pub enum Body {
    Text(String),
    /// Streamed from disk while writing; never held in memory as a whole.
    File(ServedFile),
}

impl Body {
    pub fn len(&self) -> u64 {
        match self {
            Body::Text(text) => text.len() as u64,
            Body::File(served) => served.len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A response that is ready to be written to a client.
#[derive(Debug)]
pub struct ResponseDescriptor {
    /// The HTTP status code
    pub status: StatusCode,
    /// The HTTP headers
    pub headers: HashMap<String, String>,
    /// The response body
    pub body: Body,
}

impl ResponseDescriptor {
    /// Create a response with an empty text body.
    pub fn new(status: StatusCode) -> Self {
        let mut headers = HashMap::new();
        headers.insert("Server".to_string(), SERVER_NAME.to_string());
        headers.insert("Connection".to_string(), "close".to_string());

        Self {
            status,
            headers,
            body: Body::Text(String::new()),
        }
        .with_content_length()
    }

    /// Set a plain text body.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.body = Body::Text(text.into());
        self.with_content_type(TEXT_PLAIN).with_content_length()
    }

    /// Set a file body, typed by the file's MIME type.
    pub fn with_file(mut self, served: ServedFile) -> Self {
        let mime = served.mime.clone();
        self.body = Body::File(served);
        self.with_content_type(mime).with_content_length()
    }

    /// Add or replace a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Set the content type.
    pub fn with_content_type(self, content_type: impl Into<String>) -> Self {
        self.with_header("Content-Type", content_type)
    }

    fn with_content_length(self) -> Self {
        let len = self.body.len().to_string();
        self.with_header("Content-Length", len)
    }

    /// The status line and headers, including the terminating blank line.
    pub fn head_bytes(&self) -> Vec<u8> {
        let mut bytes = format!(
            "HTTP/1.1 {} {}\r\n",
            self.status.as_u16(), self.status.reason_phrase()
        ).into_bytes();

        for (name, value) in &self.headers {
            bytes.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
        }

        bytes.extend_from_slice(b"\r\n");
        bytes
    }

    /// Writes the response to `out`.
    ///
    /// With `include_body` false only the head is sent, as for `HEAD`.
    /// A file body that turns out shorter than announced is an error.
    pub async fn write_to<W>(self, out: &mut W, include_body: bool) -> io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        out.write_all(&self.head_bytes()).await?;

        if include_body {
            match self.body {
                Body::Text(text) => out.write_all(text.as_bytes()).await?,
                Body::File(served) => {
                    let expected = served.len;
                    let mut reader = served.file.take(expected);
                    let copied = tokio::io::copy(&mut reader, out).await?;
                    if copied != expected {
                        return Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            format!(
                                "{} shrank while being sent ({copied} of {expected} bytes)",
                                served.path.display()
                            ),
                        ));
                    }
                }
            }
        }

        out.flush().await
    }
}

/// Maps an outcome to its response.
pub fn build(outcome: Outcome) -> ResponseDescriptor {
    match outcome {
        Outcome::Forbidden(reason) => forbidden(reason),
        Outcome::NotFound(path) => not_found(&path),
        Outcome::FileServed(served) => file(served),
        Outcome::PlainText(path) => plain_text(path),
        Outcome::InternalError(detail) => internal_error(detail),
    }
}

pub fn forbidden(reason: &str) -> ResponseDescriptor {
    ResponseDescriptor::new(StatusCode::Forbidden).with_text(reason)
}

pub fn not_found(path: &str) -> ResponseDescriptor {
    ResponseDescriptor::new(StatusCode::NotFound).with_text(format!("not found: {path}"))
}

pub fn file(served: ServedFile) -> ResponseDescriptor {
    ResponseDescriptor::new(StatusCode::Ok).with_file(served)
}

pub fn plain_text(path: impl Into<String>) -> ResponseDescriptor {
    ResponseDescriptor::new(StatusCode::Ok).with_text(path)
}

pub fn internal_error(detail: impl Into<String>) -> ResponseDescriptor {
    ResponseDescriptor::new(StatusCode::InternalServerError).with_text(detail)
}

/// Response to a request head that could not be parsed.
pub fn bad_request(reason: impl std::fmt::Display) -> ResponseDescriptor {
    ResponseDescriptor::new(StatusCode::BadRequest)
        .with_text(format!("Error parsing request: {reason}"))
}

/// Response sent when the connection limit is reached.
pub fn service_unavailable() -> ResponseDescriptor {
    ResponseDescriptor::new(StatusCode::ServiceUnavailable)
        .with_text("Server is at capacity, please try again later")
}
