//! HTTP request-head parser.
//!
//! Only the request line and the header block are parsed. Download
//! requests carry no body, so anything after the blank line is ignored.

mod request;
mod method;
mod version;
mod error;

// Re-export public items
pub use request::HttpRequest;
pub use method::Method;
pub use version::HttpVersion;
pub use error::Error;

pub use request::{find_head_end, parse_request};
