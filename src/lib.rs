#![deny(unsafe_code)]

//! # persistconn
//!
//! An async client for a single persistent HTTP/1.1 connection.
//!
//! Requests are written one at a time over any `AsyncRead + AsyncWrite` transport, while a
//! background `ReadLoop` parses each response and pairs it with the request that caused it. See
//! the [`client`] module for the rules on bodies, errors and teardown.

mod body;
mod cancel;
mod chunked;
pub mod client;
mod error;
mod request;
mod response;
mod timeout;
mod util;

pub use body::Body;
pub use cancel::CancelToken;
pub use error::{Error, Kind as ErrorKind, Result};
pub use request::Request;
pub use response::Response;
