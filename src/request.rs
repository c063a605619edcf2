use futures_lite::future;
use http::{Method, Request as HttpRequest};

use crate::body::Body;
use crate::cancel::CancelToken;
use crate::util::wants_close;

/// A request to write. Insert a `CancelToken` into its extensions to make it cancellable.
pub type Request = HttpRequest<Body>;

/// What the read loop needs to know about a request that has been written.
#[derive(Debug)]
pub(crate) struct PendingRequest {
    pub(crate) method: Method,
    pub(crate) close: bool,
    pub(crate) cancel: Option<CancelToken>,
}

impl PendingRequest {
    pub(crate) fn from_request(req: &Request) -> Self {
        Self {
            method: req.method().clone(),
            close: wants_close(req.version(), req.headers()),
            cancel: cancel_token(req),
        }
    }

    /// Resolves when this request is cancelled, never if it carries no token.
    pub(crate) async fn cancelled(&self) -> String {
        cancelled(self.cancel.as_ref()).await
    }
}

pub(crate) fn cancel_token(req: &Request) -> Option<CancelToken> {
    req.extensions().get::<CancelToken>().cloned()
}

pub(crate) async fn cancelled(token: Option<&CancelToken>) -> String {
    match token {
        Some(token) => token.cancelled().await,
        None => future::pending().await,
    }
}
