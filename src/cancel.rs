//! Per-request cancellation.
//!
//! Attach a `CancelToken` to a request through its extensions:
//!
//! ```
//! use persistconn::{Body, CancelToken, Request};
//!
//! let token = CancelToken::new();
//! let mut req = Request::new(Body::empty());
//! req.extensions_mut().insert(token.clone());
//! ```
//!
//! Firing the token while the connection waits on that request's response makes the waiting call
//! return `ErrorKind::Cancelled`, and taints the connection.

use async_channel::{Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Clone)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    cause: Mutex<Option<String>>,
    // Nothing is ever sent; closing the channel wakes every waiter.
    notify_tx: Sender<()>,
    notify_rx: Receiver<()>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (notify_tx, notify_rx) = async_channel::bounded(1);

        Self {
            inner: Arc::new(Inner {
                cause: Mutex::new(None),
                notify_tx,
                notify_rx,
            }),
        }
    }

    /// Cancel with a cause. Only the first cause is kept.
    pub fn cancel<S: Into<String>>(&self, cause: S) {
        {
            let mut current = self.inner.cause.lock().unwrap_or_else(PoisonError::into_inner);
            if current.is_none() {
                *current = Some(cause.into());
            }
        }
        self.inner.notify_tx.close();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.notify_tx.is_closed()
    }

    pub fn cause(&self) -> Option<String> {
        self.inner.cause.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Resolves with the cause once the token is cancelled.
    pub async fn cancelled(&self) -> String {
        let _ = self.inner.notify_rx.recv().await;
        self.cause().unwrap_or_else(|| "cancelled".to_owned())
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
