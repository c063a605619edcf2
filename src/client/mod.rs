//! Client side of a persistent HTTP/1.1 connection.
//!
//! A `ClientConn` writes requests one at a time while its `ReadLoop` parses responses off the
//! same transport in the background:
//! - `send` writes a request and waits for its response. The head is available right away, the
//!   body streams from the connection.
//! - the next request can only be written once the previous response body has been read to the
//!   end or dropped. Dropping it early taints the connection.
//! - errors are sticky: once the connection fails, every later write fails too. Reconnecting is
//!   up to the caller.
//!
//! ```no_run
//! # async fn run(stream: async_dup::Arc<smol::Async<std::net::TcpStream>>) -> persistconn::Result<()> {
//! use persistconn::{client::ClientConn, Body, Request};
//!
//! let (conn, read_loop) = ClientConn::from_io(stream);
//! smol::spawn(read_loop.run()).detach();
//!
//! let mut req = Request::new(Body::empty());
//! *req.uri_mut() = "http://example.org/".parse().unwrap();
//! let resp = conn.send(req).await?;
//! let body = resp.into_body().into_string().await?;
//! # Ok(())
//! # }
//! ```

mod body_signal;
mod decode;
mod encode;
mod read_loop;
mod state;

use async_channel::{Receiver, Sender};
use futures_lite::FutureExt;
use futures_util::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use futures_util::lock::Mutex as AsyncMutex;
use std::sync::{Arc, MutexGuard};
use std::time::Duration;

use crate::cancel::CancelToken;
use crate::error::{self, Error};
use crate::request::{cancelled, PendingRequest};
use crate::{Request, Response};

use self::encode::Encoder;
pub use self::read_loop::ReadLoop;
use self::state::{lock, Shared, State};

/// Options for a `ClientConn`.
#[derive(Debug, Clone, Default)]
pub struct ConnOpts {
    /// Write request lines in absolute form, for talking to a proxy.
    pub proxy: bool,
    /// Bound on reading a response head once its first byte has arrived.
    pub head_timeout: Option<Duration>,
}

/// A persistent HTTP/1.1 connection, seen from the client.
///
/// Cloning gives another handle to the same connection.
pub struct ClientConn<RW> {
    inner: Arc<Inner<RW>>,
}

struct Inner<RW> {
    state: Shared<RW>,
    /// Requests written but not yet paired with a response. Capacity 1.
    req_tx: Sender<PendingRequest>,
    /// Parsed responses. Capacity 1.
    resp_rx: Receiver<Response>,
    /// Closed (never sent on) to wake the read loop for hijack and close.
    closed_tx: Sender<()>,
    /// The read loop hands its buffered reader back through here when it exits.
    reader_rx: Receiver<BufReader<RW>>,
    /// Keeps wire order and correlation order the same across concurrent writers.
    write_lock: AsyncMutex<()>,
    proxy: bool,
}

impl<RW> ClientConn<RW>
where
    RW: AsyncRead + AsyncWrite + Clone + Send + Sync + Unpin + 'static,
{
    /// Creates a connection over `io`, reusing `reader` if bytes were already buffered from it.
    ///
    /// The returned `ReadLoop` must be spawned for responses to be read.
    pub fn new(io: RW, reader: Option<BufReader<RW>>, opts: ConnOpts) -> (Self, ReadLoop<RW>) {
        let reader = reader.unwrap_or_else(|| BufReader::new(io.clone()));
        let state = Arc::new(std::sync::Mutex::new(State::new(io)));

        let (req_tx, req_rx) = async_channel::bounded(1);
        let (resp_tx, resp_rx) = async_channel::bounded(1);
        let (closed_tx, closed_rx) = async_channel::bounded(1);
        let (reader_tx, reader_rx) = async_channel::bounded(1);

        let conn = ClientConn {
            inner: Arc::new(Inner {
                state: state.clone(),
                req_tx,
                resp_rx,
                closed_tx,
                reader_rx,
                write_lock: AsyncMutex::new(()),
                proxy: opts.proxy,
            }),
        };
        let read_loop = ReadLoop {
            state,
            reader: Some(reader),
            req_rx,
            resp_tx,
            closed_rx,
            reader_tx,
            head_timeout: opts.head_timeout,
        };

        (conn, read_loop)
    }

    /// Creates a connection over `io` with default options.
    pub fn from_io(io: RW) -> (Self, ReadLoop<RW>) {
        Self::new(io, None, ConnOpts::default())
    }

    /// Write a request and wait for its response.
    ///
    /// The response body must be read to the end or dropped before the next request.
    pub async fn send(&self, req: Request) -> Result<Response, Error> {
        let cancel = crate::request::cancel_token(&req);
        self.write(req).await?;
        self.read(cancel.as_ref()).await
    }

    /// Write a request to the connection.
    ///
    /// Fails without touching the transport if the connection has a sticky error, or if the body
    /// of the previous response is still being read.
    pub async fn write(&self, req: Request) -> Result<(), Error> {
        let _guard = self.inner.write_lock.lock().await;

        let pending = PendingRequest::from_request(&req);
        let mut io = {
            let mut state = self.state();
            state.check()?;
            if state.body_reading {
                return Err(error::body_not_drained());
            }
            if pending.close {
                // this write is the last one
                state.set_write_err(error::persistent_connection_ending());
            }
            state.io.clone().ok_or_else(error::closed_by_user)?
        };

        let written = match Encoder::encode(req, self.inner.proxy) {
            Ok(encoder) => encoder.write_to(&mut io).await.map_err(error::encode_io),
            Err(err) => Err(err),
        };
        if let Err(err) = written {
            self.state().set_write_err(err.clone());
            return Err(err);
        }

        if self.inner.req_tx.send(pending).await.is_err() {
            // read loop is gone
            return Err(self.stopped_err());
        }
        Ok(())
    }

    /// Wait for the response to the request written last.
    ///
    /// If `cancel` fires first, the connection is tainted with the cancellation and the
    /// cancellation is returned.
    pub async fn read(&self, cancel: Option<&CancelToken>) -> Result<Response, Error> {
        enum Read {
            Response(Option<Response>),
            Cancelled(String),
        }

        let resp_rx = &self.inner.resp_rx;
        let read = async { Read::Response(resp_rx.recv().await.ok()) }
            .or(async { Read::Cancelled(cancelled(cancel).await) })
            .await;

        match read {
            Read::Response(Some(resp)) => Ok(resp),
            Read::Response(None) => Err(self.stopped_err()),
            Read::Cancelled(cause) => {
                let err = error::cancelled(cause);
                self.state().set_read_err(err.clone());
                Err(err)
            }
        }
    }

    /// Health probe: the first sticky error, or `Ok` if a request could be written.
    pub fn ping(&self) -> Result<(), Error> {
        self.state().check()
    }

    /// Detach the transport and its buffered reader from the connection.
    ///
    /// Waits for the read loop to let go of the reader, unless a response body currently owns
    /// it, in which case only the transport is returned. Later calls return `(None, None)`, and
    /// every other operation fails with `ErrorKind::ClosedByUser`.
    ///
    /// A read loop in the middle of parsing a response head only lets go once the head is
    /// parsed, the transport fails, or `ConnOpts::head_timeout` expires. Without a head timeout
    /// a server that stalls mid-head stalls this call too. If the loop was never spawned, no
    /// reader is returned.
    pub async fn hijack(&self) -> (Option<RW>, Option<BufReader<RW>>) {
        let (io, started) = {
            let mut state = self.state();
            (state.io.take(), state.started)
        };
        if io.is_none() {
            return (None, None);
        }
        tracing::debug!("connection hijacked");
        self.inner.closed_tx.close();
        if !started {
            // the unspawned ReadLoop still holds the reader
            return (io, None);
        }

        let reader = self.inner.reader_rx.recv().await.ok();
        (io, reader)
    }

    /// Hijack the connection and close the transport.
    ///
    /// Closing twice is harmless: the second call finds nothing to close. Like `hijack`, this
    /// waits for a read loop that is mid-parse on a response head.
    pub async fn close(&self) -> Result<(), Error> {
        match self.hijack().await {
            (Some(mut io), _) => io.close().await.map_err(error::io),
            (None, _) => {
                self.inner.closed_tx.close();
                Ok(())
            }
        }
    }

    fn state(&self) -> MutexGuard<'_, State<RW>> {
        lock(&self.inner.state)
    }

    fn stopped_err(&self) -> Error {
        self.ping().err().unwrap_or_else(error::read_loop_stopped)
    }
}

impl<RW> Drop for Inner<RW> {
    fn drop(&mut self) {
        // last handle gone; let an idle read loop exit
        self.closed_tx.close();
    }
}

impl<RW> Clone for ClientConn<RW> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<RW> std::fmt::Debug for ClientConn<RW> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConn").field("proxy", &self.inner.proxy).finish()
    }
}
