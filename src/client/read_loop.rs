//! The connection's single reader.
//!
//! Each turn of the loop waits for the first byte of a response, takes the request it answers
//! off the correlation channel, parses the head, and publishes the response. When the response
//! has a body, the buffered reader moves into that body and the loop waits until the body is
//! drained or dropped before it looks at the wire again.

use async_channel::{Receiver, Sender};
use futures_lite::FutureExt;
use futures_util::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use std::convert::TryFrom;
use std::time::Duration;

use super::body_signal::{BodyDone, BodyEofSignal, BodyReader, Framing};
use super::decode::{decode, ResponseHead};
use super::state::{lock, Shared};
use crate::error;
use crate::request::PendingRequest;
use crate::timeout::timeout;
use crate::{Body, Response};

/// Drives the read side of a `ClientConn`.
///
/// Spawn `run()` on an executor right after creating the connection; requests cannot complete
/// until it is polled.
pub struct ReadLoop<RW> {
    pub(super) state: Shared<RW>,
    pub(super) reader: Option<BufReader<RW>>,
    pub(super) req_rx: Receiver<PendingRequest>,
    pub(super) resp_tx: Sender<Response>,
    pub(super) closed_rx: Receiver<()>,
    pub(super) reader_tx: Sender<BufReader<RW>>,
    pub(super) head_timeout: Option<Duration>,
}

enum Next {
    Continue,
    Stop,
}

/// What ended a wait in the loop.
enum Wake<T> {
    Ready(T),
    Cancelled,
    Closed,
}

impl<RW> ReadLoop<RW>
where
    RW: AsyncRead + AsyncWrite + Clone + Send + Sync + Unpin + 'static,
{
    /// Runs until the connection stops, then hands the buffered reader (if the loop still owns
    /// it) to a pending hijack.
    pub async fn run(mut self) {
        tracing::debug!("read loop started");
        lock(&self.state).started = true;

        while let Next::Continue = self.next_response().await {}

        {
            let mut state = lock(&self.state);
            state.stopped = true;
            state.body_reading = false;
        }
        if let Some(reader) = self.reader.take() {
            let _ = self.reader_tx.try_send(reader);
        }
        tracing::debug!("read loop stopped");
    }

    async fn next_response(&mut self) -> Next {
        if lock(&self.state).io.is_none() {
            // hijacked or closed by user
            return Next::Stop;
        }
        let closed_rx = &self.closed_rx;
        let reader = match self.reader.as_mut() {
            Some(reader) => reader,
            None => return Next::Stop,
        };

        // Idle: wait for the next response to start, without consuming anything.
        let peek = async { Wake::Ready(reader.fill_buf().await.map(|buf| !buf.is_empty())) }
            .or(async {
                closed(closed_rx).await;
                Wake::Closed
            })
            .await;
        match peek {
            Wake::Ready(Ok(true)) => {}
            Wake::Ready(Ok(false)) => {
                tracing::debug!("server closed connection");
                lock(&self.state).set_read_err(error::server_closed_connection());
                return Next::Stop;
            }
            Wake::Ready(Err(err)) => {
                tracing::debug!("peek failed: {}", err);
                lock(&self.state).set_read_err(error::server_closed_connection());
                return Next::Stop;
            }
            Wake::Cancelled | Wake::Closed => return Next::Stop,
        }

        // Pair the response with the request that caused it.
        let req_rx = &self.req_rx;
        let pending = async { Wake::Ready(req_rx.recv().await) }
            .or(async {
                closed(closed_rx).await;
                Wake::Closed
            })
            .await;
        let pending = match pending {
            Wake::Ready(Ok(pending)) => pending,
            // ClientConn dropped, or closed by user
            _ => return Next::Stop,
        };

        // Parsing is not interruptible; only the head timeout bounds it.
        let decoded = match self.head_timeout {
            Some(dur) => timeout(dur, decode(reader, &pending))
                .await
                .unwrap_or_else(|_| Err(error::timeout())),
            None => decode(reader, &pending).await,
        };
        let head = match decoded {
            Ok(head) => head,
            Err(err) => {
                lock(&self.state).set_read_err(err);
                return Next::Stop;
            }
        };

        let mut alive = true;
        if head.close || pending.close || head.status.is_informational() {
            // the server is ending the persistent connection
            alive = false;
            lock(&self.state).set_read_err(error::server_closed_connection());
        }

        if head.framing == Framing::Empty {
            return match self.publish(head.into_response(Body::empty())).await {
                Next::Continue if alive => Next::Continue,
                _ => Next::Stop,
            };
        }

        self.drain_body(head, &pending, alive).await
    }

    /// Hands the body (and with it the reader) to the caller, then waits for it to finish.
    async fn drain_body(&mut self, head: ResponseHead, pending: &PendingRequest, alive: bool) -> Next {
        let reader = match self.reader.take() {
            Some(reader) => reader,
            None => return Next::Stop,
        };
        let len = match head.framing {
            Framing::Length(len) => usize::try_from(len).ok(),
            _ => None,
        };
        let body = match BodyReader::new(reader, head.framing) {
            Ok(body) => body,
            Err(reader) => {
                self.reader = Some(reader);
                return Next::Continue;
            }
        };

        let (done_tx, done_rx) = async_channel::bounded(1);
        let state = self.state.clone();
        let signal = BodyEofSignal::new(body, done_tx, move |clean| {
            let mut state = lock(&state);
            state.body_reading = false;
            if !clean {
                state.set_read_err(error::body_left_data());
            }
        });

        // Mark the body as outstanding before the caller can see it.
        lock(&self.state).body_reading = true;
        if let Next::Stop = self.publish(head.into_response(Body::from_reader(signal, len))).await {
            return Next::Stop;
        }

        let closed_rx = &self.closed_rx;
        let wake = async { Wake::Ready(done_rx.recv().await) }
            .or(async {
                let cause = pending.cancelled().await;
                tracing::debug!("request cancelled while reading body: {}", cause);
                Wake::Cancelled
            })
            .or(async {
                closed(closed_rx).await;
                Wake::Closed
            })
            .await;
        lock(&self.state).body_reading = false;

        match wake {
            Wake::Ready(Ok(BodyDone { reader, clean })) => {
                self.reader = reader;
                if clean && alive {
                    Next::Continue
                } else {
                    Next::Stop
                }
            }
            Wake::Ready(Err(_)) | Wake::Cancelled | Wake::Closed => Next::Stop,
        }
    }

    async fn publish(&self, resp: Response) -> Next {
        let closed_rx = &self.closed_rx;
        let sent = async { Wake::Ready(self.resp_tx.send(resp).await) }
            .or(async {
                closed(closed_rx).await;
                Wake::Closed
            })
            .await;
        match sent {
            Wake::Ready(Ok(())) => Next::Continue,
            _ => Next::Stop,
        }
    }
}

/// Resolves once the close notification fires. Nothing is ever sent on the channel, so `recv`
/// only returns when it is closed.
async fn closed(closed_rx: &Receiver<()>) {
    let _ = closed_rx.recv().await;
}

impl<RW> std::fmt::Debug for ReadLoop<RW> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadLoop").finish()
    }
}
