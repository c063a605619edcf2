#![allow(dead_code)] // not every test file uses every helper

//! In-memory transport standing in for the server side of a connection.
//!
//! Tests push response bytes in as the "server" and inspect what the client wrote.

use futures_util::io::{AsyncRead, AsyncWrite};
use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use persistconn::client::{ClientConn, ConnOpts};

#[derive(Clone, Default)]
pub struct Server {
    pipe: Arc<Mutex<Pipe>>,
}

#[derive(Default)]
struct Pipe {
    // server -> client
    incoming: VecDeque<u8>,
    eof: bool,
    read_waker: Option<Waker>,
    // client -> server
    written: Vec<u8>,
    closes: usize,
}

impl Server {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue bytes for the client to read.
    pub fn respond(&self, resp: &str) {
        let mut pipe = self.pipe.lock().unwrap();
        pipe.incoming.extend(resp.as_bytes());
        if let Some(waker) = pipe.read_waker.take() {
            waker.wake();
        }
    }

    /// The server hangs up: once queued bytes are read, reads return end-of-stream.
    pub fn hang_up(&self) {
        let mut pipe = self.pipe.lock().unwrap();
        pipe.eof = true;
        if let Some(waker) = pipe.read_waker.take() {
            waker.wake();
        }
    }

    /// Everything the client has written so far.
    pub fn written(&self) -> String {
        String::from_utf8(self.pipe.lock().unwrap().written.clone()).unwrap()
    }

    pub fn closes(&self) -> usize {
        self.pipe.lock().unwrap().closes
    }
}

impl AsyncRead for Server {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context, buf: &mut [u8]) -> Poll<io::Result<usize>> {
        let mut pipe = self.pipe.lock().unwrap();
        if !pipe.incoming.is_empty() {
            let n = std::cmp::min(buf.len(), pipe.incoming.len());
            for (slot, byte) in buf.iter_mut().zip(pipe.incoming.drain(..n)) {
                *slot = byte;
            }
            Poll::Ready(Ok(n))
        } else if pipe.eof {
            Poll::Ready(Ok(0))
        } else {
            pipe.read_waker = Some(cx.waker().clone());
            Poll::Pending
        }
    }
}

impl AsyncWrite for Server {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context, buf: &[u8]) -> Poll<io::Result<usize>> {
        self.pipe.lock().unwrap().written.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context) -> Poll<io::Result<()>> {
        self.pipe.lock().unwrap().closes += 1;
        Poll::Ready(Ok(()))
    }
}

/// Connect a client to `server` and spawn its read loop.
pub fn connect(server: &Server) -> ClientConn<Server> {
    connect_with_opts(server, ConnOpts::default())
}

pub fn connect_with_opts(server: &Server, opts: ConnOpts) -> ClientConn<Server> {
    let _ = tracing_subscriber::fmt::try_init();

    let (conn, read_loop) = ClientConn::new(server.clone(), None, opts);
    smol::spawn(read_loop.run()).detach();
    conn
}

/// Polls `cond` until it holds, failing the test after a few seconds.
pub async fn eventually<F: Fn() -> bool>(cond: F) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        smol::Timer::after(Duration::from_millis(10)).await;
    }
    panic!("condition never became true");
}
