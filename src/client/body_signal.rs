//! Completion signal around a response body.
//!
//! The body owns the connection's buffered reader while the caller reads it. When the body hits
//! end-of-stream, fails, or is dropped, `BodyEofSignal` runs its completion callback once and
//! hands the reader back to the read loop along with whether the body was fully drained.

use async_channel::Sender;
use futures_util::io::{self, AsyncBufRead, AsyncRead, BufReader, Take};
use futures_util::ready;
use std::cmp;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::chunked::ChunkedDecoder;

/// Framing of a response body on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Framing {
    /// No body follows the head.
    Empty,
    Length(u64),
    Chunked,
    /// Body runs until the server closes the connection.
    UntilClose,
}

/// Reads one body's worth of bytes off the connection.
pub(crate) enum BodyReader<RW: AsyncRead + Unpin> {
    Fixed(Take<BufReader<RW>>),
    Chunked(ChunkedDecoder<BufReader<RW>>),
    UntilClose(BufReader<RW>),
}

impl<RW: AsyncRead + Unpin> BodyReader<RW> {
    /// Gives the reader straight back for `Framing::Empty`, which has nothing to read.
    pub(crate) fn new(reader: BufReader<RW>, framing: Framing) -> Result<Self, BufReader<RW>> {
        use futures_util::io::AsyncReadExt;

        match framing {
            Framing::Empty => Err(reader),
            Framing::Length(len) => Ok(BodyReader::Fixed(reader.take(len))),
            Framing::Chunked => Ok(BodyReader::Chunked(ChunkedDecoder::new(reader))),
            Framing::UntilClose => Ok(BodyReader::UntilClose(reader)),
        }
    }

    /// Whether the framing has been consumed completely. A close-delimited body only knows it
    /// is finished once it reads end-of-stream.
    fn is_finished(&self) -> bool {
        match self {
            BodyReader::Fixed(take) => take.limit() == 0,
            BodyReader::Chunked(decoder) => decoder.is_done(),
            BodyReader::UntilClose(_) => false,
        }
    }

    fn into_inner(self) -> BufReader<RW> {
        match self {
            BodyReader::Fixed(take) => take.into_inner(),
            BodyReader::Chunked(decoder) => decoder.into_inner(),
            BodyReader::UntilClose(reader) => reader,
        }
    }
}

fn truncated() -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed before end of body")
}

impl<RW: AsyncRead + Unpin> AsyncRead for BodyReader<RW> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            BodyReader::Fixed(take) => {
                let limit = take.limit();
                let n = ready!(Pin::new(take).poll_read(cx, buf))?;
                if n == 0 && limit > 0 && !buf.is_empty() {
                    return Poll::Ready(Err(truncated()));
                }
                Poll::Ready(Ok(n))
            }
            BodyReader::Chunked(decoder) => Pin::new(decoder).poll_read(cx, buf),
            BodyReader::UntilClose(reader) => Pin::new(reader).poll_read(cx, buf),
        }
    }
}

impl<RW: AsyncRead + Unpin> AsyncBufRead for BodyReader<RW> {
    fn poll_fill_buf(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<&[u8]>> {
        match self.get_mut() {
            BodyReader::Fixed(take) => {
                // Take reports a short body as a normal end-of-stream.
                let limit = take.limit();
                match ready!(Pin::new(take).poll_fill_buf(cx)) {
                    Ok(buf) if buf.is_empty() && limit > 0 => Poll::Ready(Err(truncated())),
                    res => Poll::Ready(res),
                }
            }
            BodyReader::Chunked(decoder) => Pin::new(decoder).poll_fill_buf(cx),
            BodyReader::UntilClose(reader) => Pin::new(reader).poll_fill_buf(cx),
        }
    }

    fn consume(self: Pin<&mut Self>, amt: usize) {
        match self.get_mut() {
            BodyReader::Fixed(take) => Pin::new(take).consume(amt),
            BodyReader::Chunked(decoder) => Pin::new(decoder).consume(amt),
            BodyReader::UntilClose(reader) => Pin::new(reader).consume(amt),
        }
    }
}

/// Sent to the read loop when a body reaches its terminal state.
pub(crate) struct BodyDone<RW> {
    pub(crate) reader: Option<BufReader<RW>>,
    /// `true` if the body was read to the end, `false` if it was closed early or failed.
    pub(crate) clean: bool,
}

type OnDone = Box<dyn FnOnce(bool) + Send + Sync + 'static>;

pub(crate) struct BodyEofSignal<RW: AsyncRead + Unpin> {
    body: Option<BodyReader<RW>>,
    on_done: Option<OnDone>,
    done: Sender<BodyDone<RW>>,
}

impl<RW: AsyncRead + Unpin> BodyEofSignal<RW> {
    pub(crate) fn new(
        body: BodyReader<RW>,
        done: Sender<BodyDone<RW>>,
        on_done: impl FnOnce(bool) + Send + Sync + 'static,
    ) -> Self {
        Self {
            body: Some(body),
            on_done: Some(Box::new(on_done)),
            done,
        }
    }

    fn fire(&mut self, clean: bool) {
        if let Some(on_done) = self.on_done.take() {
            on_done(clean);
            let reader = self.body.take().map(BodyReader::into_inner);
            // The read loop may already have given up waiting.
            let _ = self.done.try_send(BodyDone { reader, clean });
        }
    }
}

impl<RW: AsyncRead + Unpin> AsyncBufRead for BodyEofSignal<RW> {
    fn poll_fill_buf(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<&[u8]>> {
        let this = self.get_mut();

        let polled = match this.body.as_mut() {
            Some(body) => match Pin::new(body).poll_fill_buf(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(res) => res.map(|buf| buf.is_empty()),
            },
            None => return Poll::Ready(Ok(&[])),
        };
        let eof = match polled {
            Ok(eof) => eof,
            Err(err) => {
                this.fire(false);
                return Poll::Ready(Err(err));
            }
        };

        if eof {
            this.fire(true);
            return Poll::Ready(Ok(&[]));
        }

        // Bytes are buffered, so this poll is immediately ready with the same slice.
        match this.body.as_mut() {
            Some(body) => Pin::new(body).poll_fill_buf(cx),
            None => Poll::Ready(Ok(&[])),
        }
    }

    fn consume(self: Pin<&mut Self>, amt: usize) {
        if let Some(body) = self.get_mut().body.as_mut() {
            Pin::new(body).consume(amt);
        }
    }
}

impl<RW: AsyncRead + Unpin> AsyncRead for BodyEofSignal<RW> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let n = {
            let data = ready!(Pin::new(&mut *this).poll_fill_buf(cx))?;
            let n = cmp::min(data.len(), buf.len());
            buf[..n].copy_from_slice(&data[..n]);
            n
        };
        Pin::new(this).consume(n);
        Poll::Ready(Ok(n))
    }
}

impl<RW: AsyncRead + Unpin> Drop for BodyEofSignal<RW> {
    fn drop(&mut self) {
        let finished = self.body.as_ref().map_or(true, BodyReader::is_finished);
        self.fire(finished);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use futures_util::io::{AsyncReadExt, Cursor};
    use std::sync::{Arc, Mutex};

    fn signal(
        wire: &[u8],
        framing: Framing,
    ) -> (
        BodyEofSignal<Cursor<Vec<u8>>>,
        async_channel::Receiver<BodyDone<Cursor<Vec<u8>>>>,
        Arc<Mutex<Vec<bool>>>,
    ) {
        let reader = BufReader::new(Cursor::new(wire.to_vec()));
        let body = BodyReader::new(reader, framing).ok().unwrap();
        let (tx, rx) = async_channel::bounded(1);
        let calls = Arc::new(Mutex::new(Vec::new()));
        let record = calls.clone();
        let signal = BodyEofSignal::new(body, tx, move |clean| record.lock().unwrap().push(clean));
        (signal, rx, calls)
    }

    #[test]
    fn test_eof_fires_once_and_returns_reader() {
        smol::block_on(async {
            let (mut signal, rx, calls) = signal(b"hellonext", Framing::Length(5));

            let mut body = String::new();
            signal.read_to_string(&mut body).await.unwrap();
            assert_eq!(body, "hello");

            // more reads and the drop must not fire again
            let mut more = Vec::new();
            signal.read_to_end(&mut more).await.unwrap();
            drop(signal);
            assert_eq!(*calls.lock().unwrap(), vec![true]);

            let done = rx.recv().await.unwrap();
            assert!(done.clean);
            let mut rest = String::new();
            done.reader.unwrap().read_to_string(&mut rest).await.unwrap();
            assert_eq!(rest, "next");
            assert!(rx.try_recv().is_err());
        });
    }

    #[test]
    fn test_early_drop_is_not_clean() {
        smol::block_on(async {
            let (mut signal, rx, calls) = signal(b"hello", Framing::Length(5));

            let mut buf = [0; 2];
            signal.read_exact(&mut buf).await.unwrap();
            drop(signal);

            assert_eq!(*calls.lock().unwrap(), vec![false]);
            assert!(!rx.recv().await.unwrap().clean);
        });
    }

    #[test]
    fn test_drop_after_full_read_is_clean() {
        smol::block_on(async {
            let (mut signal, rx, calls) = signal(b"hello", Framing::Length(5));

            let mut buf = [0; 5];
            signal.read_exact(&mut buf).await.unwrap();
            drop(signal);

            assert_eq!(*calls.lock().unwrap(), vec![true]);
            assert!(rx.recv().await.unwrap().clean);
        });
    }

    #[test]
    fn test_short_fixed_body_is_not_clean() {
        smol::block_on(async {
            let (mut signal, rx, calls) = signal(b"hello", Framing::Length(10));

            let mut body = Vec::new();
            let err = signal.read_to_end(&mut body).await.unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
            drop(signal);

            assert_eq!(*calls.lock().unwrap(), vec![false]);
            assert!(!rx.recv().await.unwrap().clean);
        });
    }

    #[test]
    fn test_empty_framing_has_no_body() {
        let reader = BufReader::new(Cursor::new(Vec::new()));
        assert!(BodyReader::new(reader, Framing::Empty).is_err());
    }
}
