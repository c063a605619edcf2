//! Chunked transfer coding.
//!
//! The decoder sits directly on the connection's buffered reader and stops right after the
//! terminating chunk and trailer section, so whatever follows on the wire stays buffered for the
//! next response. Chunk extensions and trailers are read and discarded.

use futures_util::io::{self, AsyncBufRead, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use futures_util::ready;
use std::cmp;
use std::pin::Pin;
use std::task::{Context, Poll};

const LF: u8 = b'\n';
const MAX_LINE_LENGTH: usize = 4 * 1024;
const ENCODE_CHUNK_SIZE: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Reading a chunk-size line.
    Size,
    /// Inside chunk data, with this many bytes left.
    Data(u64),
    /// Reading the CRLF after chunk data.
    DataEnd,
    /// Reading trailer lines up to the blank line.
    Trailer,
    Done,
}

#[derive(Debug)]
pub(crate) struct ChunkedDecoder<R> {
    inner: R,
    state: State,
    line: Vec<u8>,
}

impl<R> ChunkedDecoder<R> {
    pub(crate) fn new(inner: R) -> Self {
        Self {
            inner,
            state: State::Size,
            line: Vec::new(),
        }
    }

    /// True once the terminating chunk and trailers have been consumed.
    pub(crate) fn is_done(&self) -> bool {
        self.state == State::Done
    }

    pub(crate) fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: AsyncBufRead + Unpin> ChunkedDecoder<R> {
    /// Appends bytes to `self.line` up to and including the next LF.
    fn poll_line(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        loop {
            let buf = ready!(Pin::new(&mut self.inner).poll_fill_buf(cx))?;
            if buf.is_empty() {
                return Poll::Ready(Err(io::ErrorKind::UnexpectedEof.into()));
            }

            let (used, found) = match buf.iter().position(|b| *b == LF) {
                Some(idx) => (idx + 1, true),
                None => (buf.len(), false),
            };
            self.line.extend_from_slice(&buf[..used]);
            Pin::new(&mut self.inner).consume(used);

            if found {
                return Poll::Ready(Ok(()));
            }
            if self.line.len() > MAX_LINE_LENGTH {
                return Poll::Ready(Err(invalid_data("chunk line too long")));
            }
        }
    }

    /// Consumes one control line and advances the state.
    fn poll_control(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        ready!(self.poll_line(cx))?;
        let line = trim_line(&self.line);

        self.state = match self.state {
            State::Size => match parse_chunk_size(line)? {
                0 => State::Trailer,
                n => State::Data(n),
            },
            State::DataEnd => {
                if !line.is_empty() {
                    return Poll::Ready(Err(invalid_data("missing CRLF after chunk data")));
                }
                State::Size
            }
            State::Trailer if line.is_empty() => State::Done,
            state => state,
        };
        self.line.clear();

        Poll::Ready(Ok(()))
    }
}

impl<R: AsyncBufRead + Unpin> AsyncBufRead for ChunkedDecoder<R> {
    fn poll_fill_buf(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<&[u8]>> {
        let this = self.get_mut();

        let remaining = loop {
            match this.state {
                State::Data(0) => this.state = State::DataEnd,
                State::Data(n) => break n,
                State::Done => return Poll::Ready(Ok(&[])),
                _ => ready!(this.poll_control(cx))?,
            }
        };

        let buf = ready!(Pin::new(&mut this.inner).poll_fill_buf(cx))?;
        if buf.is_empty() {
            return Poll::Ready(Err(io::ErrorKind::UnexpectedEof.into()));
        }
        let len = cmp::min(buf.len() as u64, remaining) as usize;
        Poll::Ready(Ok(&buf[..len]))
    }

    fn consume(self: Pin<&mut Self>, amt: usize) {
        let this = self.get_mut();
        if let State::Data(n) = this.state {
            let amt = cmp::min(amt as u64, n);
            Pin::new(&mut this.inner).consume(amt as usize);
            this.state = State::Data(n - amt);
        }
    }
}

impl<R: AsyncBufRead + Unpin> AsyncRead for ChunkedDecoder<R> {
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

/// Copies `body` to `writer` as chunks, finishing with the last-chunk marker.
pub(crate) async fn encode<R, W>(mut body: R, writer: &mut W) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0; ENCODE_CHUNK_SIZE];
    loop {
        let n = body.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        writer.write_all(format!("{:X}\r\n", n).as_bytes()).await?;
        writer.write_all(&buf[..n]).await?;
        writer.write_all(b"\r\n").await?;
    }
    writer.write_all(b"0\r\n\r\n").await
}

fn trim_line(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn parse_chunk_size(line: &[u8]) -> io::Result<u64> {
    // chunk-size [ ; chunk-ext ]
    let size = line.split(|b| *b == b';').next().unwrap_or(line);
    let size = std::str::from_utf8(size)
        .map_err(|_| invalid_data("chunk size is not ascii"))?
        .trim();
    u64::from_str_radix(size, 16).map_err(|_| invalid_data("invalid chunk size"))
}

fn invalid_data(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

#[cfg(test)]
mod test {
    use super::*;
    use futures_util::io::{AsyncBufReadExt, BufReader, Cursor};

    #[test]
    fn test_decode_leaves_next_message_buffered() {
        smol::block_on(async {
            let wire = b"4\r\nWiki\r\n5;ext=1\r\npedia\r\n0\r\nx-trailer: yes\r\n\r\nHTTP/1.1 200 OK";
            let mut decoder = ChunkedDecoder::new(BufReader::new(Cursor::new(wire.to_vec())));

            let mut body = String::new();
            decoder.read_to_string(&mut body).await.unwrap();
            assert_eq!(body, "Wikipedia");
            assert!(decoder.is_done());

            let mut rest = String::new();
            decoder.into_inner().read_to_string(&mut rest).await.unwrap();
            assert_eq!(rest, "HTTP/1.1 200 OK");
        });
    }

    #[test]
    fn test_decode_fill_buf_respects_chunk_boundary() {
        smol::block_on(async {
            let wire = b"3\r\nabc\r\n3\r\ndef\r\n0\r\n\r\n";
            let mut decoder = ChunkedDecoder::new(BufReader::new(Cursor::new(wire.to_vec())));

            assert_eq!(decoder.fill_buf().await.unwrap(), b"abc");
            decoder.consume_unpin(3);
            assert_eq!(decoder.fill_buf().await.unwrap(), b"def");
            decoder.consume_unpin(3);
            assert_eq!(decoder.fill_buf().await.unwrap(), b"");
            assert!(decoder.is_done());
        });
    }

    #[test]
    fn test_decode_truncated_body() {
        smol::block_on(async {
            let wire = b"a\r\nshort";
            let mut decoder = ChunkedDecoder::new(BufReader::new(Cursor::new(wire.to_vec())));

            let mut body = Vec::new();
            let err = decoder.read_to_end(&mut body).await.unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
            assert!(!decoder.is_done());
        });
    }

    #[test]
    fn test_decode_bad_size() {
        smol::block_on(async {
            let wire = b"zz\r\n";
            let mut decoder = ChunkedDecoder::new(BufReader::new(Cursor::new(wire.to_vec())));

            let mut body = Vec::new();
            let err = decoder.read_to_end(&mut body).await.unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        });
    }

    #[test]
    fn test_encode() {
        smol::block_on(async {
            let mut out = Vec::new();
            encode(Cursor::new(b"pooled".to_vec()), &mut out).await.unwrap();
            assert_eq!(out, b"6\r\npooled\r\n0\r\n\r\n".to_vec());
        });
    }
}
