use futures_util::io::{self, AsyncBufRead, AsyncRead, AsyncReadExt, Cursor};
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::error::{self, Error};

pin_project_lite::pin_project! {
    /// A streaming body for use with requests and responses.
    ///
    /// A response body borrows the connection's transport until it is read to the end or
    /// dropped. Dropping it before the end closes it early, which leaves unread bytes on the
    /// wire and taints the connection.
    pub struct Body {
        #[pin]
        pub(crate) reader: Box<dyn AsyncBufRead + Unpin + Send + Sync + 'static>,
        pub(crate) length: Option<usize>,
    }
}

impl Body {
    /// Create an empty Body
    pub fn empty() -> Self {
        Self {
            reader: Box::new(io::empty()),
            length: Some(0),
        }
    }

    /// Create a Body from a type implementing AsyncBufRead
    ///
    /// if len: None the request is sent with Transfer-Encoding: chunked
    /// if len: Some(n) the request is sent with a fixed Content-Length
    pub fn from_reader(
        reader: impl AsyncBufRead + Unpin + Send + Sync + 'static,
        len: Option<usize>,
    ) -> Self {
        Self {
            reader: Box::new(reader),
            length: len,
        }
    }

    /// Create a Body from bytes
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            length: Some(bytes.len()),
            reader: Box::new(Cursor::new(bytes)),
        }
    }

    /// Declared length, `None` for streamed bodies.
    pub fn length(&self) -> Option<usize> {
        self.length
    }

    /// Read a Body into bytes. Consumes Body.
    pub async fn into_bytes(mut self) -> Result<Vec<u8>, Error> {
        let mut buf = Vec::with_capacity(self.length.unwrap_or(1024));
        self.read_to_end(&mut buf).await.map_err(error::io)?;
        Ok(buf)
    }

    /// Read a Body into a String. Consumes Body.
    pub async fn into_string(mut self) -> Result<String, Error> {
        let mut buf = String::with_capacity(self.length.unwrap_or(0));
        self.read_to_string(&mut buf).await.map_err(error::io)?;
        Ok(buf)
    }
}

impl std::fmt::Debug for Body {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Body").field("length", &self.length).finish()
    }
}

impl From<String> for Body {
    fn from(s: String) -> Self {
        Self::from_bytes(s.into_bytes())
    }
}

impl<'a> From<&'a str> for Body {
    fn from(s: &'a str) -> Self {
        Self::from_bytes(s.as_bytes().to_vec())
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Self::from_bytes(bytes)
    }
}

impl AsyncRead for Body {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.reader).poll_read(cx, buf)
    }
}

impl AsyncBufRead for Body {
    fn poll_fill_buf(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<&'_ [u8]>> {
        let this = self.project();
        this.reader.poll_fill_buf(cx)
    }

    fn consume(mut self: Pin<&mut Self>, amt: usize) {
        Pin::new(&mut self.reader).consume(amt)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_lengths() {
        assert_eq!(Body::empty().length(), Some(0));
        assert_eq!(Body::from("hello").length(), Some(5));
        assert_eq!(Body::from_reader(io::empty(), None).length(), None);
    }

    #[test]
    fn test_into_string() {
        smol::block_on(async {
            let body = Body::from(b"persist".to_vec());
            assert_eq!(body.into_string().await.unwrap(), "persist");
        });
    }
}
