#![allow(clippy::borrow_interior_mutable_const)]

use futures_util::io::{self, AsyncWrite, AsyncWriteExt};
use http::{
    header::{CONTENT_LENGTH, HOST, TRANSFER_ENCODING},
    Method, Version,
};
use std::io::Write;

use crate::chunked;
use crate::error::{self, Error};
use crate::{Body, Request};

/// An HTTP request, serialized head first.
pub(crate) struct Encoder {
    /// Request line and headers.
    head: Vec<u8>,
    body: Body,
}

impl Encoder {
    /// Encode the head of an HTTP request on the client.
    ///
    /// In proxy mode the request line carries the absolute URI, otherwise just path and query.
    pub(crate) fn encode(req: Request, proxy: bool) -> Result<Self, Error> {
        let mut head: Vec<u8> = Vec::new();

        let target = request_target(&req, proxy)?;
        let version = match req.version() {
            Version::HTTP_10 => "HTTP/1.0",
            Version::HTTP_11 => "HTTP/1.1",
            _ => return Err(error::encode("Unsupported HTTP version".to_owned())),
        };
        let line = format!("{} {} {}\r\n", req.method(), target, version);
        tracing::trace!("> {}", line.trim_end());
        head.extend_from_slice(line.as_bytes());

        if req.headers().get(HOST).is_none() {
            let host = req.uri().host();
            let host = host.ok_or_else(|| error::encode("Missing hostname".to_owned()))?;
            let val = if let Some(port) = req.uri().port() {
                format!("host: {}:{}\r\n", host, port)
            } else {
                format!("host: {}\r\n", host)
            };
            tracing::trace!("> {}", val.trim_end());
            head.extend_from_slice(val.as_bytes());
        }

        // Insert Proxy-Connection header when method is CONNECT
        if req.method() == Method::CONNECT {
            head.extend_from_slice(b"proxy-connection: keep-alive\r\n");
        }

        // If the body isn't streaming, we can set the content-length ahead of time. Else we need to
        // send all items in chunks.
        let val = match req.body().length {
            Some(len) => format!("content-length: {}\r\n", len),
            None => "transfer-encoding: chunked\r\n".to_owned(),
        };
        tracing::trace!("> {}", val.trim_end());
        head.extend_from_slice(val.as_bytes());

        let headers = req
            .headers()
            .iter()
            .filter(|(h, _)| **h != CONTENT_LENGTH)
            .filter(|(h, _)| **h != TRANSFER_ENCODING);
        for (header, value) in headers {
            // written in parts, because value may contain opaque bytes.
            write!(head, "{}: ", header).map_err(error::encode_io)?;
            head.extend_from_slice(value.as_bytes());
            head.extend_from_slice(b"\r\n");
        }
        head.extend_from_slice(b"\r\n");

        Ok(Self {
            head,
            body: req.into_body(),
        })
    }

    /// Write the whole request to `writer` and flush it.
    pub(crate) async fn write_to<W>(self, writer: &mut W) -> io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        writer.write_all(&self.head).await?;
        match self.body.length {
            Some(0) => {}
            Some(_) => {
                io::copy(self.body, &mut *writer).await?;
            }
            None => chunked::encode(self.body, &mut *writer).await?,
        }
        writer.flush().await
    }
}

/// The request-target for the request line.
fn request_target(req: &Request, proxy: bool) -> Result<String, Error> {
    let uri = req.uri();

    // A client sending a CONNECT request MUST consists of only the host
    // name and port number of the tunnel destination, separated by a colon.
    // See: https://tools.ietf.org/html/rfc7231#section-4.3.6
    if req.method() == Method::CONNECT {
        let host = uri.host();
        let host = host.ok_or_else(|| error::encode("Missing hostname".to_owned()))?;
        let port = uri.port_u16();
        let port = port.ok_or_else(|| error::encode("Missing port".to_owned()))?;
        return Ok(format!("{}:{}", host, port));
    }

    if proxy {
        if uri.scheme().is_none() || uri.authority().is_none() {
            return Err(error::encode("Proxy requests need an absolute uri".to_owned()));
        }
        return Ok(uri.to_string());
    }

    // clients are not supposed to send uri frags when retrieving a document
    let mut target = uri.path().to_owned();
    if let Some(query) = uri.query() {
        target.push('?');
        target.push_str(query);
    }
    Ok(target)
}
