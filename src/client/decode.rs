#![allow(clippy::borrow_interior_mutable_const)]

use futures_util::io::{AsyncBufRead, AsyncBufReadExt};
use http::{
    header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH, TRANSFER_ENCODING},
    Method, StatusCode, Version,
};
use thiserror::Error as ThisError;

use super::body_signal::Framing;
use crate::error::{self, Error};
use crate::request::PendingRequest;
use crate::util::wants_close;
use crate::{Body, Response};

const CR: u8 = b'\r';
const LF: u8 = b'\n';
const MAX_HEADERS: usize = 128;
const MAX_HEAD_LENGTH: usize = 8 * 1024;

/// A parsed response head, with the body framing it implies.
#[derive(Debug)]
pub(crate) struct ResponseHead {
    pub(crate) status: StatusCode,
    pub(crate) version: Version,
    pub(crate) headers: HeaderMap,
    pub(crate) framing: Framing,
    /// The server is ending the persistent connection after this response.
    pub(crate) close: bool,
}

impl ResponseHead {
    pub(crate) fn into_response(self, body: Body) -> Response {
        let mut res = Response::new(body);
        *res.status_mut() = self.status;
        *res.version_mut() = self.version;
        *res.headers_mut() = self.headers;
        res
    }
}

/// Decode an HTTP response head on the client.
///
/// Only the head is consumed from `reader`; the body (if any) is left for the caller, framed as
/// described by `ResponseHead::framing`. `req` decides whether a body can follow at all.
pub(crate) async fn decode<R>(reader: &mut R, req: &PendingRequest) -> Result<ResponseHead, Error>
where
    R: AsyncBufRead + Unpin,
{
    decode_head(reader, &req.method).await.map_err(|fail| {
        tracing::debug!("Decode error: {}", fail);
        error::decode_err(fail)
    })
}

async fn decode_head<R>(reader: &mut R, method: &Method) -> Result<ResponseHead, DecodeFail>
where
    R: AsyncBufRead + Unpin,
{
    use DecodeFail::*;

    let mut buf = Vec::new();
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut httparse_res = httparse::Response::new(&mut headers);

    // Keep reading lines until we hit the blank line ending the head.
    loop {
        let bytes_read = reader.read_until(LF, &mut buf).await.map_err(ConnectionLost)?;

        // No more bytes are yielded from the stream.
        if bytes_read == 0 {
            return Err(EmptyResponse);
        }

        // Prevent CWE-400 DDOS with large HTTP Headers.
        if buf.len() >= MAX_HEAD_LENGTH {
            return Err(HeadTooLarge);
        }

        // We've hit the end delimiter of the head.
        let idx = buf.len() - 1;
        if idx >= 3 && buf[idx - 3..=idx] == [CR, LF, CR, LF] {
            break;
        }
        if idx >= 1 && buf[idx - 1..=idx] == [LF, LF] {
            break;
        }
    }

    let status = httparse_res.parse(&buf)?;
    if status.is_partial() {
        return Err(MalformedHead);
    };

    let code = httparse_res.code.ok_or(NoStatusCode)?;
    let status = StatusCode::from_u16(code).map_err(|_| InvalidStatus(code))?;
    let version = match httparse_res.version.ok_or(NoVersion)? {
        0 => Version::HTTP_10,
        1 => Version::HTTP_11,
        _ => return Err(UnsupportedVersion),
    };

    let mut headers = HeaderMap::new();
    for header in httparse_res.headers.iter() {
        let name: HeaderName = header.name.parse()?;
        let value = HeaderValue::from_bytes(header.value)?;
        headers.append(name, value);
    }

    if headers.contains_key(CONTENT_LENGTH) && headers.contains_key(TRANSFER_ENCODING) {
        return Err(ContentLengthWithTransferEncoding);
    }

    let mut framing = framing(method, status, &headers)?;
    let mut close = wants_close(version, &headers);

    // A close-delimited body ends the connection.
    if framing == Framing::UntilClose {
        close = true;
    }
    if framing == Framing::Length(0) {
        framing = Framing::Empty;
    }

    Ok(ResponseHead {
        status,
        version,
        headers,
        framing,
        close,
    })
}

/// How the body following this head is delimited.
fn framing(method: &Method, status: StatusCode, headers: &HeaderMap) -> Result<Framing, DecodeFail> {
    if *method == Method::HEAD
        || status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED
    {
        return Ok(Framing::Empty);
    }

    // The final transfer coding decides; only chunked has its own delimiting.
    if let Some(encoding) = headers.get_all(TRANSFER_ENCODING).iter().last() {
        let last = encoding
            .to_str()
            .map_err(|_| DecodeFail::InvalidTransferEncoding)?
            .rsplit(',')
            .next()
            .unwrap_or("")
            .trim();
        if last.eq_ignore_ascii_case("chunked") {
            return Ok(Framing::Chunked);
        }
        return Ok(Framing::UntilClose);
    }

    if let Some(len) = headers.get(CONTENT_LENGTH) {
        let len = len
            .to_str()
            .map_err(|_| DecodeFail::InvalidContentLength)?
            .trim()
            .parse::<u64>()
            .map_err(|_| DecodeFail::InvalidContentLength)?;
        return Ok(Framing::Length(len));
    }

    Ok(Framing::UntilClose)
}

#[derive(ThisError, Debug)]
pub(crate) enum DecodeFail {
    #[error("Connection lost: {0}")]
    ConnectionLost(std::io::Error),
    #[error("Empty response")]
    EmptyResponse,
    #[error("Head byte length should be less than 8kb")]
    HeadTooLarge,
    #[error("Malformed HTTP head")]
    MalformedHead,
    #[error("No status code found")]
    NoStatusCode,
    #[error("Invalid status code {0}")]
    InvalidStatus(u16),
    #[error("No version found")]
    NoVersion,
    #[error("Unsupported HTTP version")]
    UnsupportedVersion,
    #[error("Unexpected Content-Length header with Transfer-Encoding")]
    ContentLengthWithTransferEncoding,
    #[error("Invalid content length")]
    InvalidContentLength,
    #[error("Invalid transfer encoding")]
    InvalidTransferEncoding,

    // conversions related to http and httparse lib
    #[error("Http header parsing error: {0}")]
    HeaderParse(#[from] httparse::Error),
    #[error("Http Header name error: {0}")]
    HttpHeaderName(#[from] http::header::InvalidHeaderName),
    #[error("Http Header value error: {0}")]
    HttpHeaderValue(#[from] http::header::InvalidHeaderValue),
}

#[cfg(test)]
mod test {
    use super::*;
    use futures_util::io::{AsyncReadExt, BufReader, Cursor};

    fn pending(method: Method) -> PendingRequest {
        PendingRequest {
            method,
            close: false,
            cancel: None,
        }
    }

    fn decode_str(wire: &str, method: Method) -> (Result<ResponseHead, Error>, String) {
        smol::block_on(async {
            let mut reader = BufReader::new(Cursor::new(wire.as_bytes().to_vec()));
            let head = decode(&mut reader, &pending(method)).await;
            let mut rest = String::new();
            reader.read_to_string(&mut rest).await.unwrap();
            (head, rest)
        })
    }

    #[test]
    fn test_fixed_length() {
        let (head, rest) = decode_str(
            "HTTP/1.1 200 OK\r\ncontent-length: 5\r\nx-a: b\r\n\r\nhello",
            Method::GET,
        );
        let head = head.unwrap();
        assert_eq!(head.status, StatusCode::OK);
        assert_eq!(head.version, Version::HTTP_11);
        assert_eq!(head.framing, Framing::Length(5));
        assert_eq!(head.headers.get("x-a").unwrap(), "b");
        assert!(!head.close);
        assert_eq!(rest, "hello");
    }

    #[test]
    fn test_no_body_rules() {
        let (head, _) = decode_str("HTTP/1.1 200 OK\r\ncontent-length: 5\r\n\r\n", Method::HEAD);
        assert_eq!(head.unwrap().framing, Framing::Empty);

        let (head, _) = decode_str("HTTP/1.1 204 No Content\r\n\r\n", Method::GET);
        assert_eq!(head.unwrap().framing, Framing::Empty);

        let (head, _) = decode_str("HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n", Method::GET);
        assert_eq!(head.unwrap().framing, Framing::Empty);

        let (head, _) = decode_str("HTTP/1.1 100 Continue\r\n\r\n", Method::POST);
        let head = head.unwrap();
        assert_eq!(head.framing, Framing::Empty);
        assert!(head.status.is_informational());
    }

    #[test]
    fn test_chunked_and_close_delimited() {
        let (head, _) = decode_str(
            "HTTP/1.1 200 OK\r\ntransfer-encoding: gzip, chunked\r\n\r\n",
            Method::GET,
        );
        assert_eq!(head.unwrap().framing, Framing::Chunked);

        let (head, _) = decode_str("HTTP/1.1 200 OK\r\n\r\nuntil close", Method::GET);
        let head = head.unwrap();
        assert_eq!(head.framing, Framing::UntilClose);
        assert!(head.close);
    }

    #[test]
    fn test_connection_close() {
        let (head, _) = decode_str(
            "HTTP/1.1 200 OK\r\nConnection: close\r\ncontent-length: 0\r\n\r\n",
            Method::GET,
        );
        assert!(head.unwrap().close);

        let (head, _) = decode_str("HTTP/1.0 200 OK\r\ncontent-length: 0\r\n\r\n", Method::GET);
        assert!(head.unwrap().close);
    }

    #[test]
    fn test_bad_heads() {
        let (head, _) = decode_str("", Method::GET);
        assert!(matches!(head.unwrap_err().kind(), crate::error::Kind::Decode(_)));

        let (head, _) = decode_str("garbage\r\n\r\n", Method::GET);
        assert!(head.is_err());

        let (head, _) = decode_str(
            "HTTP/1.1 200 OK\r\ncontent-length: 1\r\ntransfer-encoding: chunked\r\n\r\n",
            Method::GET,
        );
        assert!(head.is_err());
    }
}
