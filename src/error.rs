//! Errors returned by a `ClientConn`.
//!
//! Most errors are sticky: once the connection records one, every later probe and write returns
//! a clone of it. The source is kept behind an `Arc` so that the same failure can be handed to
//! every caller that runs into it.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

type BoxError = Box<dyn StdError + Send + Sync>;
type SharedError = Arc<dyn StdError + Send + Sync>;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone)]
pub struct Error {
    kind: Kind,
    source: Option<SharedError>,
}

/// The closed set of failures a connection can report.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Kind {
    /// A request asked for the connection to close; nothing more may be written.
    PersistentConnectionEnding,
    /// The server ended the persistent connection.
    ServerClosedConnection,
    /// The body of the previous response has not been read or dropped yet.
    BodyNotDrained,
    /// A response body was dropped before it was fully read.
    BodyLeftData,
    /// The transport was hijacked or closed by the user.
    ClosedByUser,
    /// The read loop has exited.
    ReadLoopStopped,
    /// The request was cancelled, with the cause given to its token.
    Cancelled(String),
    /// A response head did not arrive in time.
    Timeout,
    Encode(Option<String>),
    Decode(Option<String>),
    Io,
}

impl Error {
    pub(crate) fn new<E: Into<BoxError>>(kind: Kind, err: Option<E>) -> Self {
        Self {
            kind,
            source: err.map(|e| {
                let boxed: BoxError = e.into();
                SharedError::from(boxed)
            }),
        }
    }

    fn from_kind(kind: Kind) -> Self {
        Self::new(kind, None::<Error>)
    }

    pub fn kind(&self) -> &Kind {
        &self.kind
    }

    /// True if the error came from a cancelled request.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.kind, Kind::Cancelled(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Kind::*;
        match &self.kind {
            PersistentConnectionEnding => write!(f, "persistent connection closed"),
            ServerClosedConnection => write!(f, "server closed connection"),
            BodyNotDrained => write!(f, "body data waiting for read"),
            BodyLeftData => write!(f, "some data left in the buffer"),
            ClosedByUser => write!(f, "connection closed by user"),
            ReadLoopStopped => write!(f, "i/o operation on closed connection"),
            Cancelled(cause) => write!(f, "request cancelled: {}", cause),
            Timeout => write!(f, "timed out reading response head"),
            Encode(msg) | Decode(msg) => {
                let what = if let Encode(_) = self.kind { "Encode" } else { "Decode" };
                match (msg, &self.source) {
                    (Some(msg), Some(err)) => write!(f, "{} error, {}: {}", what, msg, err),
                    (Some(msg), None) => write!(f, "{} error, {}", what, msg),
                    (None, Some(err)) => write!(f, "{} error: {}", what, err),
                    (None, None) => write!(f, "{} error", what),
                }
            }
            Io => {
                if let Some(ref err) = self.source {
                    write!(f, "Io Error: {}", err)
                } else {
                    write!(f, "Io Error")
                }
            }
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source.as_ref().map(|e| &**e as _)
    }
}

pub(crate) fn persistent_connection_ending() -> Error {
    Error::from_kind(Kind::PersistentConnectionEnding)
}

pub(crate) fn server_closed_connection() -> Error {
    Error::from_kind(Kind::ServerClosedConnection)
}

pub(crate) fn body_not_drained() -> Error {
    Error::from_kind(Kind::BodyNotDrained)
}

pub(crate) fn body_left_data() -> Error {
    Error::from_kind(Kind::BodyLeftData)
}

pub(crate) fn closed_by_user() -> Error {
    Error::from_kind(Kind::ClosedByUser)
}

pub(crate) fn read_loop_stopped() -> Error {
    Error::from_kind(Kind::ReadLoopStopped)
}

pub(crate) fn cancelled(cause: String) -> Error {
    Error::from_kind(Kind::Cancelled(cause))
}

pub(crate) fn timeout() -> Error {
    Error::from_kind(Kind::Timeout)
}

pub(crate) fn encode<S: Into<Option<String>>>(msg: S) -> Error {
    Error::from_kind(Kind::Encode(msg.into()))
}

pub(crate) fn encode_io<E: Into<BoxError>>(err: E) -> Error {
    Error::new(Kind::Encode(None), Some(err))
}

pub(crate) fn decode_err<E: Into<BoxError>>(err: E) -> Error {
    Error::new(Kind::Decode(None), Some(err))
}

pub(crate) fn io<E: Into<BoxError>>(err: E) -> Error {
    Error::new(Kind::Io, Some(err))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_sticky_clone_keeps_source() {
        let err = io(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe gone"));
        let copy = err.clone();

        assert_eq!(copy.kind(), &Kind::Io);
        assert_eq!(copy.to_string(), "Io Error: pipe gone");
        assert!(copy.source().is_some());
    }

    #[test]
    fn test_kinds_compare_by_value() {
        assert_eq!(cancelled("a".to_owned()).kind(), &Kind::Cancelled("a".to_owned()));
        assert_ne!(server_closed_connection().kind(), closed_by_user().kind());
        assert!(cancelled("a".to_owned()).is_cancelled());
    }
}
