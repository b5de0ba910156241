//! Error taxonomy for the runtime.
//!
//! Mirrors `iocoro::error` from the original source: a closed set of failure
//! *kinds* rather than raw OS error codes, plus passthrough of the underlying
//! [`std::io::Error`] when one caused the failure.

use std::fmt;
use std::io;

/// The kind of failure that occurred.
///
/// This is deliberately a flat enum of *kinds*, not values: callers match on
/// [`Kind`] to decide how to react, and use [`Error::source`] (via
/// `std::error::Error`) to recover the underlying OS error when present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// Cancelled by a stop token or an explicit `cancel()`.
    OperationAborted,
    /// Feature reserved but not implemented (e.g. DNS resolution).
    NotImplemented,
    /// Library-level argument or parse failure.
    InvalidArgument,
    /// Endpoint is malformed.
    InvalidEndpoint,
    /// Address family is not supported by this object or backend.
    UnsupportedAddressFamily,
    /// The socket (or acceptor) is not open.
    NotOpen,
    /// A datagram socket is not bound to a local address.
    NotBound,
    /// An acceptor is open but `listen()` has not succeeded.
    NotListening,
    /// The socket is not connected.
    NotConnected,
    /// The socket is already connected.
    AlreadyConnected,
    /// Conflicting operation already in flight on that slot.
    Busy,
    /// Peer orderly shutdown observed during a read.
    Eof,
    /// Peer closed (or zero progress) observed during a write.
    BrokenPipe,
    /// The OS reported a connection reset.
    ConnectionReset,
    /// A composed read exceeded its buffer cap before finding the delimiter.
    MessageSize,
    /// `with_timeout` expired naturally.
    TimedOut,
    /// Unexpected condition; a bug-class failure.
    InternalError,
}

impl Kind {
    fn as_str(self) -> &'static str {
        match self {
            Kind::OperationAborted => "operation aborted",
            Kind::NotImplemented => "not implemented",
            Kind::InvalidArgument => "invalid argument",
            Kind::InvalidEndpoint => "invalid endpoint",
            Kind::UnsupportedAddressFamily => "unsupported address family",
            Kind::NotOpen => "not open",
            Kind::NotBound => "not bound",
            Kind::NotListening => "not listening",
            Kind::NotConnected => "not connected",
            Kind::AlreadyConnected => "already connected",
            Kind::Busy => "busy",
            Kind::Eof => "end of file",
            Kind::BrokenPipe => "broken pipe",
            Kind::ConnectionReset => "connection reset",
            Kind::MessageSize => "message size exceeded",
            Kind::TimedOut => "timed out",
            Kind::InternalError => "internal error",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A runtime error: a [`Kind`] plus an optional OS-level cause.
#[derive(Debug)]
pub struct Error {
    kind: Kind,
    source: Option<io::Error>,
}

impl Error {
    /// Construct an error from a bare kind, with no OS cause.
    pub fn new(kind: Kind) -> Error {
        Error { kind, source: None }
    }

    /// Construct an error from a kind and the OS error that caused it.
    pub fn with_source(kind: Kind, source: io::Error) -> Error {
        Error {
            kind,
            source: Some(source),
        }
    }

    /// The error's kind.
    pub fn kind(&self) -> Kind {
        self.kind
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(src) => write!(f, "{}: {}", self.kind, src),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        let kind = match err.kind() {
            io::ErrorKind::ConnectionReset => Kind::ConnectionReset,
            io::ErrorKind::BrokenPipe => Kind::BrokenPipe,
            io::ErrorKind::NotConnected => Kind::NotConnected,
            io::ErrorKind::TimedOut => Kind::TimedOut,
            io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData => Kind::InvalidArgument,
            _ => {
                if let Some(raw) = err.raw_os_error() {
                    match raw {
                        libc::ECONNRESET => Kind::ConnectionReset,
                        libc::EPIPE => Kind::BrokenPipe,
                        libc::EADDRNOTAVAIL | libc::EAFNOSUPPORT => Kind::UnsupportedAddressFamily,
                        _ => Kind::InternalError,
                    }
                } else {
                    Kind::InternalError
                }
            }
        };
        Error::with_source(kind, err)
    }
}

impl From<Kind> for Error {
    fn from(kind: Kind) -> Error {
        Error::new(kind)
    }
}

/// Common result type for IO-style APIs, mirroring `iocoro::io_result<T>`.
pub type IoResult<T> = Result<T, Error>;

/// Result type for operations with no useful success value.
pub type VoidResult = Result<(), Error>;

/// Build a successful [`VoidResult`], mirroring `iocoro::ok()`.
#[inline]
pub fn ok() -> VoidResult {
    Ok(())
}

/// Build a failed [`VoidResult`] from a [`Kind`], mirroring `iocoro::fail()`.
#[inline]
pub fn fail(kind: Kind) -> VoidResult {
    Err(Error::new(kind))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_source() {
        let io_err = io::Error::new(io::ErrorKind::BrokenPipe, "pipe gone");
        let err = Error::from(io_err);
        assert_eq!(err.kind(), Kind::BrokenPipe);
        assert!(err.to_string().contains("pipe gone"));
    }

    #[test]
    fn bare_kind_has_no_source() {
        use std::error::Error as _;
        let err = Error::new(Kind::Busy);
        assert!(err.source().is_none());
        assert_eq!(err.to_string(), "busy");
    }
}
