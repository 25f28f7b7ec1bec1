use std::io;
use std::net;

pub type NetworkResult<T> = Result<T, NetworkError>;

/// Error taxonomy shared by every transport. `Wait` covers any condition
/// that should simply be retried on the next poll (no data yet, would
/// block); everything else is `Fatal` and drives a phase transition.
#[derive(Debug, Eq, PartialEq)]
pub enum NetworkError {
    Wait,
    Fatal(ErrorType),
}

#[derive(Debug, Eq, PartialEq)]
pub enum ErrorType {
    InvalidArgument,
    AlreadySessionActive,
    SocketSetup(String),
    HandshakeTimeout,
    PeerDisconnected,
    StallTimeout,
    IdleTimeout,
    ProtocolError,
    StateSizeMismatch,
    CoreNotSupported,
    AddrParse,
    Io(io::ErrorKind),
}

impl From<io::Error> for NetworkError {
    #[inline]
    fn from(io_error: io::Error) -> Self {
        match io_error.kind() {
            io::ErrorKind::WouldBlock => NetworkError::Wait,
            kind => NetworkError::Fatal(ErrorType::Io(kind)),
        }
    }
}

impl From<net::AddrParseError> for NetworkError {
    #[inline]
    fn from(_: net::AddrParseError) -> Self {
        NetworkError::Fatal(ErrorType::AddrParse)
    }
}

/// Lets call sites write `if result.has_failed() { ... }` without having to
/// match out the non-fatal `Wait` case every time.
pub trait ErrorUtils {
    fn has_failed(&self) -> bool;
}

impl<T> ErrorUtils for NetworkResult<T> {
    fn has_failed(&self) -> bool {
        match self {
            Ok(_) => false,
            Err(NetworkError::Wait) => false,
            _ => true,
        }
    }
}
