use shared::ProtocolError;
use std::io;
use thiserror::Error;

/// Every way a link can fail. The display text is meant to be shown to the
/// player as-is.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("connect timeout")]
    ConnectTimeout,

    #[error("accept timeout")]
    AcceptTimeout,

    #[error("connection refused")]
    ConnectionRefused,

    #[error("i/o error: {0}")]
    Io(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("peer closed the connection")]
    PeerDisconnected,

    #[error("timeout")]
    TimeoutDisconnected,

    #[error("endpoint is already active")]
    AlreadyActive,
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => TransportError::PeerDisconnected,
            io::ErrorKind::ConnectionRefused => TransportError::ConnectionRefused,
            _ => TransportError::Io(err.to_string()),
        }
    }
}

impl From<ProtocolError> for TransportError {
    fn from(err: ProtocolError) -> Self {
        TransportError::Protocol(err.to_string())
    }
}
