use crate::protocol::{Command, ReplyCode};
use std::io;

/// Result alias used across the library
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Error covers every way a single SOCKS5 session can fail. None of these
/// are fatal to the server itself.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("unsupported SOCKS version: {0}")]
    UnsupportedVersion(u8),

    #[error("no acceptable authentication method offered")]
    NoAcceptableMethod,

    #[error("unsupported username/password sub-negotiation version: {0}")]
    UnsupportedAuthVersion(u8),

    #[error("user authentication failed")]
    AuthFailed,

    #[error("unrecognized address type: {0}")]
    UnrecognizedAddrType(u8),

    #[error("invalid domain name: {0}")]
    InvalidDomain(#[from] std::string::FromUtf8Error),

    #[error("unsupported command: {0}")]
    UnsupportedCommand(u8),

    #[error("{command} to {dest} blocked by rules")]
    NotAllowed { command: Command, dest: String },

    #[error("failed to resolve destination '{host}': {source}")]
    Resolve { host: String, source: io::Error },

    #[error("connect to {dest} failed: {source}")]
    Dial { dest: String, source: io::Error },

    #[error("bind failed to accept a connection: {0}")]
    BindAccept(io::Error),

    #[error("bind timed out waiting for an inbound connection")]
    BindTimeout,

    #[error("client closed the connection")]
    ClientGone,

    #[error("client sent more than {0} bytes before its request was answered")]
    TooMuchEarlyData(usize),

    #[error("session cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    /// reply_code maps an error to the REP byte sent to the client, if the
    /// protocol state allows a reply for it at all
    pub fn reply_code(&self) -> Option<ReplyCode> {
        match self {
            Error::UnrecognizedAddrType(_) => Some(ReplyCode::AddrTypeUnsupported),
            Error::UnsupportedCommand(_) => Some(ReplyCode::CommandNotSupported),
            Error::NotAllowed { .. } => Some(ReplyCode::ConnectionNotAllowed),
            Error::Resolve { .. } => Some(ReplyCode::HostUnreachable),
            Error::Dial { source, .. } => Some(dial_reply_code(source)),
            Error::BindAccept(_) => Some(ReplyCode::ServerFailure),
            Error::BindTimeout => Some(ReplyCode::TtlExpired),
            _ => None,
        }
    }
}

/// dial_reply_code classifies an outbound connect failure
pub fn dial_reply_code(e: &io::Error) -> ReplyCode {
    match e.kind() {
        io::ErrorKind::ConnectionRefused => ReplyCode::ConnectionRefused,
        io::ErrorKind::NetworkUnreachable => ReplyCode::NetworkUnreachable,
        io::ErrorKind::HostUnreachable => ReplyCode::HostUnreachable,
        _ => ReplyCode::ServerFailure,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dial_errors_map_to_reply_codes() {
        let refused = io::Error::from(io::ErrorKind::ConnectionRefused);
        assert_eq!(dial_reply_code(&refused), ReplyCode::ConnectionRefused);

        let net = io::Error::from(io::ErrorKind::NetworkUnreachable);
        assert_eq!(dial_reply_code(&net), ReplyCode::NetworkUnreachable);

        let host = io::Error::from(io::ErrorKind::HostUnreachable);
        assert_eq!(dial_reply_code(&host), ReplyCode::HostUnreachable);

        let other = io::Error::from(io::ErrorKind::TimedOut);
        assert_eq!(dial_reply_code(&other), ReplyCode::ServerFailure);
    }

    #[test]
    fn only_reply_capable_errors_carry_a_code() {
        assert_eq!(
            Error::UnrecognizedAddrType(9).reply_code(),
            Some(ReplyCode::AddrTypeUnsupported)
        );
        assert_eq!(Error::UnsupportedVersion(4).reply_code(), None);
        assert_eq!(Error::AuthFailed.reply_code(), None);
        assert_eq!(Error::TooMuchEarlyData(1).reply_code(), None);
        let resolve = Error::Resolve {
            host: "nowhere.invalid".into(),
            source: io::Error::other("nxdomain"),
        };
        assert_eq!(resolve.reply_code(), Some(ReplyCode::HostUnreachable));
    }
}
