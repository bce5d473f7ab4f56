use crate::socket::ConnectionState;
use std::io;
use thiserror::Error;

/// AddressError is returned when a destination host cannot be
/// encoded into a SOCKS5 address field
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("domain name cannot be empty")]
    EmptyDomain,

    #[error("domain name too long: {0} bytes (max 255)")]
    DomainTooLong(usize),

    #[error("malformed IPv6 address: {0}")]
    MalformedIpv6(String),

    #[error("invalid destination {0:?}: expected host:port")]
    MissingPort(String),

    #[error("invalid port in {0:?}")]
    InvalidPort(String),
}

/// AuthError describes a rejected authentication method reply
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("unexpected SOCKS version number: {0}")]
    Version(u8),

    #[error("no acceptable authentication methods")]
    NoAcceptableMethods,

    #[error("unexpected SOCKS authentication method: {0}")]
    Method(u8),
}

/// ConnectReplyError describes a rejected or malformed CONNECT reply
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectReplyError {
    #[error("unexpected SOCKS version number: {0}")]
    Version(u8),

    /// Non-success REP field; `reason` comes from the fixed reply code table
    #[error("{reason}")]
    Rejected { code: u8, reason: &'static str },

    #[error("the reserved byte must be 0x00, got {0}")]
    Reserved(u8),

    #[error("unknown bound address type: {0}")]
    AddressType(u8),
}

/// ProxyError is the error type for every SOCKS5 client operation
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("{}", reentrant_message(*.0))]
    ReentrantConnect(ConnectionState),

    #[error("socket is not connected")]
    NotConnected,

    #[error("invalid destination: {0}")]
    InvalidDestination(#[from] AddressError),

    #[error("unable to write to SOCKS socket: {0}")]
    TransportWrite(#[source] io::Error),

    #[error("SOCKS authentication failed: {0}")]
    Authentication(#[from] AuthError),

    #[error("SOCKS connection failed: {0}")]
    ConnectReply(#[from] ConnectReplyError),

    #[error("SOCKS handshake already finished")]
    HandshakeFinished,

    #[error(transparent)]
    Transport(#[from] io::Error),
}

/// reentrant_message describes a `connect` call on a socket that has left `Idle`
fn reentrant_message(state: ConnectionState) -> String {
    match state {
        ConnectionState::Connecting | ConnectionState::Handshaking | ConnectionState::Connected => {
            format!("socket is already {state}")
        }
        ConnectionState::Idle | ConnectionState::Closed | ConnectionState::Failed => {
            "socket has already been used; create a new one".to_string()
        }
    }
}

/// HandshakeError is the subset of failures the handshake
/// state machine itself can produce
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandshakeError {
    #[error("SOCKS handshake already finished")]
    Finished,

    #[error(transparent)]
    Authentication(#[from] AuthError),

    #[error(transparent)]
    ConnectReply(#[from] ConnectReplyError),
}

impl From<HandshakeError> for ProxyError {
    fn from(err: HandshakeError) -> Self {
        match err {
            HandshakeError::Authentication(e) => ProxyError::Authentication(e),
            HandshakeError::ConnectReply(e) => ProxyError::ConnectReply(e),
            HandshakeError::Finished => ProxyError::HandshakeFinished,
        }
    }
}
