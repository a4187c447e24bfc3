//! Crate-wide error kinds.
//!
//! Each module that needs its own failure modes defines them locally (see
//! `packet::Error`, `crypto::Error`); this is the aggregate type returned
//! from the handful of call sites a host actually touches: `dial` and
//! `listen`.

/// Top-level error returned from `client::dial` and `server::listen`.
#[derive(Debug)]
pub enum Error {
    /// Binding or configuring the UDP socket failed.
    Socket(std::io::Error),

    /// The handshake did not complete within `handshake_timeout_s`.
    HandshakeTimeout,

    /// The handshake completed but produced an invalid key (low-order point).
    LowOrderPoint,

    /// The wire packet was rejected during the handshake (bad version,
    /// truncated, wrong flags).
    BadPacket(crate::packet::Error),

    /// Key derivation or AEAD setup failed.
    Crypto(crate::crypto::Error),

    /// `Config::validate` rejected the configuration outright (reserved for
    /// combinations that cannot be clamped, e.g. padding_min > padding_max
    /// after defaulting still inverted).
    ConfigInvalid(&'static str),

    /// The session or socket was already closed.
    Closed,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::Socket(e) => write!(f, "socket error: {e}"),
            Error::HandshakeTimeout => write!(f, "handshake timed out"),
            Error::LowOrderPoint => write!(f, "ECDH produced a low-order (all-zero) shared secret"),
            Error::BadPacket(e) => write!(f, "bad packet during handshake: {e}"),
            Error::Crypto(e) => write!(f, "crypto error: {e}"),
            Error::ConfigInvalid(reason) => write!(f, "invalid config: {reason}"),
            Error::Closed => write!(f, "session closed"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Socket(e) => Some(e),
            Error::BadPacket(e) => Some(e),
            Error::Crypto(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Socket(e)
    }
}

impl From<crate::packet::Error> for Error {
    fn from(e: crate::packet::Error) -> Self {
        Error::BadPacket(e)
    }
}

impl From<crate::crypto::Error> for Error {
    fn from(e: crate::crypto::Error) -> Self {
        Error::Crypto(e)
    }
}
