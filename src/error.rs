use std::error::Error as StdError;
use std::{fmt, io};

/// Ways a client run can fail, one kind per phase of the run.
///
/// Every failure is terminal for the run it occurs in: the phase that hit
/// it is named in the rendered message and no later phase is entered.
#[non_exhaustive]
#[derive(Debug)]
pub enum Error {
    /// The hostname/port pair did not resolve to any usable address.
    Resolution(String),

    /// The trust anchor bundle could not be loaded, or a TLS
    /// configuration could not be built from it.
    Config(String),

    /// TCP connection establishment failed for every candidate address.
    /// Carries the last transport error observed.
    Connect(io::Error),

    /// The TLS handshake failed, including certificate validation
    /// failures.
    Handshake(HandshakeFailed),

    /// The request could not be written to the peer.
    Write(io::Error),

    /// The reply could not be read. An orderly close before the full
    /// reply arrived lands here too.
    Read(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resolution(msg) => write!(f, "Resolution failed: {msg}"),
            Self::Config(msg) => write!(f, "Configuration failed: {msg}"),
            Self::Connect(err) => write!(f, "Connect failed: {err}"),
            Self::Handshake(err) => write!(f, "Handshake failed: {err}"),
            Self::Write(err) => write!(f, "Write failed: {err}"),
            Self::Read(err) => write!(f, "Read failed: {err}"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Resolution(_) | Self::Config(_) => None,
            Self::Connect(err) | Self::Write(err) | Self::Read(err) => Some(err),
            Self::Handshake(err) => err.source(),
        }
    }
}

/// What went wrong inside a failed handshake.
#[non_exhaustive]
#[derive(Debug)]
pub enum HandshakeFailed {
    /// TLS protocol or certificate validation failure.
    Tls(rustls::Error),
    /// The underlying transport failed mid-handshake.
    Transport(io::Error),
    /// The peer closed the connection before the handshake finished.
    PeerClosed,
}

impl fmt::Display for HandshakeFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tls(err) => err.fmt(f),
            Self::Transport(err) => err.fmt(f),
            Self::PeerClosed => f.write_str("peer closed the connection"),
        }
    }
}

impl HandshakeFailed {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Tls(err) => Some(err),
            Self::Transport(err) => Some(err),
            Self::PeerClosed => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_phase_context() {
        let err = Error::Connect(io::Error::new(
            io::ErrorKind::ConnectionRefused,
            "connection refused",
        ));
        assert_eq!(err.to_string(), "Connect failed: connection refused");

        let err = Error::Handshake(HandshakeFailed::PeerClosed);
        assert_eq!(
            err.to_string(),
            "Handshake failed: peer closed the connection"
        );

        let err = Error::Resolution("example.invalid:443 resolved to no addresses".into());
        assert!(err.to_string().starts_with("Resolution failed: "));
    }

    #[test]
    fn sources_are_preserved() {
        let err = Error::Read(io::Error::new(io::ErrorKind::UnexpectedEof, "eof"));
        assert!(err.source().is_some());
        assert!(Error::Config("no anchors".into()).source().is_none());
    }
}
