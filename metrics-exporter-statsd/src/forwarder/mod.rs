use std::{
    fmt, io,
    net::{SocketAddr, ToSocketAddrs as _},
    str::FromStr,
    time::Duration,
};

use thiserror::Error;

use crate::config::BuildError;

mod client;
pub use self::client::SocketConnection;

pub mod sync;

/// Network protocol used to reach the StatsD server.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Protocol {
    /// One datagram per payload.
    #[default]
    Udp,

    /// A stream connection, opened at the start of each report and closed at the end of it.
    Tcp,
}

impl Protocol {
    /// Returns the transport ID for the protocol, as used in logs and telemetry labels.
    pub const fn transport_id(self) -> &'static str {
        match self {
            Protocol::Udp => "udp",
            Protocol::Tcp => "tcp",
        }
    }
}

impl FromStr for Protocol {
    type Err = BuildError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            p if p.eq_ignore_ascii_case("udp") => Ok(Protocol::Udp),
            p if p.eq_ignore_ascii_case("tcp") => Ok(Protocol::Tcp),
            _ => Err(BuildError::InvalidProtocol { protocol: s.to_owned() }),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.transport_id())
    }
}

/// A `host:port` destination.
///
/// The host is only resolved when connecting, so that a server which moves between report cycles is picked up.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct RemoteAddr {
    host: String,
    port: u16,
}

impl RemoteAddr {
    /// Resolves the destination to the addresses it currently points at.
    pub fn resolve(&self) -> io::Result<Vec<SocketAddr>> {
        let addrs: Vec<SocketAddr> = (self.host.as_str(), self.port).to_socket_addrs()?.collect();
        if addrs.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("'{}' did not resolve to any address", self.host),
            ));
        }
        Ok(addrs)
    }
}

impl<'a> TryFrom<&'a str> for RemoteAddr {
    type Error = String;

    fn try_from(addr: &'a str) -> Result<Self, Self::Error> {
        let (host, port) =
            addr.rsplit_once(':').ok_or_else(|| format!("'{addr}' is missing a port (expected 'host:port')"))?;

        // Bracketed IPv6 literals, such as `[::1]:8125`.
        let host = host.strip_prefix('[').and_then(|h| h.strip_suffix(']')).unwrap_or(host);
        if host.is_empty() {
            return Err(format!("'{addr}' is missing a host (expected 'host:port')"));
        }

        let port = port.parse::<u16>().map_err(|e| format!("invalid port '{port}': {e}"))?;
        if port == 0 {
            return Err(format!("invalid port '{port}': must be non-zero"));
        }

        Ok(RemoteAddr { host: host.to_owned(), port })
    }
}

impl fmt::Display for RemoteAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Forwarder configuration.
#[derive(Clone, Debug)]
pub(crate) struct ForwarderConfiguration {
    pub remote_addr: RemoteAddr,
    pub protocol: Protocol,
    pub max_payload_len: usize,
    pub write_timeout: Duration,
}

impl ForwarderConfiguration {
    /// Returns `true` if every line needs a trailing newline on the wire.
    ///
    /// Stream transports have no datagram boundaries, so the server can only tell where the last line of a write ends
    /// if it is terminated.
    pub fn requires_line_terminator(&self) -> bool {
        matches!(self.protocol, Protocol::Tcp)
    }
}

/// Errors that could occur while moving lines to the StatsD server.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The connection could not be established, so nothing was sent.
    #[error("failed to connect to {destination}")]
    Connect {
        /// The destination that could not be reached.
        destination: String,

        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// One or more payloads could not be sent.
    ///
    /// Sending is best-effort: the remaining payloads of the report were still attempted.
    #[error("failed to send {packets_dropped} packet(s) holding {lines_dropped} line(s)")]
    Send {
        /// Number of payloads that were dropped.
        packets_dropped: usize,

        /// Number of lines contained in the dropped payloads.
        lines_dropped: usize,

        /// The last I/O error that was encountered.
        #[source]
        source: io::Error,
    },

    /// `connect` was called on a connection that is already open.
    #[error("connection is already open")]
    AlreadyConnected,
}

/// A connection to a StatsD server.
///
/// Connections follow a strict discipline: `connect` once, any number of `send` calls, then `close`. Calling `connect`
/// again before `close` fails with [`TransportError::AlreadyConnected`].
pub trait Connection: Send {
    /// Opens the connection.
    ///
    /// # Errors
    ///
    /// If the connection is already open, [`TransportError::AlreadyConnected`] is returned. If the destination cannot
    /// be resolved or reached, [`TransportError::Connect`] is returned.
    fn connect(&mut self) -> Result<(), TransportError>;

    /// Sends a single payload, as one datagram or one stream write.
    ///
    /// # Errors
    ///
    /// If the payload could not be sent in full, an error is returned.
    fn send(&mut self, payload: &[u8]) -> io::Result<()>;

    /// Closes the connection.
    ///
    /// Closing a connection that is not open does nothing.
    ///
    /// # Errors
    ///
    /// If the underlying socket fails to shut down cleanly, an error is returned. The connection is considered closed
    /// either way.
    fn close(&mut self) -> io::Result<()>;

    /// Returns the transport ID of the connection, such as `udp`.
    fn transport_id(&self) -> &'static str;
}
