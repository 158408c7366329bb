use std::{
    io::{self, Write as _},
    net::{Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, TcpStream, UdpSocket},
};

use super::{Connection, ForwarderConfiguration, Protocol, TransportError};

enum Client {
    Udp(UdpSocket),
    Tcp(TcpStream),
}

impl Client {
    fn from_forwarder_config(config: &ForwarderConfiguration) -> io::Result<Self> {
        let addrs = config.remote_addr.resolve()?;
        match config.protocol {
            Protocol::Udp => connect_any(&addrs, |addr| {
                let local = if addr.is_ipv4() {
                    SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
                } else {
                    SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
                };

                UdpSocket::bind(local).and_then(|socket| {
                    socket.connect(addr)?;
                    socket.set_write_timeout(Some(config.write_timeout))?;
                    Ok(Client::Udp(socket))
                })
            }),

            Protocol::Tcp => connect_any(&addrs, |addr| {
                TcpStream::connect_timeout(addr, config.write_timeout).and_then(|socket| {
                    socket.set_write_timeout(Some(config.write_timeout))?;
                    socket.set_nodelay(true)?;
                    Ok(Client::Tcp(socket))
                })
            }),
        }
    }

    fn send(&mut self, buf: &[u8]) -> io::Result<()> {
        match self {
            Client::Udp(socket) => {
                let sent = socket.send(buf)?;
                if sent < buf.len() {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        format!("datagram truncated ({sent} of {} bytes sent)", buf.len()),
                    ));
                }
                Ok(())
            }
            Client::Tcp(socket) => socket.write_all(buf),
        }
    }

    fn close(self) -> io::Result<()> {
        match self {
            Client::Udp(_) => Ok(()),
            Client::Tcp(socket) => match socket.shutdown(Shutdown::Both) {
                // The peer already went away, which is as closed as it gets.
                Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
                result => result,
            },
        }
    }
}

/// Tries each resolved address in turn, returning the first client that connects.
fn connect_any<F>(addrs: &[SocketAddr], mut connect: F) -> io::Result<Client>
where
    F: FnMut(&SocketAddr) -> io::Result<Client>,
{
    let mut last_error = None;
    for addr in addrs {
        match connect(addr) {
            Ok(client) => return Ok(client),
            Err(e) => last_error = Some(e),
        }
    }

    Err(last_error.unwrap_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no addresses to connect to")))
}

/// A [`Connection`] over a UDP socket or a TCP stream.
///
/// The destination is resolved every time the connection is opened. UDP sockets are bound to an ephemeral local port
/// and connected to the destination, so that each payload is sent as exactly one datagram. TCP streams have Nagle's
/// algorithm disabled, as payloads are already batched before they are written.
pub struct SocketConnection {
    config: ForwarderConfiguration,
    client: Option<Client>,
}

impl SocketConnection {
    pub(crate) fn new(config: ForwarderConfiguration) -> Self {
        SocketConnection { config, client: None }
    }
}

impl Connection for SocketConnection {
    fn connect(&mut self) -> Result<(), TransportError> {
        if self.client.is_some() {
            return Err(TransportError::AlreadyConnected);
        }

        let client = Client::from_forwarder_config(&self.config).map_err(|source| TransportError::Connect {
            destination: self.config.remote_addr.to_string(),
            source,
        })?;
        self.client = Some(client);
        Ok(())
    }

    fn send(&mut self, payload: &[u8]) -> io::Result<()> {
        match self.client.as_mut() {
            Some(client) => client.send(payload),
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "connection is not open")),
        }
    }

    fn close(&mut self) -> io::Result<()> {
        match self.client.take() {
            Some(client) => client.close(),
            None => Ok(()),
        }
    }

    fn transport_id(&self) -> &'static str {
        self.config.protocol.transport_id()
    }
}
