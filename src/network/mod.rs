//! Transport stream reception over UDP, for streams delivered by an IP gateway
//! instead of a local tuner.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};

use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, info};

use crate::constants::{UDP_READ_TIMEOUT, UDP_RECV_BUFFER};
use crate::error::SourceError;
use crate::source::{Source, SourceProvider};
use crate::types::{ChannelConfig, FrontendStatus, TuningParams};

/// Creates and configures a UDP socket for TS packet reception
/// Handles both unicast and multicast addresses
pub fn create_udp_socket(sock_addr: SocketAddr) -> io::Result<Socket> {
    let ip = match sock_addr.ip() {
        IpAddr::V4(v4) => v4,
        IpAddr::V6(_) => {
            return Err(io::Error::new(io::ErrorKind::Unsupported, "only IPv4 is supported"));
        }
    };

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&sock_addr.into())?;

    // Join multicast group if the address is multicast
    if ip.is_multicast() {
        let iface = Ipv4Addr::UNSPECIFIED; // default interface
        socket.join_multicast_v4(&ip, &iface)?;
    }

    // blocking, but bounded so the producer still sees its stop flag
    socket.set_read_timeout(Some(UDP_READ_TIMEOUT))?;
    Ok(socket)
}

/// Datagram source; each datagram is handed out in caller-sized slices.
pub struct UdpSource {
    addr: SocketAddr,
    socket: UdpSocket,
    staging: Vec<u8>,
    start: usize,
    end: usize,
}

impl UdpSource {
    pub fn bind(addr: SocketAddr) -> Result<Self, SourceError> {
        let socket = create_udp_socket(addr).map_err(|source| SourceError::Open {
            path: addr.to_string(),
            source,
        })?;
        let socket: UdpSocket = socket.into();
        let addr = socket.local_addr().unwrap_or(addr);
        info!(%addr, "listening for transport stream");
        Ok(Self {
            addr,
            socket,
            staging: vec![0; UDP_RECV_BUFFER],
            start: 0,
            end: 0,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Source for UdpSource {
    fn name(&self) -> String {
        format!("udp://{}", self.addr)
    }

    fn tune(&mut self, params: &TuningParams) -> Result<(), SourceError> {
        debug!(addr = %self.addr, %params, "udp source ignores tuning");
        Ok(())
    }

    fn set_filters(&mut self) -> Result<(), SourceError> {
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, SourceError> {
        if self.start == self.end {
            match self.socket.recv(&mut self.staging) {
                Ok(n) => {
                    self.start = 0;
                    self.end = n;
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock
                            | io::ErrorKind::TimedOut
                            | io::ErrorKind::Interrupted
                    ) =>
                {
                    return Ok(0);
                }
                Err(e) => return Err(SourceError::Io(e)),
            }
        }
        let n = (self.end - self.start).min(buf.len());
        buf[..n].copy_from_slice(&self.staging[self.start..self.start + n]);
        self.start += n;
        Ok(n)
    }

    fn status(&mut self) -> Result<FrontendStatus, SourceError> {
        // a bound socket is as locked as it gets
        Ok(FrontendStatus(FrontendStatus::HAS_SIGNAL | FrontendStatus::HAS_LOCK))
    }
}

/// Channel with adapter index `n` listens on `base` port + `n`.
pub struct UdpProvider {
    base: SocketAddr,
}

impl UdpProvider {
    pub fn new(base: SocketAddr) -> Self {
        Self { base }
    }

    pub fn channel_addr(&self, adapter: u32) -> Option<SocketAddr> {
        let port = u16::try_from(u32::from(self.base.port()) + adapter).ok()?;
        Some(SocketAddr::new(self.base.ip(), port))
    }
}

impl SourceProvider for UdpProvider {
    fn open(&self, channel: &ChannelConfig) -> Result<Box<dyn Source>, SourceError> {
        let addr = self.channel_addr(channel.adapter).ok_or_else(|| SourceError::Open {
            path: format!("{}+{}", self.base, channel.adapter),
            source: io::Error::new(io::ErrorKind::InvalidInput, "port out of range"),
        })?;
        Ok(Box::new(UdpSource::bind(addr)?))
    }
}
