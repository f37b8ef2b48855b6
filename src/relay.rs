use crate::address::AddrSpec;
use crate::protocol::{MAX_DGRAM, RSV};
use crate::resolver::NameResolver;
use anyhow::{Result, anyhow, bail};
use std::collections::{HashSet, VecDeque};
use std::future::pending;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Remotes a single association remembers as allowed to answer
const MAX_CONTACTED: usize = 1024;

/// relay_tcp copies bytes both ways between the client and the target.
/// Whichever direction finishes first ends the whole relay: both write
/// halves are shut down and both streams are dropped.
pub async fn relay_tcp<C, T>(client: C, target: T, cancel: &CancellationToken) -> io::Result<()>
where
    C: AsyncRead + AsyncWrite,
    T: AsyncRead + AsyncWrite,
{
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut target_read, mut target_write) = tokio::io::split(target);

    let outcome = tokio::select! {
        res = tokio::io::copy(&mut client_read, &mut target_write) => {
            Some(("client -> target", res))
        }
        res = tokio::io::copy(&mut target_read, &mut client_write) => {
            Some(("target -> client", res))
        }
        _ = cancel.cancelled() => None,
    };

    let _ = client_write.shutdown().await;
    let _ = target_write.shutdown().await;

    match outcome {
        Some((direction, Ok(bytes))) => {
            info!("relay closed: {direction} ended after {bytes} bytes");
            Ok(())
        }
        Some((direction, Err(e))) => {
            debug!("relay {direction} failed: {e}");
            Err(e)
        }
        None => {
            debug!("relay cancelled");
            Ok(())
        }
    }
}

/// UdpAssociation relays datagrams for one UDP ASSOCIATE. It owns the
/// client-facing socket; dropping the association releases it.
pub struct UdpAssociation {
    socket: UdpSocket,
    client_ip: IpAddr,
    resolver: Arc<dyn NameResolver>,
}

/// UdpAssociation implementation block
impl UdpAssociation {
    pub fn new(socket: UdpSocket, client_ip: IpAddr, resolver: Arc<dyn NameResolver>) -> Self {
        Self {
            socket,
            client_ip,
            resolver,
        }
    }

    /// run relays until `cancel` fires or the client-facing socket fails
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let server_addr = self.socket.local_addr()?;

        // One outbound socket per address family
        let outbound_v4 = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        let outbound_v6 = match UdpSocket::bind((Ipv6Addr::UNSPECIFIED, 0)).await {
            Ok(sock) => Some(sock),
            Err(e) => {
                debug!("no IPv6 outbound socket for UDP relay: {e}");
                None
            }
        };

        let mut client_buf = vec![0u8; MAX_DGRAM];
        let mut v4_buf = vec![0u8; MAX_DGRAM];
        let mut v6_buf = vec![0u8; MAX_DGRAM];

        // Client UDP source, learned from the first accepted datagram
        let mut client_addr: Option<SocketAddr> = None;
        // Remotes the client has sent to; only they may answer
        let mut contacted = RecentRemotes::new(MAX_CONTACTED);

        info!("UDP relay started on {server_addr}");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("UDP relay on {server_addr} stopped");
                    break;
                }

                // Client -> server
                incoming = self.socket.recv_from(&mut client_buf) => {
                    let (len, src) = incoming?;

                    // As per RFC 1928 the source must be the host that
                    // opened the control connection
                    if src.ip() != self.client_ip {
                        warn!("rejected UDP from unauthorized client: {src}");
                        continue;
                    }

                    let packet = &client_buf[..len];
                    let forward = self.forward(packet, &outbound_v4, outbound_v6.as_ref());
                    let forward = cancel.run_until_cancelled(forward).await;

                    match forward {
                        Some(Ok(Some(target))) => {
                            client_addr = Some(src);
                            contacted.insert(target);
                        }
                        Some(Ok(None)) => {}
                        Some(Err(e)) => debug!("dropped datagram from {src}: {e}"),
                        None => break,
                    }
                }

                // Target -> server -> client
                reply = outbound_v4.recv_from(&mut v4_buf) => {
                    let (len, from) = reply?;
                    self.send_back(&v4_buf[..len], from, client_addr, &contacted).await;
                }

                reply = recv_optional(outbound_v6.as_ref(), &mut v6_buf) => {
                    let (len, from) = reply?;
                    self.send_back(&v6_buf[..len], from, client_addr, &contacted).await;
                }
            }
        }

        Ok(())
    }

    /// forward strips the SOCKS5 header from a client datagram and sends the
    /// payload on. Returns the target it was sent to, or None if dropped.
    async fn forward(
        &self,
        packet: &[u8],
        outbound_v4: &UdpSocket,
        outbound_v6: Option<&UdpSocket>,
    ) -> Result<Option<SocketAddr>> {
        let Some((mut dest, data)) = parse_datagram(packet)? else {
            return Ok(None);
        };

        if dest.needs_resolution() {
            let host = dest.fqdn.clone().unwrap_or_default();
            let (_, ip) = self
                .resolver
                .resolve(&host)
                .await
                .map_err(|e| anyhow!("failed to resolve host '{host}': {e}"))?;
            dest.ip = Some(ip);
        }

        let target = dest
            .socket_addr()
            .ok_or_else(|| anyhow!("datagram destination has no address"))?;

        let socket = match target {
            SocketAddr::V4(_) => outbound_v4,
            SocketAddr::V6(_) => outbound_v6.ok_or_else(|| anyhow!("IPv6 relay unavailable"))?,
        };

        socket.send_to(data, target).await?;
        debug!("forwarded {} bytes to {dest}", data.len());

        Ok(Some(target))
    }

    /// send_back wraps a remote's reply and returns it to the client
    async fn send_back(
        &self,
        data: &[u8],
        from: SocketAddr,
        client_addr: Option<SocketAddr>,
        contacted: &RecentRemotes,
    ) {
        let Some(client_addr) = client_addr else {
            debug!("dropping datagram from {from}: no client yet");
            return;
        };

        if !contacted.contains(&from) {
            debug!("dropping datagram from unexpected remote {from}");
            return;
        }

        let packet = create_response_packet(data, from);
        match self.socket.send_to(&packet, client_addr).await {
            Ok(_) => debug!("sent {} bytes from {from} to client {client_addr}", data.len()),
            Err(e) => warn!("error sending response to client {client_addr}: {e}"),
        }
    }
}

/// RecentRemotes remembers the most recent remotes a client has sent to.
/// Once full, the oldest remote is forgotten.
pub(crate) struct RecentRemotes {
    limit: usize,
    order: VecDeque<SocketAddr>,
    members: HashSet<SocketAddr>,
}

impl RecentRemotes {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            limit,
            order: VecDeque::new(),
            members: HashSet::new(),
        }
    }

    pub(crate) fn insert(&mut self, addr: SocketAddr) {
        if !self.members.insert(addr) {
            return;
        }
        self.order.push_back(addr);

        while self.order.len() > self.limit {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
            }
        }
    }

    pub(crate) fn contains(&self, addr: &SocketAddr) -> bool {
        self.members.contains(addr)
    }
}

async fn recv_optional(
    socket: Option<&UdpSocket>,
    buf: &mut [u8],
) -> io::Result<(usize, SocketAddr)> {
    match socket {
        Some(socket) => socket.recv_from(buf).await,
        None => pending().await,
    }
}

/// parse_datagram splits a client datagram into destination and payload.
/// Fragments are not supported and come back as None.
pub fn parse_datagram(packet: &[u8]) -> Result<Option<(AddrSpec, &[u8])>> {
    // SOCKS5 UDP Request Header
    // +----+------+------+----------+----------+----------+
    // |RSV | FRAG | ATYP | DST.ADDR | DST.PORT |   DATA   |
    // +----+------+------+----------+----------+----------+
    // | 2  |  1   |  1   | Variable |    2     | Variable |
    // +----+------+------+----------+----------+----------+

    if packet.len() < 4 {
        bail!("UDP packet too short");
    }

    if packet[2] != 0x00 {
        debug!("dropping fragmented datagram (FRAG={})", packet[2]);
        return Ok(None);
    }

    let (dest, consumed) = AddrSpec::parse(&packet[3..])?;
    Ok(Some((dest, &packet[3 + consumed..])))
}

/// create_response_packet builds the datagram returned to the client
pub fn create_response_packet(data: &[u8], from_addr: SocketAddr) -> Vec<u8> {
    // RSV -> 2 bytes, FRAG -> 1 byte
    let mut packet = vec![RSV, RSV, 0x00];
    AddrSpec::from(from_addr).encode(&mut packet);
    packet.extend_from_slice(data);
    packet
}
