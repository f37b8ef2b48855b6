use crate::error::{Error, Result};
use crate::protocol::AddressType;
use std::fmt;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::io::{AsyncRead, AsyncReadExt};

/// AddrSpec is an endpoint as it appears on the wire: either a domain name
/// or an IP address, plus a port. Once a domain has been resolved both
/// `fqdn` and `ip` are set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AddrSpec {
    pub fqdn: Option<String>,
    pub ip: Option<IpAddr>,
    pub port: u16,
}

impl AddrSpec {
    pub fn from_ip(ip: IpAddr, port: u16) -> Self {
        Self {
            fqdn: None,
            ip: Some(ip),
            port,
        }
    }

    pub fn from_fqdn(fqdn: impl Into<String>, port: u16) -> Self {
        Self {
            fqdn: Some(fqdn.into()),
            ip: None,
            port,
        }
    }

    /// unspecified is 0.0.0.0:0, used in replies that carry no address
    pub fn unspecified() -> Self {
        Self::from_ip(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)
    }

    /// socket_addr returns the dialable address once an IP is known
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        self.ip.map(|ip| SocketAddr::new(ip, self.port))
    }

    /// needs_resolution is true for a domain that has no IP yet
    pub fn needs_resolution(&self) -> bool {
        self.ip.is_none() && self.fqdn.is_some()
    }

    /// address returns "host:port" suitable for dialing, preferring the IP
    pub fn address(&self) -> String {
        match (&self.ip, &self.fqdn) {
            (Some(ip), _) => SocketAddr::new(*ip, self.port).to_string(),
            (None, Some(fqdn)) => format!("{fqdn}:{}", self.port),
            (None, None) => format!("0.0.0.0:{}", self.port),
        }
    }

    /// address_type reports how this address is encoded on the wire
    pub fn address_type(&self) -> AddressType {
        match (&self.ip, &self.fqdn) {
            (Some(IpAddr::V4(_)), _) => AddressType::IPv4,
            (Some(IpAddr::V6(_)), _) => AddressType::IPv6,
            (None, Some(_)) => AddressType::DomainName,
            (None, None) => AddressType::IPv4,
        }
    }

    /// read_from parses ATYP, DST.ADDR and DST.PORT from a client stream
    pub async fn read_from<R>(reader: &mut R) -> Result<Self>
    where
        R: AsyncRead + Unpin,
    {
        // Read address type byte from stream
        let mut atype = [0u8; 1];
        reader.read_exact(&mut atype).await?;

        let spec = match AddressType::from_byte(atype[0]) {
            Some(AddressType::IPv4) => {
                let mut addr = [0u8; 4];
                reader.read_exact(&mut addr).await?;
                let port = read_port(reader).await?;
                Self::from_ip(IpAddr::V4(Ipv4Addr::from(addr)), port)
            }
            Some(AddressType::DomainName) => {
                // First octet in DomainName contains the number of
                // octets to follow
                let mut len = [0u8; 1];
                reader.read_exact(&mut len).await?;
                if len[0] == 0 {
                    return Err(empty_domain());
                }

                let mut domain = vec![0u8; len[0] as usize];
                reader.read_exact(&mut domain).await?;
                let domain = String::from_utf8(domain)?;

                let port = read_port(reader).await?;
                Self::from_fqdn(domain, port)
            }
            Some(AddressType::IPv6) => {
                let mut addr = [0u8; 16];
                reader.read_exact(&mut addr).await?;
                let port = read_port(reader).await?;
                Self::from_ip(IpAddr::V6(Ipv6Addr::from(addr)), port)
            }
            None => return Err(Error::UnrecognizedAddrType(atype[0])),
        };

        Ok(spec)
    }

    /// parse decodes an address from a datagram slice that starts at ATYP.
    /// Returns the address and the number of bytes consumed.
    pub fn parse(data: &[u8]) -> Result<(Self, usize)> {
        let Some(&atyp) = data.first() else {
            return Err(truncated("address type"));
        };

        // Offset starts after ATYP
        let mut offset = 1;

        let spec = match AddressType::from_byte(atyp) {
            Some(AddressType::IPv4) => {
                let ip: [u8; 4] = take(data, &mut offset, 4)?
                    .try_into()
                    .map_err(|_| truncated("IPv4 address"))?;
                let port = take_port(data, &mut offset)?;
                Self::from_ip(IpAddr::V4(Ipv4Addr::from(ip)), port)
            }
            Some(AddressType::DomainName) => {
                let len = take(data, &mut offset, 1)?[0] as usize;
                if len == 0 {
                    return Err(empty_domain());
                }
                let domain = String::from_utf8(take(data, &mut offset, len)?.to_vec())?;
                let port = take_port(data, &mut offset)?;
                Self::from_fqdn(domain, port)
            }
            Some(AddressType::IPv6) => {
                let ip: [u8; 16] = take(data, &mut offset, 16)?
                    .try_into()
                    .map_err(|_| truncated("IPv6 address"))?;
                let port = take_port(data, &mut offset)?;
                Self::from_ip(IpAddr::V6(Ipv6Addr::from(ip)), port)
            }
            None => return Err(Error::UnrecognizedAddrType(atyp)),
        };

        Ok((spec, offset))
    }

    /// encode appends ATYP, ADDR and PORT in wire format. A resolved address
    /// is always encoded by IP.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        match (&self.ip, &self.fqdn) {
            (Some(IpAddr::V4(ip)), _) => {
                buf.push(AddressType::IPv4 as u8);
                buf.extend_from_slice(&ip.octets());
            }
            (Some(IpAddr::V6(ip)), _) => {
                buf.push(AddressType::IPv6 as u8);
                buf.extend_from_slice(&ip.octets());
            }
            (None, Some(fqdn)) if fqdn.len() <= u8::MAX as usize => {
                buf.push(AddressType::DomainName as u8);
                buf.push(fqdn.len() as u8);
                buf.extend_from_slice(fqdn.as_bytes());
            }
            // Nothing encodable: report the unspecified address
            _ => {
                buf.push(AddressType::IPv4 as u8);
                buf.extend_from_slice(&Ipv4Addr::UNSPECIFIED.octets());
            }
        }

        // Port in BE -> 2 bytes
        buf.extend_from_slice(&self.port.to_be_bytes());
    }
}

impl From<SocketAddr> for AddrSpec {
    fn from(addr: SocketAddr) -> Self {
        Self::from_ip(addr.ip(), addr.port())
    }
}

impl fmt::Display for AddrSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.fqdn, &self.ip) {
            (Some(fqdn), Some(ip)) => write!(f, "{fqdn} ({ip}):{}", self.port),
            _ => f.write_str(&self.address()),
        }
    }
}

async fn read_port<R>(reader: &mut R) -> Result<u16>
where
    R: AsyncRead + Unpin,
{
    let mut port_buf = [0u8; 2];
    reader.read_exact(&mut port_buf).await?;
    Ok(u16::from_be_bytes(port_buf))
}

fn take<'a>(data: &'a [u8], offset: &mut usize, len: usize) -> Result<&'a [u8]> {
    let end = *offset + len;
    let slice = data.get(*offset..end).ok_or_else(|| truncated("address"))?;
    *offset = end;
    Ok(slice)
}

fn take_port(data: &[u8], offset: &mut usize) -> Result<u16> {
    let bytes = take(data, offset, 2)?;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

fn empty_domain() -> Error {
    Error::Io(io::Error::new(
        io::ErrorKind::InvalidData,
        "domain length cannot be 0",
    ))
}

fn truncated(what: &str) -> Error {
    Error::Io(io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!("not enough data for {what}"),
    ))
}
