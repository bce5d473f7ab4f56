use crate::error::{AddressError, ConnectReplyError};
use crate::protocol::AddressType;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;

/// Longest domain name that fits behind the single length octet
pub const MAX_DOMAIN_LEN: usize = 255;

/// ProxyEndpoint identifies the SOCKS5 proxy to dial
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyEndpoint {
    pub host: String,
    pub port: u16,
}

/// ProxyEndpoint implementation block
impl ProxyEndpoint {
    /// new is a constructor for the ProxyEndpoint type
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

/// Defaults to a local Tor SOCKS port
impl Default for ProxyEndpoint {
    fn default() -> Self {
        Self::new("localhost", 9050)
    }
}

impl fmt::Display for ProxyEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_host_port(f, &self.host, self.port)
    }
}

impl FromStr for ProxyEndpoint {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = split_host_port(s)?;
        Ok(Self::new(host, port))
    }
}

/// Destination is the target the caller wants to reach through the proxy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub host: String,
    pub port: u16,
}

/// Destination implementation block
impl Destination {
    /// new is a constructor for the Destination type
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// address_type classifies the host by its syntactic form
    pub fn address_type(&self) -> Result<AddressType, AddressError> {
        address_type(&self.host)
    }

    /// encode appends ATYP, DST.ADDR and DST.PORT to `buf` and returns
    /// the address type that was written
    pub fn encode(&self, buf: &mut Vec<u8>) -> Result<AddressType, AddressError> {
        let atyp = encode_address(&self.host, buf)?;
        buf.extend_from_slice(&self.port.to_be_bytes());
        Ok(atyp)
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_host_port(f, &self.host, self.port)
    }
}

impl FromStr for Destination {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = split_host_port(s)?;
        Ok(Self::new(host, port))
    }
}

/// BoundAddress is the BND.ADDR/BND.PORT pair echoed in a CONNECT reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoundAddress {
    Ip(SocketAddr),
    Domain(String, u16),
}

impl fmt::Display for BoundAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoundAddress::Ip(addr) => write!(f, "{addr}"),
            BoundAddress::Domain(host, port) => write!(f, "{host}:{port}"),
        }
    }
}

/// Host is a destination host after syntactic classification
enum Host<'a> {
    V4(Ipv4Addr),
    V6(Ipv6Addr),
    Domain(&'a str),
}

fn classify(host: &str) -> Result<Host<'_>, AddressError> {
    if let Ok(ip) = host.parse::<Ipv4Addr>() {
        Ok(Host::V4(ip))
    } else if let Ok(ip) = host.parse::<Ipv6Addr>() {
        Ok(Host::V6(ip))
    } else if host.contains(':') {
        // Only IPv6 literals may contain colons
        Err(AddressError::MalformedIpv6(host.to_string()))
    } else {
        Ok(Host::Domain(host))
    }
}

/// address_type determines how a host will be encoded without
/// performing any name resolution
pub fn address_type(host: &str) -> Result<AddressType, AddressError> {
    Ok(match classify(host)? {
        Host::V4(_) => AddressType::IPv4,
        Host::V6(_) => AddressType::IPv6,
        Host::Domain(_) => AddressType::DomainName,
    })
}

/// encode_address appends the ATYP tag followed by the encoded address
/// bytes to `buf`. The port is left to the caller
pub fn encode_address(host: &str, buf: &mut Vec<u8>) -> Result<AddressType, AddressError> {
    // DST.ADDR by type
    // IPv4:   | 0x01 | 4 octets              |
    // Domain: | 0x03 | len | 1 to 255 octets |
    // IPv6:   | 0x04 | 16 octets             |
    match classify(host)? {
        Host::V4(ip) => {
            buf.push(AddressType::IPv4 as u8);
            encode_ipv4(ip, buf);
            Ok(AddressType::IPv4)
        }
        Host::V6(ip) => {
            buf.push(AddressType::IPv6 as u8);
            encode_ipv6(ip, buf);
            Ok(AddressType::IPv6)
        }
        Host::Domain(domain) => {
            // Validate before the tag is pushed so a rejected host
            // leaves the buffer untouched
            check_domain(domain)?;
            buf.push(AddressType::DomainName as u8);
            encode_domain(domain, buf)?;
            Ok(AddressType::DomainName)
        }
    }
}

/// encode_ipv4 writes the four octets in dotted-decimal order
pub fn encode_ipv4(ip: Ipv4Addr, buf: &mut Vec<u8>) {
    buf.extend_from_slice(&ip.octets());
}

/// encode_ipv6 writes the fully expanded 16 byte address
pub fn encode_ipv6(ip: Ipv6Addr, buf: &mut Vec<u8>) {
    buf.extend_from_slice(&ip.octets());
}

/// encode_domain writes the length octet followed by the raw name bytes
pub fn encode_domain(domain: &str, buf: &mut Vec<u8>) -> Result<(), AddressError> {
    let len = check_domain(domain)?;
    buf.push(len);
    buf.extend_from_slice(domain.as_bytes());
    Ok(())
}

fn check_domain(domain: &str) -> Result<u8, AddressError> {
    match domain.len() {
        0 => Err(AddressError::EmptyDomain),
        len if len > MAX_DOMAIN_LEN => Err(AddressError::DomainTooLong(len)),
        len => Ok(len as u8),
    }
}

/// decode_bound_address parses an ATYP-tagged address and port from `data`
/// starting at `offset`. Returns `Ok(None)` when more bytes are needed,
/// otherwise the address and the number of bytes consumed
pub fn decode_bound_address(
    data: &[u8],
    offset: usize,
) -> Result<Option<(BoundAddress, usize)>, ConnectReplyError> {
    // Need at least the ATYP byte
    let Some(&atyp) = data.get(offset) else {
        return Ok(None);
    };

    let start = offset + 1;
    let parsed = match AddressType::from_byte(atyp) {
        Some(AddressType::IPv4) => parse_ipv4_address(data, start),
        Some(AddressType::IPv6) => parse_ipv6_address(data, start),
        Some(AddressType::DomainName) => parse_domain_address(data, start),
        None => return Err(ConnectReplyError::AddressType(atyp)),
    };

    // Include the ATYP byte in the consumed count
    Ok(parsed.map(|(addr, len)| (addr, len + 1)))
}

/// parse_ipv4_address parses an IPv4 address and port from a byte slice
fn parse_ipv4_address(data: &[u8], offset: usize) -> Option<(BoundAddress, usize)> {
    // IPv4 address + port -> 6 bytes
    let bytes = data.get(offset..offset + 6)?;

    let ip = Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]);

    // Port is BigEndian (network order)
    let port = u16::from_be_bytes([bytes[4], bytes[5]]);

    Some((BoundAddress::Ip(SocketAddr::new(IpAddr::V4(ip), port)), 6))
}

/// parse_ipv6_address parses an IPv6 address and port from a byte slice
fn parse_ipv6_address(data: &[u8], offset: usize) -> Option<(BoundAddress, usize)> {
    // IPv6 address + port -> 18 bytes
    let bytes = data.get(offset..offset + 18)?;

    let mut octets = [0u8; 16];
    octets.copy_from_slice(&bytes[..16]);
    let ip = Ipv6Addr::from(octets);

    let port = u16::from_be_bytes([bytes[16], bytes[17]]);

    Some((BoundAddress::Ip(SocketAddr::new(IpAddr::V6(ip), port)), 18))
}

/// parse_domain_address parses a length-prefixed domain and port from a byte slice
fn parse_domain_address(data: &[u8], offset: usize) -> Option<(BoundAddress, usize)> {
    // First octet contains the number of octets to follow
    let len = *data.get(offset)? as usize;

    // Length octet + domain + port
    let bytes = data.get(offset + 1..offset + 1 + len + 2)?;

    // Echoed name is not validated
    let domain = String::from_utf8_lossy(&bytes[..len]).into_owned();
    let port = u16::from_be_bytes([bytes[len], bytes[len + 1]]);

    Some((BoundAddress::Domain(domain, port), 1 + len + 2))
}

/// split_host_port splits `host:port`, accepting `[v6]:port` for IPv6 literals
fn split_host_port(s: &str) -> Result<(&str, u16), AddressError> {
    let (host, port) = s
        .rsplit_once(':')
        .ok_or_else(|| AddressError::MissingPort(s.to_string()))?;

    let host = match host.strip_prefix('[') {
        Some(inner) => inner
            .strip_suffix(']')
            .ok_or_else(|| AddressError::MalformedIpv6(host.to_string()))?,
        // A bare IPv6 literal would leave colons behind in the host
        None if host.contains(':') => return Err(AddressError::MissingPort(s.to_string())),
        None => host,
    };

    let port = port
        .parse()
        .map_err(|_| AddressError::InvalidPort(s.to_string()))?;

    Ok((host, port))
}

fn write_host_port(f: &mut fmt::Formatter<'_>, host: &str, port: u16) -> fmt::Result {
    if host.contains(':') {
        write!(f, "[{host}]:{port}")
    } else {
        write!(f, "{host}:{port}")
    }
}
