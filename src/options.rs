//! DHCP options as defined in RFC 2132.
//!
//! DHCP uses options to convey configuration parameters between servers and
//! clients. Each option has a code (1 byte), length (1 byte), and
//! variable-length data.
//!
//! Decoding is deliberately total: a recognized option whose payload has the
//! wrong shape degrades to [`DhcpOption::Unknown`] instead of failing the
//! whole packet, so the header fields already decoded remain usable.
//!
//! # References
//!
//! - RFC 2132: DHCP Options and BOOTP Vendor Extensions

use std::net::Ipv4Addr;

/// DHCP option codes used by this implementation.
///
/// Unknown codes are handled via [`DhcpOption::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OptionCode {
    /// Padding (no operation).
    Pad = 0,
    /// Subnet mask (RFC 2132 §3.3).
    SubnetMask = 1,
    /// Router/gateway addresses (RFC 2132 §3.5).
    Router = 3,
    /// DNS server addresses (RFC 2132 §3.8).
    DnsServer = 6,
    /// Client hostname (RFC 2132 §3.14).
    Hostname = 12,
    /// Requested IP address (RFC 2132 §9.1).
    RequestedIpAddress = 50,
    /// IP address lease time in seconds (RFC 2132 §9.2).
    LeaseTime = 51,
    /// DHCP message type (RFC 2132 §9.6).
    MessageType = 53,
    /// Server identifier (RFC 2132 §9.7).
    ServerIdentifier = 54,
    /// End of options marker.
    End = 255,
}

impl TryFrom<u8> for OptionCode {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Pad),
            1 => Ok(Self::SubnetMask),
            3 => Ok(Self::Router),
            6 => Ok(Self::DnsServer),
            12 => Ok(Self::Hostname),
            50 => Ok(Self::RequestedIpAddress),
            51 => Ok(Self::LeaseTime),
            53 => Ok(Self::MessageType),
            54 => Ok(Self::ServerIdentifier),
            255 => Ok(Self::End),
            other => Err(other),
        }
    }
}

/// DHCP message types (Option 53) as defined in RFC 2132 §9.6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// Client broadcast to locate servers.
    Discover = 1,
    /// Server response to DISCOVER with IP offer.
    Offer = 2,
    /// Client request for offered parameters.
    Request = 3,
    /// Client indicates address is already in use.
    Decline = 4,
    /// Server acknowledgement with configuration.
    Ack = 5,
    /// Server negative acknowledgement.
    Nak = 6,
    /// Client releases IP address.
    Release = 7,
    /// Client requests config without IP allocation.
    Inform = 8,
}

impl TryFrom<u8> for MessageType {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Discover),
            2 => Ok(Self::Offer),
            3 => Ok(Self::Request),
            4 => Ok(Self::Decline),
            5 => Ok(Self::Ack),
            6 => Ok(Self::Nak),
            7 => Ok(Self::Release),
            8 => Ok(Self::Inform),
            other => Err(other),
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Discover => write!(f, "DISCOVER"),
            Self::Offer => write!(f, "OFFER"),
            Self::Request => write!(f, "REQUEST"),
            Self::Decline => write!(f, "DECLINE"),
            Self::Ack => write!(f, "ACK"),
            Self::Nak => write!(f, "NAK"),
            Self::Release => write!(f, "RELEASE"),
            Self::Inform => write!(f, "INFORM"),
        }
    }
}

/// A parsed DHCP option.
///
/// Options the server does not interpret are preserved as
/// [`Unknown`](Self::Unknown) with their raw code and data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DhcpOption {
    /// Subnet mask (Option 1).
    SubnetMask(Ipv4Addr),
    /// Router/gateway addresses (Option 3). First address is the default gateway.
    Router(Vec<Ipv4Addr>),
    /// DNS server addresses (Option 6).
    DnsServer(Vec<Ipv4Addr>),
    /// Client hostname (Option 12), ASCII with invalid bytes dropped.
    Hostname(String),
    /// Client's requested IP address (Option 50).
    RequestedIpAddress(Ipv4Addr),
    /// Lease time in seconds (Option 51).
    LeaseTime(u32),
    /// DHCP message type (Option 53).
    MessageType(MessageType),
    /// Server identifier - IP of the DHCP server (Option 54).
    ServerIdentifier(Ipv4Addr),
    /// Unrecognized or malformed option with raw code and data.
    Unknown(u8, Vec<u8>),
}

fn ipv4_from(data: &[u8]) -> Option<Ipv4Addr> {
    let octets: [u8; 4] = data.try_into().ok()?;
    Some(Ipv4Addr::from(octets))
}

fn ipv4_list_from(data: &[u8]) -> Option<Vec<Ipv4Addr>> {
    if data.is_empty() || data.len() % 4 != 0 {
        return None;
    }
    Some(
        data.chunks_exact(4)
            .map(|chunk| Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]))
            .collect(),
    )
}

impl DhcpOption {
    /// Returns the RFC 2132 option code for this option.
    pub fn option_code(&self) -> u8 {
        match self {
            Self::SubnetMask(_) => OptionCode::SubnetMask as u8,
            Self::Router(_) => OptionCode::Router as u8,
            Self::DnsServer(_) => OptionCode::DnsServer as u8,
            Self::Hostname(_) => OptionCode::Hostname as u8,
            Self::RequestedIpAddress(_) => OptionCode::RequestedIpAddress as u8,
            Self::LeaseTime(_) => OptionCode::LeaseTime as u8,
            Self::MessageType(_) => OptionCode::MessageType as u8,
            Self::ServerIdentifier(_) => OptionCode::ServerIdentifier as u8,
            Self::Unknown(code, _) => *code,
        }
    }

    /// Parses a DHCP option from its code and raw data.
    ///
    /// Never fails: a recognized code with a malformed payload (wrong
    /// length, unknown message type value) is kept as [`Self::Unknown`] so
    /// the semantic accessors simply see nothing.
    pub fn parse(code: u8, data: &[u8]) -> Self {
        let unknown = || Self::Unknown(code, data.to_vec());
        match OptionCode::try_from(code) {
            Ok(OptionCode::SubnetMask) => ipv4_from(data).map_or_else(unknown, Self::SubnetMask),
            Ok(OptionCode::Router) => ipv4_list_from(data).map_or_else(unknown, Self::Router),
            Ok(OptionCode::DnsServer) => ipv4_list_from(data).map_or_else(unknown, Self::DnsServer),
            Ok(OptionCode::Hostname) => {
                // Best-effort ASCII: non-ASCII bytes are dropped, not fatal.
                let name: String = data
                    .iter()
                    .filter(|byte| byte.is_ascii())
                    .map(|&byte| byte as char)
                    .collect();
                Self::Hostname(name)
            }
            Ok(OptionCode::RequestedIpAddress) => {
                ipv4_from(data).map_or_else(unknown, Self::RequestedIpAddress)
            }
            Ok(OptionCode::LeaseTime) => match <[u8; 4]>::try_from(data) {
                Ok(bytes) => Self::LeaseTime(u32::from_be_bytes(bytes)),
                Err(_) => unknown(),
            },
            Ok(OptionCode::MessageType) => match data {
                [value] => match MessageType::try_from(*value) {
                    Ok(message_type) => Self::MessageType(message_type),
                    Err(_) => unknown(),
                },
                _ => unknown(),
            },
            Ok(OptionCode::ServerIdentifier) => {
                ipv4_from(data).map_or_else(unknown, Self::ServerIdentifier)
            }
            // Pad and End terminate or are skipped by the TLV walker and
            // never reach here with data attached.
            Ok(OptionCode::Pad) | Ok(OptionCode::End) | Err(_) => unknown(),
        }
    }

    /// Encodes the option to its wire format (code + length + data).
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::SubnetMask(addr) => {
                let mut result = vec![OptionCode::SubnetMask as u8, 4];
                result.extend_from_slice(&addr.octets());
                result
            }
            Self::Router(addrs) => encode_address_list(OptionCode::Router as u8, addrs),
            Self::DnsServer(addrs) => encode_address_list(OptionCode::DnsServer as u8, addrs),
            Self::Hostname(name) => {
                let bytes = name.as_bytes();
                let len = bytes.len().min(255);
                let mut result = vec![OptionCode::Hostname as u8, len as u8];
                result.extend_from_slice(&bytes[..len]);
                result
            }
            Self::RequestedIpAddress(addr) => {
                let mut result = vec![OptionCode::RequestedIpAddress as u8, 4];
                result.extend_from_slice(&addr.octets());
                result
            }
            Self::LeaseTime(time) => {
                let mut result = vec![OptionCode::LeaseTime as u8, 4];
                result.extend_from_slice(&time.to_be_bytes());
                result
            }
            Self::MessageType(message_type) => {
                vec![OptionCode::MessageType as u8, 1, *message_type as u8]
            }
            Self::ServerIdentifier(addr) => {
                let mut result = vec![OptionCode::ServerIdentifier as u8, 4];
                result.extend_from_slice(&addr.octets());
                result
            }
            Self::Unknown(code, data) => {
                let len = data.len().min(255);
                let mut result = vec![*code, len as u8];
                result.extend_from_slice(&data[..len]);
                result
            }
        }
    }
}

/// Options carry a 1-byte length, so at most 63 IPv4 addresses fit.
const MAX_ADDRESSES_PER_OPTION: usize = 63;

fn encode_address_list(code: u8, addrs: &[Ipv4Addr]) -> Vec<u8> {
    let count = addrs.len().min(MAX_ADDRESSES_PER_OPTION);
    let mut result = vec![code, (count * 4) as u8];
    for addr in addrs.iter().take(count) {
        result.extend_from_slice(&addr.octets());
    }
    result
}
