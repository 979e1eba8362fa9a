//! SOCKS5 wire constants and reply encoding (RFC 1928).

use std::net::{Ipv4Addr, Ipv6Addr};

use bytebuffer::ByteBuffer;
use strum_macros::{Display, EnumIter, FromRepr};

pub const VERSION: u8 = 5;
pub const RESERVED: u8 = 0;

/// Method byte for "no authentication required".
pub const METHOD_NO_AUTH: u8 = 0x00;
/// Method byte for "no acceptable methods".
pub const METHOD_NONE_ACCEPTABLE: u8 = 0xFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, FromRepr, EnumIter)]
#[repr(u8)]
pub enum Command {
    Connect = 1,
    Bind = 2,
    UdpAssociate = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, FromRepr, EnumIter)]
#[repr(u8)]
pub enum AddressType {
    IPv4 = 1,
    Domain = 3,
    IPv6 = 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, FromRepr, EnumIter)]
#[repr(u8)]
pub enum ReplyCode {
    Succeeded = 0,
    GeneralFailure = 1,
    NotAllowed = 2,
    NetworkUnreachable = 3,
    HostUnreachable = 4,
    ConnectionRefused = 5,
    TtlExpired = 6,
    CommandNotSupported = 7,
    AddressTypeNotSupported = 8,
}

/// A target address as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    /// Raw domain bytes, at most 255 of them.
    Domain(Vec<u8>),
    V4(Ipv4Addr),
    V6(Ipv6Addr),
}

impl Address {
    pub fn address_type(&self) -> AddressType {
        match self {
            Address::Domain(_) => AddressType::Domain,
            Address::V4(_) => AddressType::IPv4,
            Address::V6(_) => AddressType::IPv6,
        }
    }
}

/// The two-byte method selection message.
pub fn method_selection(method: u8) -> [u8; 2] {
    [VERSION, method]
}

/// A reply to a client request: `{ver, rep, rsv, atyp}`, the address, the port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: ReplyCode,
    /// `None` is sent as IPv4 `0.0.0.0`.
    pub address: Option<Address>,
    pub port: u16,
}

impl Reply {
    pub fn new(code: ReplyCode, address: Option<Address>, port: u16) -> Self {
        Self {
            code,
            address,
            port,
        }
    }

    /// A failure reply that carries no address.
    pub fn bare(code: ReplyCode) -> Self {
        Self::new(code, None, 0)
    }

    pub fn encode(&self) -> Vec<u8> {
        let atype = self
            .address
            .as_ref()
            .map_or(AddressType::IPv4, Address::address_type);

        let mut msg = ByteBuffer::new();
        msg.write_bytes(&[VERSION, self.code as u8, RESERVED, atype as u8]);

        match &self.address {
            Some(Address::Domain(name)) => {
                msg.write_u8(name.len() as u8);
                msg.write_bytes(name);
            }
            Some(Address::V4(ip)) => msg.write_bytes(&ip.octets()),
            Some(Address::V6(ip)) => msg.write_bytes(&ip.octets()),
            None => msg.write_bytes(&Ipv4Addr::UNSPECIFIED.octets()),
        }

        msg.write_u16(self.port);
        msg.into_vec()
    }
}
