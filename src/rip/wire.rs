//! RIPv2 message codec (RFC 2453, section 4).
//!
//! ```text
//!  0       1       2       3
//! +-------+-------+---------------+
//! |command|version|  must be zero |
//! +-------+-------+---------------+
//! | address family|   route tag   |  \
//! |          IPv4 address         |   |
//! |          subnet mask          |   | 20 bytes, repeated
//! |           next hop            |   |
//! |            metric             |  /
//! +-------------------------------+
//! ```

use crate::error::PacketError;
use pnet::util::MacAddr;
use std::net::Ipv4Addr;

pub const RIP_PORT: u16 = 520;
pub const RIP_VERSION: u8 = 2;
pub const RIP_INFINITY: u32 = 16;
pub const RIP_MULTICAST_ADDR: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 9);
pub const RIP_MULTICAST_MAC: MacAddr = MacAddr(0x01, 0x00, 0x5e, 0x00, 0x00, 0x09);
/// Upper bound on entries carried by a single message.
pub const MAX_ENTRIES: usize = 25;

const HEADER_LEN: usize = 4;
const ENTRY_LEN: usize = 20;
const AF_INET: u16 = 2;
const AF_UNSPEC: u16 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RipCommand {
    Request = 1,
    Response = 2,
}

impl TryFrom<u8> for RipCommand {
    type Error = PacketError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(RipCommand::Request),
            2 => Ok(RipCommand::Response),
            other => Err(PacketError::UnknownRipCommand(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RipEntry {
    pub address_family: u16,
    pub route_tag: u16,
    pub address: Ipv4Addr,
    pub mask: Ipv4Addr,
    pub next_hop: Ipv4Addr,
    pub metric: u32,
}

impl RipEntry {
    pub fn new(address: Ipv4Addr, mask: Ipv4Addr, next_hop: Ipv4Addr, metric: u32) -> Self {
        Self {
            address_family: AF_INET,
            route_tag: 0,
            address,
            mask,
            next_hop,
            metric,
        }
    }

    /// The single entry that asks a neighbour for its whole table.
    pub fn whole_table() -> Self {
        Self {
            address_family: AF_UNSPEC,
            route_tag: 0,
            address: Ipv4Addr::UNSPECIFIED,
            mask: Ipv4Addr::UNSPECIFIED,
            next_hop: Ipv4Addr::UNSPECIFIED,
            metric: RIP_INFINITY,
        }
    }

    pub fn is_inet(&self) -> bool {
        self.address_family == AF_INET
    }

    /// Address has no bits outside the mask.
    pub fn is_network_address(&self) -> bool {
        u32::from(self.address) & !u32::from(self.mask) == 0
    }

    fn write(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.address_family.to_be_bytes());
        buf.extend_from_slice(&self.route_tag.to_be_bytes());
        buf.extend_from_slice(&self.address.octets());
        buf.extend_from_slice(&self.mask.octets());
        buf.extend_from_slice(&self.next_hop.octets());
        buf.extend_from_slice(&self.metric.to_be_bytes());
    }

    fn read(chunk: &[u8]) -> Self {
        let u16_at = |i: usize| u16::from_be_bytes([chunk[i], chunk[i + 1]]);
        let u32_at = |i: usize| u32::from_be_bytes([chunk[i], chunk[i + 1], chunk[i + 2], chunk[i + 3]]);
        Self {
            address_family: u16_at(0),
            route_tag: u16_at(2),
            address: Ipv4Addr::from(u32_at(4)),
            mask: Ipv4Addr::from(u32_at(8)),
            next_hop: Ipv4Addr::from(u32_at(12)),
            metric: u32_at(16),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RipMessage {
    pub command: RipCommand,
    pub version: u8,
    pub entries: Vec<RipEntry>,
}

impl RipMessage {
    pub fn request() -> Self {
        Self {
            command: RipCommand::Request,
            version: RIP_VERSION,
            entries: vec![RipEntry::whole_table()],
        }
    }

    pub fn response(entries: Vec<RipEntry>) -> Self {
        Self {
            command: RipCommand::Response,
            version: RIP_VERSION,
            entries,
        }
    }

    /// Splits a response into messages of at most `MAX_ENTRIES` entries. An
    /// empty table still yields one (empty) message.
    pub fn responses(entries: Vec<RipEntry>) -> Vec<Self> {
        if entries.is_empty() {
            return vec![Self::response(Vec::new())];
        }
        entries
            .chunks(MAX_ENTRIES)
            .map(|chunk| Self::response(chunk.to_vec()))
            .collect()
    }

    /// An empty request, or one holding only the address-family-0/metric-16
    /// entry, asks for the full table.
    pub fn is_whole_table_request(&self) -> bool {
        self.command == RipCommand::Request
            && match self.entries.as_slice() {
                [] => true,
                [entry] => entry.address_family == AF_UNSPEC && entry.metric == RIP_INFINITY,
                _ => false,
            }
    }

    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.entries.len() * ENTRY_LEN
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.push(self.command as u8);
        buf.push(self.version);
        buf.extend_from_slice(&[0, 0]);
        for entry in &self.entries {
            entry.write(&mut buf);
        }
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self, PacketError> {
        if data.len() < HEADER_LEN {
            return Err(PacketError::Truncated("RIP"));
        }
        let command = RipCommand::try_from(data[0])?;
        let version = data[1];
        if version == 0 {
            return Err(PacketError::UnsupportedRipVersion(version));
        }
        let body = &data[HEADER_LEN..];
        if body.len() % ENTRY_LEN != 0 {
            return Err(PacketError::Truncated("RIP entry"));
        }
        let entries = body.chunks_exact(ENTRY_LEN).map(RipEntry::read).collect();
        Ok(Self {
            command,
            version,
            entries,
        })
    }
}
