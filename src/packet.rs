//! Single-step frame parsing into per-layer variants, plus the few
//! builders the router needs to originate traffic.

use crate::error::PacketError;
use pnet::packet::MutablePacket;
use pnet::packet::arp::ArpPacket;
use pnet::packet::ethernet::{EtherType, EtherTypes, EthernetPacket, MutableEthernetPacket};
use pnet::packet::icmp::IcmpPacket;
use pnet::packet::ip::{IpNextHeaderProtocol, IpNextHeaderProtocols};
use pnet::packet::ipv4::{self, Ipv4Packet, MutableIpv4Packet};
use pnet::packet::udp::{self, MutableUdpPacket, UdpPacket};
use pnet::util::MacAddr;
use std::net::Ipv4Addr;

pub const ETHERNET_HEADER_LEN: usize = 14;
pub const IPV4_HEADER_LEN: usize = 20;
pub const UDP_HEADER_LEN: usize = 8;
const TCP_MIN_HEADER_LEN: usize = 20;

/// A received frame, decoded once.
pub struct ParsedFrame<'a> {
    pub ethernet: EthernetPacket<'a>,
    pub body: Frame<'a>,
}

pub enum Frame<'a> {
    Arp(ArpPacket<'a>),
    Ipv4(Datagram<'a>),
    Other(EtherType),
}

/// An IPv4 datagram with its transport payload already classified.
pub struct Datagram<'a> {
    pub header: Ipv4Packet<'a>,
    pub payload: Payload<'a>,
    bytes: &'a [u8],
    header_len: usize,
}

pub enum Payload<'a> {
    Icmp(IcmpPacket<'a>),
    Udp(UdpPacket<'a>),
    Tcp(&'a [u8]),
    Other(IpNextHeaderProtocol),
}

impl<'a> Datagram<'a> {
    /// `bytes` is the IPv4 datagram, possibly followed by link padding.
    pub fn parse(bytes: &'a [u8]) -> Result<Self, PacketError> {
        let header = Ipv4Packet::new(bytes).ok_or(PacketError::Truncated("IPv4"))?;
        if header.get_version() != 4 {
            return Err(PacketError::InvalidIpv4("version"));
        }
        let header_len = usize::from(header.get_header_length()) * 4;
        let total_len = usize::from(header.get_total_length());
        if header_len < IPV4_HEADER_LEN {
            return Err(PacketError::InvalidIpv4("header length"));
        }
        if total_len < header_len {
            return Err(PacketError::InvalidIpv4("total length"));
        }
        if bytes.len() < total_len {
            return Err(PacketError::Truncated("IPv4"));
        }

        let bytes = &bytes[..total_len];
        let header = Ipv4Packet::new(bytes).ok_or(PacketError::Truncated("IPv4"))?;
        let body = &bytes[header_len..];
        let payload = match header.get_next_level_protocol() {
            IpNextHeaderProtocols::Icmp => {
                Payload::Icmp(IcmpPacket::new(body).ok_or(PacketError::Truncated("ICMP"))?)
            }
            IpNextHeaderProtocols::Udp => {
                Payload::Udp(UdpPacket::new(body).ok_or(PacketError::Truncated("UDP"))?)
            }
            IpNextHeaderProtocols::Tcp => {
                if body.len() < TCP_MIN_HEADER_LEN {
                    return Err(PacketError::Truncated("TCP"));
                }
                Payload::Tcp(body)
            }
            other => Payload::Other(other),
        };

        Ok(Self {
            header,
            payload,
            bytes,
            header_len,
        })
    }

    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    pub fn header_bytes(&self) -> &'a [u8] {
        &self.bytes[..self.header_len]
    }

    pub fn payload_bytes(&self) -> &'a [u8] {
        &self.bytes[self.header_len..]
    }

    pub fn source(&self) -> Ipv4Addr {
        self.header.get_source()
    }

    pub fn destination(&self) -> Ipv4Addr {
        self.header.get_destination()
    }

    pub fn ttl(&self) -> u8 {
        self.header.get_ttl()
    }

    pub fn checksum_ok(&self) -> bool {
        ipv4::checksum(&self.header) == self.header.get_checksum()
    }
}

/// Decodes Ethernet, then ARP or IPv4 and the IPv4 transport, in one pass.
pub fn parse(bytes: &[u8]) -> Result<ParsedFrame<'_>, PacketError> {
    let ethernet = EthernetPacket::new(bytes).ok_or(PacketError::Truncated("Ethernet"))?;
    let rest = &bytes[ETHERNET_HEADER_LEN..];
    let body = match ethernet.get_ethertype() {
        EtherTypes::Arp => Frame::Arp(ArpPacket::new(rest).ok_or(PacketError::Truncated("ARP"))?),
        EtherTypes::Ipv4 => Frame::Ipv4(Datagram::parse(rest)?),
        other => Frame::Other(other),
    };
    Ok(ParsedFrame { ethernet, body })
}

pub fn ethernet_frame(
    destination: MacAddr,
    source: MacAddr,
    ethertype: EtherType,
    payload: &[u8],
) -> Option<Vec<u8>> {
    let mut buf = vec![0u8; ETHERNET_HEADER_LEN + payload.len()];
    {
        let mut eth = MutableEthernetPacket::new(&mut buf)?;
        eth.set_destination(destination);
        eth.set_source(source);
        eth.set_ethertype(ethertype);
        eth.payload_mut().copy_from_slice(payload);
    }
    Some(buf)
}

/// IPv4 datagram with a 20-byte header and a valid checksum.
pub fn ipv4_datagram(
    source: Ipv4Addr,
    destination: Ipv4Addr,
    protocol: IpNextHeaderProtocol,
    ttl: u8,
    payload: &[u8],
) -> Option<Vec<u8>> {
    let total_len = IPV4_HEADER_LEN + payload.len();
    let total_len_field = u16::try_from(total_len).ok()?;
    let mut buf = vec![0u8; total_len];
    {
        let mut ip = MutableIpv4Packet::new(&mut buf)?;
        ip.set_version(4);
        ip.set_header_length(5);
        ip.set_total_length(total_len_field);
        ip.set_ttl(ttl);
        ip.set_next_level_protocol(protocol);
        ip.set_source(source);
        ip.set_destination(destination);
        ip.payload_mut().copy_from_slice(payload);
        let checksum = ipv4::checksum(&ip.to_immutable());
        ip.set_checksum(checksum);
    }
    Some(buf)
}

/// UDP segment with its pseudo-header checksum filled in.
pub fn udp_segment(
    source: Ipv4Addr,
    destination: Ipv4Addr,
    source_port: u16,
    destination_port: u16,
    payload: &[u8],
) -> Option<Vec<u8>> {
    let len = UDP_HEADER_LEN + payload.len();
    let len_field = u16::try_from(len).ok()?;
    let mut buf = vec![0u8; len];
    {
        let mut segment = MutableUdpPacket::new(&mut buf)?;
        segment.set_source(source_port);
        segment.set_destination(destination_port);
        segment.set_length(len_field);
        segment.payload_mut().copy_from_slice(payload);
        let checksum = udp::ipv4_checksum(&segment.to_immutable(), &source, &destination);
        segment.set_checksum(checksum);
    }
    Some(buf)
}

/// Rewrites the Ethernet source and destination of an outbound frame.
pub fn set_link_addresses(frame: &mut [u8], source: MacAddr, destination: MacAddr) -> bool {
    match MutableEthernetPacket::new(frame) {
        Some(mut eth) => {
            eth.set_source(source);
            eth.set_destination(destination);
            true
        }
        None => false,
    }
}

/// Decrements the TTL of the IPv4 datagram inside `frame` and recomputes
/// the header checksum. Returns the new TTL.
pub fn decrement_ttl(frame: &mut [u8]) -> Option<u8> {
    let mut ip = MutableIpv4Packet::new(frame.get_mut(ETHERNET_HEADER_LEN..)?)?;
    let ttl = ip.get_ttl().checked_sub(1)?;
    ip.set_ttl(ttl);
    ip.set_checksum(0);
    let checksum = ipv4::checksum(&ip.to_immutable());
    ip.set_checksum(checksum);
    Some(ttl)
}
