use crate::interface::Interface;
use crate::packet::{self, Datagram, Payload};
use pnet::packet::ethernet::EtherTypes;
use pnet::packet::icmp::{self, IcmpCode, IcmpPacket, IcmpType, IcmpTypes, MutableIcmpPacket};
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::util::MacAddr;

/// Size of the fixed ICMP header: type, code, checksum and 4 unused bytes.
const ICMP_HDR_LEN: usize = 8;
/// Bytes of the offending datagram's payload quoted in an error.
const QUOTED_PAYLOAD_LEN: usize = 8;

pub const DEFAULT_TTL: u8 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IcmpError {
    NetUnreachable,
    PortUnreachable,
    TimeExceeded,
}

impl IcmpError {
    pub fn type_and_code(self) -> (IcmpType, IcmpCode) {
        match self {
            IcmpError::NetUnreachable => (IcmpTypes::DestinationUnreachable, IcmpCode::new(0)),
            IcmpError::PortUnreachable => (IcmpTypes::DestinationUnreachable, IcmpCode::new(3)),
            IcmpError::TimeExceeded => (IcmpTypes::TimeExceeded, IcmpCode::new(0)),
        }
    }
}

/// Validates the ICMP checksum over the whole message.
pub fn checksum_ok(message: &IcmpPacket) -> bool {
    icmp::checksum(message) == message.get_checksum()
}

pub fn is_echo_request(message: &IcmpPacket) -> bool {
    message.get_icmp_type() == IcmpTypes::EchoRequest
}

fn is_error_type(icmp_type: IcmpType) -> bool {
    matches!(
        icmp_type,
        IcmpTypes::DestinationUnreachable
            | IcmpTypes::SourceQuench
            | IcmpTypes::RedirectMessage
            | IcmpTypes::TimeExceeded
            | IcmpTypes::ParameterProblem
    )
}

/// Builds ICMP replies and errors as complete Ethernet frames.
#[derive(Debug, Clone, Copy)]
pub struct IcmpGenerator {
    ttl: u8,
}

impl Default for IcmpGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl IcmpGenerator {
    pub fn new(ttl: u8) -> Self {
        Self { ttl }
    }

    /// Errors are never sent about datagrams from non-unicast sources, to
    /// group destinations, or about other ICMP errors.
    fn should_report(datagram: &Datagram) -> bool {
        let source = datagram.source();
        if source.is_unspecified() || source.is_broadcast() || source.is_multicast() {
            return false;
        }
        let destination = datagram.destination();
        if destination.is_broadcast() || destination.is_multicast() {
            return false;
        }
        match &datagram.payload {
            Payload::Icmp(message) => !is_error_type(message.get_icmp_type()),
            _ => true,
        }
    }

    /// Echo reply to `datagram`, sent back out `in_iface` towards `peer_mac`.
    pub fn echo_reply(
        &self,
        datagram: &Datagram,
        in_iface: &Interface,
        peer_mac: MacAddr,
    ) -> Option<Vec<u8>> {
        let mut message = datagram.payload_bytes().to_vec();
        {
            let mut reply = MutableIcmpPacket::new(&mut message)?;
            reply.set_icmp_type(IcmpTypes::EchoReply);
            reply.set_icmp_code(IcmpCode::new(0));
            reply.set_checksum(0);
            let checksum = icmp::checksum(&reply.to_immutable());
            reply.set_checksum(checksum);
        }

        // Replies to the multicast group come from the receiving interface.
        let source = if datagram.destination().is_multicast() {
            in_iface.ip_address
        } else {
            datagram.destination()
        };
        let ip = packet::ipv4_datagram(
            source,
            datagram.source(),
            IpNextHeaderProtocols::Icmp,
            self.ttl,
            &message,
        )?;
        packet::ethernet_frame(peer_mac, in_iface.mac_address, EtherTypes::Ipv4, &ip)
    }

    /// Error about `datagram`, addressed to its source from `in_iface`.
    /// Returns `None` when no error may be generated.
    pub fn error(
        &self,
        kind: IcmpError,
        datagram: &Datagram,
        in_iface: &Interface,
        peer_mac: MacAddr,
    ) -> Option<Vec<u8>> {
        if !Self::should_report(datagram) {
            return None;
        }

        let header = datagram.header_bytes();
        let body = datagram.payload_bytes();
        let quoted = &body[..body.len().min(QUOTED_PAYLOAD_LEN)];

        let mut message = vec![0u8; ICMP_HDR_LEN + header.len() + quoted.len()];
        message[ICMP_HDR_LEN..ICMP_HDR_LEN + header.len()].copy_from_slice(header);
        message[ICMP_HDR_LEN + header.len()..].copy_from_slice(quoted);
        {
            let (icmp_type, icmp_code) = kind.type_and_code();
            let mut error = MutableIcmpPacket::new(&mut message)?;
            error.set_icmp_type(icmp_type);
            error.set_icmp_code(icmp_code);
            let checksum = icmp::checksum(&error.to_immutable());
            error.set_checksum(checksum);
        }

        let ip = packet::ipv4_datagram(
            in_iface.ip_address,
            datagram.source(),
            IpNextHeaderProtocols::Icmp,
            self.ttl,
            &message,
        )?;
        packet::ethernet_frame(peer_mac, in_iface.mac_address, EtherTypes::Ipv4, &ip)
    }
}
