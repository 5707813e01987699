#![allow(dead_code)]

use pnet::packet::ethernet::EtherTypes;
use pnet::packet::icmp::{self, IcmpPacket};
use pnet::packet::ip::{IpNextHeaderProtocol, IpNextHeaderProtocols};
use pnet::util::MacAddr;
use rip_router::packet::{self, Datagram, Frame, Payload};
use rip_router::{Interface, InterfaceRegistry, Router, RouterSettings, Transport};
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};

pub const ETH0_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 1);
pub const ETH1_IP: Ipv4Addr = Ipv4Addr::new(172, 16, 0, 1);
pub const ETH0_MAC: MacAddr = MacAddr(0x02, 0, 0, 0, 0x01, 0x01);
pub const ETH1_MAC: MacAddr = MacAddr(0x02, 0, 0, 0, 0x01, 0x02);

pub const HOST_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 10);
pub const HOST_MAC: MacAddr = MacAddr(0x02, 0, 0, 0, 0, 0x10);
pub const NEIGHBOR_IP: Ipv4Addr = Ipv4Addr::new(172, 16, 0, 2);
pub const NEIGHBOR_MAC: MacAddr = MacAddr(0x02, 0, 0, 0, 0, 0x20);

/// Records every transmitted frame instead of putting it on a wire.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<(String, Vec<u8>)>>,
}

impl RecordingTransport {
    pub fn take(&self) -> Vec<(String, Vec<u8>)> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }

    pub fn sent_on(&self, interface: &str) -> Vec<Vec<u8>> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name == interface)
            .map(|(_, frame)| frame.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

impl Transport for RecordingTransport {
    fn transmit(&self, frame: &[u8], interface: &str) -> bool {
        self.sent
            .lock()
            .unwrap()
            .push((interface.to_string(), frame.to_vec()));
        true
    }
}

pub fn eth0() -> Interface {
    Interface::new("eth0", ETH0_IP, Ipv4Addr::new(255, 255, 255, 0), ETH0_MAC)
}

pub fn eth1() -> Interface {
    Interface::new("eth1", ETH1_IP, Ipv4Addr::new(255, 255, 255, 0), ETH1_MAC)
}

/// Initialised two-interface router with the start-up RIP requests already
/// discarded.
pub async fn router(settings: RouterSettings) -> (Router, Arc<RecordingTransport>) {
    let transport = Arc::new(RecordingTransport::default());
    let interfaces: InterfaceRegistry = [eth0(), eth1()].into_iter().collect();
    let router = Router::new(interfaces, transport.clone(), settings);
    router.init().await;
    transport.take();
    (router, transport)
}

pub fn ipv4_frame(
    src_mac: MacAddr,
    dst_mac: MacAddr,
    src: Ipv4Addr,
    dst: Ipv4Addr,
    ttl: u8,
    protocol: IpNextHeaderProtocol,
    payload: &[u8],
) -> Vec<u8> {
    let ip = packet::ipv4_datagram(src, dst, protocol, ttl, payload).expect("ipv4");
    packet::ethernet_frame(dst_mac, src_mac, EtherTypes::Ipv4, &ip).expect("ethernet")
}

pub fn udp_frame(
    src_mac: MacAddr,
    dst_mac: MacAddr,
    src: (Ipv4Addr, u16),
    dst: (Ipv4Addr, u16),
    ttl: u8,
    payload: &[u8],
) -> Vec<u8> {
    let udp = packet::udp_segment(src.0, dst.0, src.1, dst.1, payload).expect("udp");
    ipv4_frame(src_mac, dst_mac, src.0, dst.0, ttl, IpNextHeaderProtocols::Udp, &udp)
}

/// UDP datagram from the host on eth0 towards `dst`.
pub fn host_udp(dst: Ipv4Addr, ttl: u8, payload: &[u8]) -> Vec<u8> {
    udp_frame(HOST_MAC, ETH0_MAC, (HOST_IP, 4000), (dst, 7000), ttl, payload)
}

pub fn echo_request(id: u16, seq: u16, data: &[u8]) -> Vec<u8> {
    let mut message = vec![8, 0, 0, 0];
    message.extend_from_slice(&id.to_be_bytes());
    message.extend_from_slice(&seq.to_be_bytes());
    message.extend_from_slice(data);
    let checksum = icmp::checksum(&IcmpPacket::new(&message).expect("icmp"));
    message[2..4].copy_from_slice(&checksum.to_be_bytes());
    message
}

/// Type and code of the ICMP message carried by `frame`, if any.
pub fn icmp_type_code(frame: &[u8]) -> Option<(u8, u8)> {
    let parsed = packet::parse(frame).ok()?;
    let Frame::Ipv4(datagram) = parsed.body else {
        return None;
    };
    match datagram.payload {
        Payload::Icmp(message) => Some((message.get_icmp_type().0, message.get_icmp_code().0)),
        _ => None,
    }
}

pub fn datagram(frame: &[u8]) -> Datagram<'_> {
    match packet::parse(frame).expect("parses").body {
        Frame::Ipv4(datagram) => datagram,
        _ => panic!("expected an IPv4 frame"),
    }
}
