mod common;

use common::*;
use pnet::packet::Packet;
use pnet::util::MacAddr;
use rip_router::packet::{self, Payload};
use rip_router::rip::{RIP_MULTICAST_ADDR, RIP_MULTICAST_MAC, RIP_PORT, RipCommand, RipEntry, RipMessage};
use rip_router::{RouteEntry, RouteSource, Router, RouterConfig, RouterSettings};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const PEER_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 2);
const PEER_MAC: MacAddr = MacAddr(0x02, 0, 0, 0, 0, 0x21);
const PREFIX: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 0);
const MASK_24: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 0);

fn response_frame(entries: Vec<RipEntry>, source_port: u16) -> Vec<u8> {
    let message = RipMessage::response(entries).encode();
    udp_frame(
        PEER_MAC,
        RIP_MULTICAST_MAC,
        (PEER_IP, source_port),
        (RIP_MULTICAST_ADDR, RIP_PORT),
        16,
        &message,
    )
}

fn advertise(metric: u32) -> Vec<u8> {
    response_frame(vec![RipEntry::new(PREFIX, MASK_24, Ipv4Addr::UNSPECIFIED, metric)], RIP_PORT)
}

/// Decodes the RIP message in `frame`, with the UDP ports it was sent between.
fn rip_message(frame: &[u8]) -> (RipMessage, u16, u16) {
    match datagram(frame).payload {
        Payload::Udp(udp) => (
            RipMessage::decode(udp.payload()).expect("valid RIP"),
            udp.get_source(),
            udp.get_destination(),
        ),
        _ => panic!("expected UDP"),
    }
}

async fn route(router: &Router, destination: Ipv4Addr, mask: Ipv4Addr) -> Option<RouteEntry> {
    router.route_table().read().await.find_exact(destination, mask).cloned()
}

#[tokio::test]
async fn test_init_installs_direct_routes_and_requests_tables() {
    let transport = Arc::new(RecordingTransport::default());
    let router = Router::new(
        [eth0(), eth1()].into_iter().collect(),
        transport.clone(),
        RouterSettings::default(),
    );

    router.init().await;

    {
        let table = router.route_table().read().await;
        assert_eq!(table.len(), 2);
        let direct = table.find_exact(Ipv4Addr::new(192, 168, 1, 0), MASK_24).expect("eth0 subnet");
        assert_eq!(direct.gateway, Ipv4Addr::UNSPECIFIED);
        assert_eq!(direct.cost, 0);
        assert_eq!(direct.interface, "eth0");
    }

    let mut sent = transport.take();
    sent.sort_by(|a, b| a.0.cmp(&b.0));
    assert_eq!(sent.len(), 2);
    for ((interface, frame), (expected_iface, expected_ip)) in sent.iter().zip([("eth0", ETH0_IP), ("eth1", ETH1_IP)]) {
        assert_eq!(interface, expected_iface);
        let parsed = packet::parse(frame).expect("parses");
        assert_eq!(parsed.ethernet.get_destination(), RIP_MULTICAST_MAC);
        let ip = datagram(frame);
        assert_eq!(ip.source(), expected_ip);
        assert_eq!(ip.destination(), RIP_MULTICAST_ADDR);
        assert_eq!(ip.ttl(), 16);
        let (message, sport, dport) = rip_message(frame);
        assert_eq!((sport, dport), (RIP_PORT, RIP_PORT));
        assert_eq!(message.command, RipCommand::Request);
        assert!(message.is_whole_table_request());
    }
}

#[tokio::test]
async fn test_response_installs_then_relaxes_route() {
    let (router, _transport) = router(RouterSettings::default()).await;

    router.handle_frame(&advertise(3), "eth0").await;
    let installed = route(&router, PREFIX, MASK_24).await.expect("installed");
    assert_eq!(installed.cost, 4);
    assert_eq!(installed.gateway, PEER_IP);
    assert_eq!(installed.interface, "eth0");
    assert_eq!(installed.source, RouteSource::Rip);

    router.handle_frame(&advertise(1), "eth0").await;
    assert_eq!(route(&router, PREFIX, MASK_24).await.map(|r| r.cost), Some(2));

    router.handle_frame(&advertise(5), "eth0").await;
    assert_eq!(route(&router, PREFIX, MASK_24).await.map(|r| r.cost), Some(2));
    assert_eq!(router.route_table().read().await.len(), 3);
}

#[tokio::test]
async fn test_better_route_moves_gateway_and_interface() {
    let (router, _transport) = router(RouterSettings::default()).await;
    let rip = router.rip();
    let now = Instant::now();

    rip.handle_response(&[RipEntry::new(PREFIX, MASK_24, Ipv4Addr::UNSPECIFIED, 5)], PEER_IP, &eth0(), now)
        .await;
    let changed = rip
        .handle_response(&[RipEntry::new(PREFIX, MASK_24, Ipv4Addr::UNSPECIFIED, 2)], NEIGHBOR_IP, &eth1(), now)
        .await;

    assert_eq!(changed, 1);
    let entry = route(&router, PREFIX, MASK_24).await.expect("route");
    assert_eq!((entry.gateway, entry.interface.as_str(), entry.cost), (NEIGHBOR_IP, "eth1", 3));

    // Equal cost from a different gateway does not replace it.
    rip.handle_response(&[RipEntry::new(PREFIX, MASK_24, Ipv4Addr::UNSPECIFIED, 2)], PEER_IP, &eth0(), now)
        .await;
    assert_eq!(route(&router, PREFIX, MASK_24).await.map(|r| r.gateway), Some(NEIGHBOR_IP));
}

#[tokio::test]
async fn test_unreachable_and_malformed_entries_are_ignored() {
    let (router, _transport) = router(RouterSettings::default()).await;
    let entries = vec![
        RipEntry::new(Ipv4Addr::new(10, 1, 0, 0), MASK_24, Ipv4Addr::UNSPECIFIED, 15),
        RipEntry::new(Ipv4Addr::new(10, 2, 0, 0), MASK_24, Ipv4Addr::UNSPECIFIED, 16),
        // Host bits set.
        RipEntry::new(Ipv4Addr::new(10, 3, 0, 7), MASK_24, Ipv4Addr::UNSPECIFIED, 1),
        RipEntry::new(Ipv4Addr::new(10, 4, 0, 0), MASK_24, Ipv4Addr::UNSPECIFIED, 14),
    ];

    router.handle_frame(&response_frame(entries, RIP_PORT), "eth0").await;

    let table = router.route_table().read().await;
    assert_eq!(table.len(), 3);
    assert_eq!(
        table.find_exact(Ipv4Addr::new(10, 4, 0, 0), MASK_24).map(|r| r.cost),
        Some(15)
    );
}

#[tokio::test]
async fn test_response_from_wrong_port_or_own_address_is_ignored() {
    let (router, _transport) = router(RouterSettings::default()).await;

    router
        .handle_frame(
            &response_frame(vec![RipEntry::new(PREFIX, MASK_24, Ipv4Addr::UNSPECIFIED, 1)], 5000),
            "eth0",
        )
        .await;
    assert!(route(&router, PREFIX, MASK_24).await.is_none());

    let message = RipMessage::response(vec![RipEntry::new(PREFIX, MASK_24, Ipv4Addr::UNSPECIFIED, 1)]).encode();
    let echoed = udp_frame(
        ETH0_MAC,
        RIP_MULTICAST_MAC,
        (ETH0_IP, RIP_PORT),
        (RIP_MULTICAST_ADDR, RIP_PORT),
        16,
        &message,
    );
    router.handle_frame(&echoed, "eth0").await;
    assert!(route(&router, PREFIX, MASK_24).await.is_none());
}

#[tokio::test]
async fn test_direct_and_static_routes_are_not_overridden() {
    let (router, _transport) = router(RouterSettings::default()).await;
    let static_prefix = Ipv4Addr::new(10, 9, 0, 0);
    router
        .add_static_route(RouteEntry {
            destination: static_prefix,
            mask: MASK_24,
            gateway: NEIGHBOR_IP,
            interface: "eth1".into(),
            cost: 10,
            last_updated: Instant::now(),
            source: RouteSource::Static,
        })
        .await;

    let entries = vec![
        RipEntry::new(static_prefix, MASK_24, Ipv4Addr::UNSPECIFIED, 0),
        RipEntry::new(Ipv4Addr::new(172, 16, 0, 0), MASK_24, Ipv4Addr::UNSPECIFIED, 0),
    ];
    router.handle_frame(&response_frame(entries, RIP_PORT), "eth0").await;

    let kept = route(&router, static_prefix, MASK_24).await.expect("static");
    assert_eq!((kept.cost, kept.gateway, kept.source), (10, NEIGHBOR_IP, RouteSource::Static));
    let direct = route(&router, Ipv4Addr::new(172, 16, 0, 0), MASK_24).await.expect("direct");
    assert_eq!((direct.cost, direct.interface.as_str()), (0, "eth1"));
}

#[tokio::test]
async fn test_repeated_response_only_refreshes_timestamp() {
    let (router, _transport) = router(RouterSettings::default()).await;
    let rip = router.rip();
    let entries = [RipEntry::new(PREFIX, MASK_24, Ipv4Addr::UNSPECIFIED, 3)];
    let first = Instant::now();
    let second = first + Duration::from_secs(7);

    assert_eq!(rip.handle_response(&entries, PEER_IP, &eth0(), first).await, 1);
    let before = router.route_table().read().await.snapshot();

    assert_eq!(rip.handle_response(&entries, PEER_IP, &eth0(), second).await, 0);
    let after = router.route_table().read().await.snapshot();

    assert_eq!(before.len(), after.len());
    let entry = after.iter().find(|r| r.destination == PREFIX).expect("route");
    assert_eq!(entry.cost, 4);
    assert_eq!(entry.last_updated, second);
    for (old, new) in before.iter().zip(&after) {
        if old.destination != PREFIX {
            assert_eq!(old, new);
        }
    }
}

#[tokio::test]
async fn test_periodic_sweep_ages_out_learned_routes_only() {
    let (router, _transport) = router(RouterSettings::default()).await;
    let rip = router.rip();
    let learned_at = Instant::now();
    rip.handle_response(
        &[RipEntry::new(PREFIX, MASK_24, Ipv4Addr::UNSPECIFIED, 1)],
        PEER_IP,
        &eth0(),
        learned_at,
    )
    .await;

    rip.tick(learned_at + Duration::from_secs(29)).await;
    assert!(route(&router, PREFIX, MASK_24).await.is_some());

    rip.tick(learned_at + rip.settings().timeout).await;
    assert!(route(&router, PREFIX, MASK_24).await.is_none());

    rip.tick(learned_at + Duration::from_secs(3600)).await;
    let table = router.route_table().read().await;
    assert_eq!(table.len(), 2);
    assert!(table.iter().all(|entry| entry.is_directly_connected()));
}

#[tokio::test]
async fn test_advertisement_applies_split_horizon_per_interface() {
    let (router, transport) = router(RouterSettings::default()).await;
    let rip = router.rip();
    rip.handle_response(
        &[RipEntry::new(PREFIX, MASK_24, Ipv4Addr::UNSPECIFIED, 3)],
        PEER_IP,
        &eth0(),
        Instant::now(),
    )
    .await;
    transport.take();

    rip.advertise().await;

    let eth0_frames = transport.sent_on("eth0");
    let eth1_frames = transport.sent_on("eth1");
    assert_eq!((eth0_frames.len(), eth1_frames.len()), (1, 1));

    let (message, _, dport) = rip_message(&eth0_frames[0]);
    assert_eq!(dport, RIP_PORT);
    assert_eq!(message.command, RipCommand::Response);
    assert_eq!(message.entries, vec![RipEntry::new(Ipv4Addr::new(172, 16, 0, 0), MASK_24, ETH0_IP, 0)]);

    let (message, _, _) = rip_message(&eth1_frames[0]);
    assert_eq!(
        message.entries,
        vec![
            RipEntry::new(Ipv4Addr::new(192, 168, 1, 0), MASK_24, ETH1_IP, 0),
            RipEntry::new(PREFIX, MASK_24, ETH1_IP, 4),
        ]
    );
    assert_eq!(packet::parse(&eth1_frames[0]).expect("parses").ethernet.get_destination(), RIP_MULTICAST_MAC);
}

#[tokio::test]
async fn test_whole_table_request_is_answered_unicast() {
    let (router, transport) = router(RouterSettings::default()).await;
    let request = RipMessage::request().encode();
    let frame = udp_frame(PEER_MAC, RIP_MULTICAST_MAC, (PEER_IP, 5000), (RIP_MULTICAST_ADDR, RIP_PORT), 16, &request);

    router.handle_frame(&frame, "eth0").await;

    let sent = transport.take();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "eth0");
    let parsed = packet::parse(&sent[0].1).expect("parses");
    assert_eq!(parsed.ethernet.get_destination(), PEER_MAC);
    assert_eq!(datagram(&sent[0].1).destination(), PEER_IP);
    let (message, sport, dport) = rip_message(&sent[0].1);
    assert_eq!((sport, dport), (RIP_PORT, 5000));
    assert_eq!(message.command, RipCommand::Response);
    assert_eq!(message.entries, vec![RipEntry::new(Ipv4Addr::new(172, 16, 0, 0), MASK_24, ETH0_IP, 0)]);
}

#[tokio::test]
async fn test_specific_request_reports_each_entry() {
    let (router, transport) = router(RouterSettings::default()).await;
    let unknown = Ipv4Addr::new(10, 77, 0, 0);
    let request = RipMessage {
        command: RipCommand::Request,
        version: 2,
        entries: vec![
            RipEntry::new(Ipv4Addr::new(192, 168, 1, 0), MASK_24, Ipv4Addr::UNSPECIFIED, 0),
            RipEntry::new(unknown, MASK_24, Ipv4Addr::UNSPECIFIED, 0),
        ],
    };
    let frame = udp_frame(PEER_MAC, ETH0_MAC, (PEER_IP, RIP_PORT), (ETH0_IP, RIP_PORT), 16, &request.encode());

    router.handle_frame(&frame, "eth0").await;

    let sent = transport.take();
    assert_eq!(sent.len(), 1);
    let (message, _, _) = rip_message(&sent[0].1);
    assert_eq!(
        message.entries,
        vec![
            RipEntry::new(Ipv4Addr::new(192, 168, 1, 0), MASK_24, ETH0_IP, 0),
            RipEntry::new(unknown, MASK_24, ETH0_IP, 16),
        ]
    );
}

#[tokio::test]
async fn test_large_tables_are_split_across_messages() {
    let (router, transport) = router(RouterSettings::default()).await;
    let now = Instant::now();
    let entries: Vec<RipEntry> = (0..30u8)
        .map(|i| RipEntry::new(Ipv4Addr::new(10, i, 0, 0), MASK_24, Ipv4Addr::UNSPECIFIED, 1))
        .collect();
    router.rip().handle_response(&entries, PEER_IP, &eth0(), now).await;
    transport.take();

    router.rip().advertise().await;

    let eth1_frames = transport.sent_on("eth1");
    assert_eq!(eth1_frames.len(), 2);
    let counts: Vec<usize> = eth1_frames.iter().map(|f| rip_message(f).0.entries.len()).collect();
    assert_eq!(counts, vec![25, 6]);
}

#[tokio::test]
async fn test_static_configuration_disables_rip() {
    let config: RouterConfig = serde_json::from_str(
        r#"{
            "interfaces": [
                { "name": "eth0", "address": "192.168.1.1/24", "mac": "02:00:00:00:01:01" },
                { "name": "eth1", "address": "172.16.0.1/24", "mac": "02:00:00:00:01:02" }
            ],
            "static_routes": [
                { "destination": "10.0.0.0/8", "gateway": "172.16.0.2", "interface": "eth1", "cost": 1 }
            ]
        }"#,
    )
    .expect("config");
    let transport = Arc::new(RecordingTransport::default());
    let router = Router::from_config(&config, transport.clone()).expect("router");
    assert!(!router.is_rip_enabled());

    router.init().await;
    assert_eq!(transport.len(), 0);
    assert_eq!(router.route_table().read().await.len(), 3);

    router.handle_frame(&advertise(1), "eth0").await;
    assert!(route(&router, PREFIX, MASK_24).await.is_none());
    assert_eq!(transport.len(), 0);
}
