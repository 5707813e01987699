//! Distance-vector routing over RIPv2.
//!
//! The engine owns the policy for mutating the shared route table: direct
//! routes at init, relaxation on responses and age-based eviction on the
//! periodic tick. It reaches the wire only through `Transport`.

pub mod wire;

pub use wire::{RIP_INFINITY, RIP_MULTICAST_ADDR, RIP_MULTICAST_MAC, RIP_PORT, RipCommand, RipEntry, RipMessage};

use crate::interface::{Interface, InterfaceRegistry};
use crate::packet::{self, Datagram, Payload};
use crate::route_table::{RouteEntry, RouteSource, RouteTable};
use crate::transport::Transport;
use log::{debug, info, warn};
use pnet::packet::Packet;
use pnet::packet::ethernet::EtherTypes;
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::util::MacAddr;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, broadcast};
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval};

pub const UPDATE_INTERVAL: Duration = Duration::from_secs(10);
pub const TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_TTL: u8 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RipSettings {
    pub update_interval: Duration,
    pub timeout: Duration,
    pub ttl: u8,
}

impl Default for RipSettings {
    fn default() -> Self {
        Self {
            update_interval: UPDATE_INTERVAL,
            timeout: TIMEOUT,
            ttl: DEFAULT_TTL,
        }
    }
}

pub struct RipEngine {
    route_table: Arc<RwLock<RouteTable>>,
    interfaces: Arc<InterfaceRegistry>,
    transport: Arc<dyn Transport>,
    settings: RipSettings,
}

impl RipEngine {
    pub fn new(
        route_table: Arc<RwLock<RouteTable>>,
        interfaces: Arc<InterfaceRegistry>,
        transport: Arc<dyn Transport>,
        settings: RipSettings,
    ) -> Self {
        Self {
            route_table,
            interfaces,
            transport,
            settings,
        }
    }

    pub fn settings(&self) -> &RipSettings {
        &self.settings
    }

    /// Installs a cost-0 route for every attached subnet.
    pub async fn populate_direct_routes(&self, now: Instant) {
        let mut table = self.route_table.write().await;
        for iface in self.interfaces.iter() {
            table.insert(RouteEntry::direct(iface, now));
        }
    }

    /// Direct routes, then a whole-table request out every interface.
    pub async fn init(&self) {
        self.populate_direct_routes(Instant::now()).await;
        info!("RIP initial route table:\n{}", self.route_table.read().await);
        self.send_requests();
    }

    pub fn send_requests(&self) {
        let request = RipMessage::request();
        for iface in self.interfaces.iter() {
            self.send_message(&request, iface, RIP_MULTICAST_ADDR, RIP_MULTICAST_MAC, RIP_PORT);
        }
    }

    fn send_message(
        &self,
        message: &RipMessage,
        iface: &Interface,
        dst_ip: Ipv4Addr,
        dst_mac: MacAddr,
        dst_port: u16,
    ) -> bool {
        let frame = packet::udp_segment(iface.ip_address, dst_ip, RIP_PORT, dst_port, &message.encode())
            .and_then(|udp| {
                packet::ipv4_datagram(
                    iface.ip_address,
                    dst_ip,
                    IpNextHeaderProtocols::Udp,
                    self.settings.ttl,
                    &udp,
                )
            })
            .and_then(|ip| packet::ethernet_frame(dst_mac, iface.mac_address, EtherTypes::Ipv4, &ip));

        match frame {
            Some(frame) => self.transport.transmit(&frame, &iface.name),
            None => {
                warn!("Failed to build RIP {:?} for {}", message.command, iface.name);
                false
            }
        }
    }

    /// Entry point for a UDP datagram addressed to the RIP port.
    pub async fn handle_packet(&self, datagram: &Datagram<'_>, peer_mac: MacAddr, in_iface: &Interface) {
        let Payload::Udp(udp) = &datagram.payload else {
            return;
        };
        if udp.get_destination() != RIP_PORT {
            return;
        }
        let source = datagram.source();
        if self.interfaces.is_local_address(source) {
            return;
        }

        let message = match RipMessage::decode(udp.payload()) {
            Ok(message) => message,
            Err(e) => {
                debug!("Dropping RIP datagram from {}: {}", source, e);
                return;
            }
        };

        match message.command {
            RipCommand::Request => {
                self.handle_request(&message, source, peer_mac, udp.get_source(), in_iface)
                    .await;
            }
            RipCommand::Response => {
                if udp.get_source() != RIP_PORT {
                    debug!("Ignoring RIP response from {} sent from port {}", source, udp.get_source());
                    return;
                }
                self.handle_response(&message.entries, source, in_iface, Instant::now())
                    .await;
            }
        }
    }

    async fn handle_request(
        &self,
        request: &RipMessage,
        requester: Ipv4Addr,
        requester_mac: MacAddr,
        requester_port: u16,
        in_iface: &Interface,
    ) {
        let entries = {
            let table = self.route_table.read().await;
            if request.is_whole_table_request() {
                table.to_rip_entries(&in_iface.name, in_iface.ip_address)
            } else {
                // Specific queries are answered as-is, without split horizon.
                request
                    .entries
                    .iter()
                    .map(|asked| {
                        let metric = table
                            .find_exact(asked.address, asked.mask)
                            .map_or(RIP_INFINITY, |entry| entry.cost);
                        RipEntry::new(asked.address, asked.mask, in_iface.ip_address, metric)
                    })
                    .collect()
            }
        };

        debug!(
            "Answering RIP request from {} on {} with {} entries",
            requester,
            in_iface.name,
            entries.len()
        );
        for message in RipMessage::responses(entries) {
            self.send_message(&message, in_iface, requester, requester_mac, requester_port);
        }
    }

    /// Applies a neighbour's advertisement. Returns how many table entries
    /// were added or improved.
    pub async fn handle_response(
        &self,
        entries: &[RipEntry],
        advertiser: Ipv4Addr,
        in_iface: &Interface,
        now: Instant,
    ) -> usize {
        let mut changed = 0;
        let mut table = self.route_table.write().await;

        for advertised in entries {
            if !advertised.is_inet() || !advertised.is_network_address() {
                debug!("Ignoring malformed RIP entry {:?} from {}", advertised, advertiser);
                continue;
            }
            // A metric of 15 would become 16 after the hop: unreachable.
            if advertised.metric >= RIP_INFINITY - 1 {
                continue;
            }
            let cost = advertised.metric + 1;

            let existing = table.find_exact(advertised.address, advertised.mask).cloned();
            match existing {
                None => {
                    info!(
                        "RIP: new route {}/{} via {} on {} cost {}",
                        advertised.address, advertised.mask, advertiser, in_iface.name, cost
                    );
                    table.insert(RouteEntry::learned(
                        advertised.address,
                        advertised.mask,
                        advertiser,
                        in_iface.name.clone(),
                        cost,
                        now,
                    ));
                    changed += 1;
                }
                Some(existing) if existing.source != RouteSource::Rip => {}
                Some(existing) if cost < existing.cost => {
                    info!(
                        "RIP: better route {}/{} via {} on {} cost {} (was {} via {})",
                        advertised.address,
                        advertised.mask,
                        advertiser,
                        in_iface.name,
                        cost,
                        existing.cost,
                        existing.gateway
                    );
                    table.update(
                        advertised.address,
                        advertised.mask,
                        advertiser,
                        &in_iface.name,
                        now,
                        Some(cost),
                    );
                    changed += 1;
                }
                Some(existing)
                    if existing.gateway == advertiser
                        && existing.interface == in_iface.name
                        && cost == existing.cost =>
                {
                    table.update(
                        advertised.address,
                        advertised.mask,
                        advertiser,
                        &in_iface.name,
                        now,
                        None,
                    );
                }
                Some(_) => {}
            }
        }

        if changed > 0 {
            debug!("Route table after update from {}:\n{}", advertiser, table);
        }
        changed
    }

    pub async fn expire_routes(&self, now: Instant) -> Vec<RouteEntry> {
        let expired = self
            .route_table
            .write()
            .await
            .expire(now, self.settings.timeout);
        for entry in &expired {
            info!(
                "RIP: route {}/{} via {} timed out",
                entry.destination, entry.mask, entry.gateway
            );
        }
        expired
    }

    /// Unsolicited response out every interface, split horizon applied per
    /// interface.
    pub async fn advertise(&self) {
        for iface in self.interfaces.iter() {
            let entries = self
                .route_table
                .read()
                .await
                .to_rip_entries(&iface.name, iface.ip_address);
            for message in RipMessage::responses(entries) {
                self.send_message(&message, iface, RIP_MULTICAST_ADDR, RIP_MULTICAST_MAC, RIP_PORT);
            }
        }
        debug!("Sent unsolicited RIP responses on {} interfaces", self.interfaces.len());
    }

    /// One periodic cycle: evict stale routes, then advertise.
    pub async fn tick(&self, now: Instant) {
        self.expire_routes(now).await;
        self.advertise().await;
    }

    pub fn spawn_periodic_task(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = interval(self.settings.update_interval);
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!("RIP periodic task shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        self.tick(Instant::now()).await;
                    }
                }
            }
        })
    }
}
