//! The router core: the single entry point for inbound frames and the owner
//! of the shared route table and ARP state.

use crate::arp::{ArpResolver, ArpSettings};
use crate::config::RouterConfig;
use crate::error::ConfigError;
use crate::icmp::{self, IcmpError, IcmpGenerator};
use crate::interface::{Interface, InterfaceRegistry};
use crate::packet::{self, Datagram, ETHERNET_HEADER_LEN, Frame, Payload};
use crate::rip::{RIP_MULTICAST_ADDR, RIP_PORT, RipEngine, RipSettings};
use crate::route_table::{RouteEntry, RouteTable};
use crate::transport::Transport;
use log::{debug, info, warn};
use pnet::util::MacAddr;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock, broadcast};
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterSettings {
    pub rip: RipSettings,
    pub arp: ArpSettings,
    pub icmp_ttl: u8,
    pub rip_enabled: bool,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            rip: RipSettings::default(),
            arp: ArpSettings::default(),
            icmp_ttl: icmp::DEFAULT_TTL,
            rip_enabled: true,
        }
    }
}

pub struct Router {
    interfaces: Arc<InterfaceRegistry>,
    route_table: Arc<RwLock<RouteTable>>,
    arp: Arc<ArpResolver>,
    rip: Arc<RipEngine>,
    icmp: IcmpGenerator,
    transport: Arc<dyn Transport>,
    rip_enabled: bool,
    shutdown_tx: broadcast::Sender<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Router {
    pub fn new(interfaces: InterfaceRegistry, transport: Arc<dyn Transport>, settings: RouterSettings) -> Self {
        Self::with_route_table(interfaces, RouteTable::new(), transport, settings)
    }

    /// Builds a router from a validated configuration. Static routes are
    /// installed up front and switch RIP off.
    pub fn from_config(config: &RouterConfig, transport: Arc<dyn Transport>) -> Result<Self, ConfigError> {
        config.validate()?;
        let interfaces = config.build_interfaces()?;

        let mut table = RouteTable::new();
        for entry in config.static_route_entries(Instant::now()) {
            table.insert(entry);
        }

        let settings = RouterSettings {
            rip: config.rip_settings(),
            arp: config.arp_settings(),
            icmp_ttl: config.icmp_ttl,
            rip_enabled: config.rip.enabled && config.static_routes.is_empty(),
        };
        Ok(Self::with_route_table(interfaces, table, transport, settings))
    }

    fn with_route_table(
        interfaces: InterfaceRegistry,
        table: RouteTable,
        transport: Arc<dyn Transport>,
        settings: RouterSettings,
    ) -> Self {
        let interfaces = Arc::new(interfaces);
        let route_table = Arc::new(RwLock::new(table));
        let arp = Arc::new(ArpResolver::new(interfaces.clone(), transport.clone(), settings.arp));
        let rip = Arc::new(RipEngine::new(
            route_table.clone(),
            interfaces.clone(),
            transport.clone(),
            settings.rip,
        ));
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            interfaces,
            route_table,
            arp,
            rip,
            icmp: IcmpGenerator::new(settings.icmp_ttl),
            transport,
            rip_enabled: settings.rip_enabled,
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn interfaces(&self) -> &Arc<InterfaceRegistry> {
        &self.interfaces
    }

    pub fn route_table(&self) -> &Arc<RwLock<RouteTable>> {
        &self.route_table
    }

    pub fn arp(&self) -> &Arc<ArpResolver> {
        &self.arp
    }

    pub fn rip(&self) -> &Arc<RipEngine> {
        &self.rip
    }

    pub fn is_rip_enabled(&self) -> bool {
        self.rip_enabled
    }

    pub async fn add_static_route(&self, entry: RouteEntry) {
        info!(
            "Adding static route {}/{} via {} on {}",
            entry.destination, entry.mask, entry.gateway, entry.interface
        );
        self.route_table.write().await.insert(entry);
    }

    /// Populates the attached subnets and, when RIP runs, asks every
    /// neighbour for its table.
    pub async fn init(&self) {
        if self.rip_enabled {
            self.rip.init().await;
            return;
        }

        let now = Instant::now();
        let mut table = self.route_table.write().await;
        for iface in self.interfaces.iter() {
            if table.find_exact(iface.network(), iface.subnet_mask).is_none() {
                table.insert(RouteEntry::direct(iface, now));
            }
        }
        info!("Static route table:\n{}", table);
    }

    /// Spawns the periodic RIP task (when enabled) and the ARP sweep.
    pub async fn start(&self) {
        let mut tasks = self.tasks.lock().await;
        if self.rip_enabled {
            tasks.push(self.rip.clone().spawn_periodic_task(self.shutdown_tx.subscribe()));
        }
        tasks.push(self.arp.clone().spawn_sweep_task(self.shutdown_tx.subscribe()));
        info!("Router started on {} interfaces", self.interfaces.len());
    }

    /// Background tasks spawned by `start` and not yet joined.
    pub async fn task_count(&self) -> usize {
        self.tasks.lock().await.len()
    }

    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        let handles: Vec<_> = self.tasks.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Background task ended abnormally: {}", e);
            }
        }
        info!("Router stopped");
    }

    /// Processes one frame received on `in_iface`. All effects are
    /// transmissions or state changes; bad input is dropped.
    pub async fn handle_frame(&self, frame: &[u8], in_iface: &str) {
        let Some(iface) = self.interfaces.get(in_iface) else {
            debug!("Dropping frame from unknown interface {}", in_iface);
            return;
        };
        let parsed = match packet::parse(frame) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!("Dropping malformed frame on {}: {}", in_iface, e);
                return;
            }
        };
        let peer_mac = parsed.ethernet.get_source();
        if peer_mac == iface.mac_address {
            debug!("Dropping our own frame looped back on {}", in_iface);
            return;
        }
        if !accepts_link_destination(iface, parsed.ethernet.get_destination()) {
            debug!(
                "Dropping frame for {} on {}",
                parsed.ethernet.get_destination(),
                in_iface
            );
            return;
        }

        match &parsed.body {
            Frame::Arp(arp) => self.arp.handle_packet(arp, iface).await,
            Frame::Ipv4(datagram) => self.handle_ipv4(frame, datagram, peer_mac, iface).await,
            Frame::Other(ethertype) => debug!("Ignoring {} frame on {}", ethertype, in_iface),
        }
    }

    async fn handle_ipv4(&self, frame: &[u8], datagram: &Datagram<'_>, peer_mac: MacAddr, in_iface: &Interface) {
        if !datagram.checksum_ok() {
            debug!("Dropping datagram from {} with bad checksum", datagram.source());
            return;
        }

        let destination = datagram.destination();
        if self.interfaces.is_local_address(destination) || destination == RIP_MULTICAST_ADDR {
            self.deliver_locally(datagram, peer_mac, in_iface).await;
        } else {
            self.forward(frame, datagram, peer_mac, in_iface).await;
        }
    }

    async fn deliver_locally(&self, datagram: &Datagram<'_>, peer_mac: MacAddr, in_iface: &Interface) {
        if datagram.ttl() <= 1 {
            self.send_error(IcmpError::TimeExceeded, datagram, peer_mac, in_iface);
            return;
        }

        match &datagram.payload {
            Payload::Icmp(message) => {
                if !icmp::is_echo_request(message) || !icmp::checksum_ok(message) {
                    debug!("Dropping ICMP {:?} from {}", message.get_icmp_type(), datagram.source());
                    return;
                }
                match self.icmp.echo_reply(datagram, in_iface, peer_mac) {
                    Some(reply) => {
                        debug!("Echo reply to {} on {}", datagram.source(), in_iface.name);
                        self.transport.transmit(&reply, &in_iface.name);
                    }
                    None => warn!("Failed to build echo reply for {}", datagram.source()),
                }
            }
            Payload::Udp(udp) if udp.get_destination() == RIP_PORT => {
                if self.rip_enabled {
                    self.rip.handle_packet(datagram, peer_mac, in_iface).await;
                } else {
                    debug!("RIP disabled, ignoring datagram from {}", datagram.source());
                }
            }
            _ => self.send_error(IcmpError::PortUnreachable, datagram, peer_mac, in_iface),
        }
    }

    async fn forward(&self, frame: &[u8], datagram: &Datagram<'_>, peer_mac: MacAddr, in_iface: &Interface) {
        if datagram.ttl() <= 1 {
            self.send_error(IcmpError::TimeExceeded, datagram, peer_mac, in_iface);
            return;
        }

        // Trailing link padding is not forwarded.
        let mut outbound = frame[..ETHERNET_HEADER_LEN + datagram.bytes().len()].to_vec();
        if packet::decrement_ttl(&mut outbound).is_none() {
            return;
        }

        let destination = datagram.destination();
        let route = self.route_table.read().await.lookup(destination).cloned();
        let Some(route) = route else {
            debug!("No route to {}", destination);
            self.send_error(IcmpError::NetUnreachable, datagram, peer_mac, in_iface);
            return;
        };
        let Some(out_iface) = self.interfaces.get(&route.interface) else {
            warn!("Route to {} uses unknown interface {}", destination, route.interface);
            return;
        };

        let next_hop = route.next_hop(destination);
        debug!(
            "Forwarding {} -> {} via {} on {}",
            datagram.source(),
            destination,
            next_hop,
            out_iface.name
        );
        self.arp.send_or_queue(outbound, next_hop, out_iface).await;
    }

    fn send_error(&self, kind: IcmpError, datagram: &Datagram<'_>, peer_mac: MacAddr, in_iface: &Interface) {
        match self.icmp.error(kind, datagram, in_iface, peer_mac) {
            Some(frame) => {
                debug!("Sending {:?} to {} on {}", kind, datagram.source(), in_iface.name);
                self.transport.transmit(&frame, &in_iface.name);
            }
            None => debug!("Suppressed {:?} about datagram from {}", kind, datagram.source()),
        }
    }
}

/// Unicast to `iface`, or any group address (broadcast included).
fn accepts_link_destination(iface: &Interface, destination: MacAddr) -> bool {
    // I/G bit of the first octet marks group addresses.
    destination == iface.mac_address || destination.0 & 0x01 != 0
}
