//! ARP cache and resolver.
//!
//! Resolved bindings and in-flight requests live together in one
//! `ArpCache` behind a single mutex, so the frame path and the retry sweep
//! never see a request half-drained. Frames are transmitted only after the
//! guard is released.

use crate::interface::{Interface, InterfaceRegistry};
use crate::packet;
use crate::transport::Transport;
use log::{debug, info, warn};
use pnet::packet::arp::{ArpHardwareTypes, ArpOperation, ArpOperations, ArpPacket, MutableArpPacket};
use pnet::packet::ethernet::EtherTypes;
use pnet::util::MacAddr;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval};

const ARP_PACKET_LEN: usize = 28;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArpSettings {
    pub retry_interval: Duration,
    /// Total number of requests sent before giving up.
    pub max_retries: u32,
    pub entry_timeout: Duration,
}

impl Default for ArpSettings {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(1),
            max_retries: 5,
            entry_timeout: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArpEntry {
    pub ip: Ipv4Addr,
    pub mac: MacAddr,
    pub created_at: Instant,
}

/// An unresolved address and the frames waiting on it, in arrival order.
#[derive(Debug, Clone)]
pub struct ArpRequest {
    pub target_ip: Ipv4Addr,
    pub interface: String,
    pub sent_at: Instant,
    pub retries: u32,
    waiting: Vec<Vec<u8>>,
}

impl ArpRequest {
    pub fn waiting_frames(&self) -> &[Vec<u8>] {
        &self.waiting
    }

    pub fn into_waiting_frames(self) -> Vec<Vec<u8>> {
        self.waiting
    }
}

/// What one sweep decided; acted on after the cache lock is released.
#[derive(Debug, Default)]
pub struct SweepOutcome {
    pub resend: Vec<(Ipv4Addr, String)>,
    pub abandoned: Vec<ArpRequest>,
    pub expired_entries: usize,
}

#[derive(Debug, Default)]
pub struct ArpCache {
    entries: HashMap<Ipv4Addr, ArpEntry>,
    pending: HashMap<Ipv4Addr, ArpRequest>,
}

impl ArpCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, ip: Ipv4Addr) -> Option<MacAddr> {
        self.entries.get(&ip).map(|entry| entry.mac)
    }

    /// Records a binding. Returns the pending request for `ip`, if any; the
    /// caller now owns its waiting frames.
    pub fn insert(&mut self, ip: Ipv4Addr, mac: MacAddr, now: Instant) -> Option<ArpRequest> {
        self.entries.insert(
            ip,
            ArpEntry {
                ip,
                mac,
                created_at: now,
            },
        );
        self.pending.remove(&ip)
    }

    pub fn pending(&self, ip: Ipv4Addr) -> Option<&ArpRequest> {
        self.pending.get(&ip)
    }

    /// Starts tracking a request for `ip`. Returns false if one is already
    /// outstanding, in which case nothing changes.
    pub fn begin_request(&mut self, ip: Ipv4Addr, interface: &str, now: Instant) -> bool {
        if self.pending.contains_key(&ip) {
            return false;
        }
        self.pending.insert(
            ip,
            ArpRequest {
                target_ip: ip,
                interface: interface.to_string(),
                sent_at: now,
                retries: 1,
                waiting: Vec::new(),
            },
        );
        true
    }

    /// Queues `frame` behind the pending request for `ip`. Hands the frame
    /// back when there is no such request.
    pub fn enqueue(&mut self, ip: Ipv4Addr, frame: Vec<u8>) -> Result<(), Vec<u8>> {
        match self.pending.get_mut(&ip) {
            Some(request) => {
                request.waiting.push(frame);
                Ok(())
            }
            None => Err(frame),
        }
    }

    pub fn sweep(&mut self, now: Instant, settings: &ArpSettings) -> SweepOutcome {
        let mut outcome = SweepOutcome::default();

        let before = self.entries.len();
        self.entries
            .retain(|_, entry| now.saturating_duration_since(entry.created_at) < settings.entry_timeout);
        outcome.expired_entries = before - self.entries.len();

        let mut exhausted = Vec::new();
        for (ip, request) in self.pending.iter_mut() {
            if now.saturating_duration_since(request.sent_at) < settings.retry_interval {
                continue;
            }
            if request.retries >= settings.max_retries {
                exhausted.push(*ip);
            } else {
                request.retries += 1;
                request.sent_at = now;
                outcome.resend.push((*ip, request.interface.clone()));
            }
        }
        outcome.abandoned = exhausted
            .into_iter()
            .filter_map(|ip| self.pending.remove(&ip))
            .collect();

        outcome
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

fn arp_frame(
    operation: ArpOperation,
    sender: (MacAddr, Ipv4Addr),
    target: (MacAddr, Ipv4Addr),
    link_destination: MacAddr,
) -> Option<Vec<u8>> {
    let mut payload = vec![0u8; ARP_PACKET_LEN];
    {
        let mut arp = MutableArpPacket::new(&mut payload)?;
        arp.set_hardware_type(ArpHardwareTypes::Ethernet);
        arp.set_protocol_type(EtherTypes::Ipv4);
        arp.set_hw_addr_len(6);
        arp.set_proto_addr_len(4);
        arp.set_operation(operation);
        arp.set_sender_hw_addr(sender.0);
        arp.set_sender_proto_addr(sender.1);
        arp.set_target_hw_addr(target.0);
        arp.set_target_proto_addr(target.1);
    }
    packet::ethernet_frame(link_destination, sender.0, EtherTypes::Arp, &payload)
}

/// Broadcast who-has for `target_ip` from `iface`.
pub fn request_frame(iface: &Interface, target_ip: Ipv4Addr) -> Option<Vec<u8>> {
    arp_frame(
        ArpOperations::Request,
        (iface.mac_address, iface.ip_address),
        (MacAddr::zero(), target_ip),
        MacAddr::broadcast(),
    )
}

/// Unicast is-at answering `requester` with `iface`'s link address.
pub fn reply_frame(iface: &Interface, requester: (MacAddr, Ipv4Addr)) -> Option<Vec<u8>> {
    arp_frame(
        ArpOperations::Reply,
        (iface.mac_address, iface.ip_address),
        requester,
        requester.0,
    )
}

pub struct ArpResolver {
    cache: Arc<Mutex<ArpCache>>,
    interfaces: Arc<InterfaceRegistry>,
    transport: Arc<dyn Transport>,
    settings: ArpSettings,
}

impl ArpResolver {
    pub fn new(
        interfaces: Arc<InterfaceRegistry>,
        transport: Arc<dyn Transport>,
        settings: ArpSettings,
    ) -> Self {
        Self {
            cache: Arc::new(Mutex::new(ArpCache::new())),
            interfaces,
            transport,
            settings,
        }
    }

    pub fn cache(&self) -> &Arc<Mutex<ArpCache>> {
        &self.cache
    }

    pub fn settings(&self) -> &ArpSettings {
        &self.settings
    }

    pub async fn lookup(&self, ip: Ipv4Addr) -> Option<MacAddr> {
        self.cache.lock().await.lookup(ip)
    }

    fn send_request(&self, target_ip: Ipv4Addr, interface: &str) {
        let Some(iface) = self.interfaces.get(interface) else {
            warn!("Cannot send ARP request for {}: unknown interface {}", target_ip, interface);
            return;
        };
        match request_frame(iface, target_ip) {
            Some(frame) => {
                debug!("Sending ARP request for {} on {}", target_ip, interface);
                self.transport.transmit(&frame, interface);
            }
            None => warn!("Failed to build ARP request for {}", target_ip),
        }
    }

    /// Begins resolution of `ip` on `interface`, or does nothing if a request
    /// is already outstanding.
    pub async fn resolve(&self, ip: Ipv4Addr, interface: &str) {
        let started = self.cache.lock().await.begin_request(ip, interface, Instant::now());
        if started {
            self.send_request(ip, interface);
        }
    }

    /// Appends `frame` to the pending request for `ip`. Returns false (and
    /// drops the frame) when `resolve` has not been called for `ip`.
    pub async fn enqueue_waiting(&self, ip: Ipv4Addr, frame: Vec<u8>) -> bool {
        match self.cache.lock().await.enqueue(ip, frame) {
            Ok(()) => true,
            Err(_) => {
                debug!("No pending ARP request for {}, dropping frame", ip);
                false
            }
        }
    }

    /// Transmits `frame` to `next_hop` out `out_iface` if its link address is
    /// known, otherwise parks it behind an ARP request. The frame must
    /// already carry everything but its link addresses.
    pub async fn send_or_queue(&self, mut frame: Vec<u8>, next_hop: Ipv4Addr, out_iface: &Interface) {
        let new_request = {
            let mut cache = self.cache.lock().await;
            if let Some(mac) = cache.lookup(next_hop) {
                drop(cache);
                packet::set_link_addresses(&mut frame, out_iface.mac_address, mac);
                self.transport.transmit(&frame, &out_iface.name);
                return;
            }
            packet::set_link_addresses(&mut frame, out_iface.mac_address, MacAddr::zero());
            let started = cache.begin_request(next_hop, &out_iface.name, Instant::now());
            // begin_request guarantees a pending entry exists.
            let _ = cache.enqueue(next_hop, frame);
            started
        };
        if new_request {
            self.send_request(next_hop, &out_iface.name);
        } else {
            debug!("Queued frame behind outstanding ARP request for {}", next_hop);
        }
    }

    pub async fn handle_request(&self, arp: &ArpPacket<'_>, in_iface: &Interface) {
        let target_ip = arp.get_target_proto_addr();
        if target_ip != in_iface.ip_address {
            return;
        }
        let requester = (arp.get_sender_hw_addr(), arp.get_sender_proto_addr());
        match reply_frame(in_iface, requester) {
            Some(frame) => {
                debug!("Answering ARP request from {} on {}", requester.1, in_iface.name);
                self.transport.transmit(&frame, &in_iface.name);
            }
            None => warn!("Failed to build ARP reply for {}", requester.1),
        }
    }

    pub async fn handle_reply(&self, arp: &ArpPacket<'_>, in_iface: &Interface) {
        if arp.get_target_proto_addr() != in_iface.ip_address {
            return;
        }
        let sender_ip = arp.get_sender_proto_addr();
        let sender_mac = arp.get_sender_hw_addr();

        let request = self.cache.lock().await.insert(sender_ip, sender_mac, Instant::now());
        debug!("Learned {} is-at {} on {}", sender_ip, sender_mac, in_iface.name);

        let Some(request) = request else {
            return;
        };
        let frames = request.into_waiting_frames();
        debug!("Releasing {} frame(s) waiting on {}", frames.len(), sender_ip);
        for mut frame in frames {
            packet::set_link_addresses(&mut frame, in_iface.mac_address, sender_mac);
            self.transport.transmit(&frame, &in_iface.name);
        }
    }

    pub async fn handle_packet(&self, arp: &ArpPacket<'_>, in_iface: &Interface) {
        match arp.get_operation() {
            ArpOperations::Request => self.handle_request(arp, in_iface).await,
            ArpOperations::Reply => self.handle_reply(arp, in_iface).await,
            other => debug!("Ignoring ARP operation {:?}", other),
        }
    }

    /// One retry/expiry pass at time `now`.
    pub async fn sweep(&self, now: Instant) {
        let outcome = self.cache.lock().await.sweep(now, &self.settings);

        if outcome.expired_entries > 0 {
            debug!("Expired {} ARP cache entries", outcome.expired_entries);
        }
        for (ip, interface) in &outcome.resend {
            self.send_request(*ip, interface);
        }
        for request in outcome.abandoned {
            info!(
                "ARP resolution of {} failed after {} attempts, dropping {} frame(s)",
                request.target_ip,
                request.retries,
                request.waiting_frames().len()
            );
        }
    }

    pub fn spawn_sweep_task(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = interval(self.settings.retry_interval);
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!("ARP sweep task shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        self.sweep(Instant::now()).await;
                    }
                }
            }
        })
    }
}
