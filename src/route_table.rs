use crate::interface::Interface;
use crate::rip::wire::RipEntry;
use std::fmt;
use std::net::Ipv4Addr;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteSource {
    Direct,  // attached subnet
    Static,  // from configuration
    Rip,     // learned from a neighbour
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    pub destination: Ipv4Addr,
    pub mask: Ipv4Addr,
    /// 0.0.0.0 for directly connected subnets.
    pub gateway: Ipv4Addr,
    pub interface: String,
    pub cost: u32,
    pub last_updated: Instant,
    pub source: RouteSource,
}

impl RouteEntry {
    /// Cost-0 entry for the subnet attached to `iface`.
    pub fn direct(iface: &Interface, now: Instant) -> Self {
        Self {
            destination: iface.network(),
            mask: iface.subnet_mask,
            gateway: Ipv4Addr::UNSPECIFIED,
            interface: iface.name.clone(),
            cost: 0,
            last_updated: now,
            source: RouteSource::Direct,
        }
    }

    pub fn learned(
        destination: Ipv4Addr,
        mask: Ipv4Addr,
        gateway: Ipv4Addr,
        interface: impl Into<String>,
        cost: u32,
        now: Instant,
    ) -> Self {
        Self {
            destination,
            mask,
            gateway,
            interface: interface.into(),
            cost,
            last_updated: now,
            source: RouteSource::Rip,
        }
    }

    pub fn is_directly_connected(&self) -> bool {
        self.gateway.is_unspecified()
    }

    /// Only routes learned through a gateway age out.
    pub fn can_expire(&self) -> bool {
        !self.is_directly_connected() && self.source != RouteSource::Static
    }

    pub fn matches(&self, ip: Ipv4Addr) -> bool {
        let mask = u32::from(self.mask);
        u32::from(ip) & mask == u32::from(self.destination) & mask
    }

    pub fn prefix_len(&self) -> u32 {
        u32::from(self.mask).count_ones()
    }

    /// The address whose link address must be resolved to reach `destination`.
    pub fn next_hop(&self, destination: Ipv4Addr) -> Ipv4Addr {
        if self.is_directly_connected() {
            destination
        } else {
            self.gateway
        }
    }
}

/// Ordered route list. Callers share it as `Arc<RwLock<RouteTable>>`; every
/// method here assumes the caller holds the appropriate guard.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    entries: Vec<RouteEntry>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Longest-prefix match. Among equal masks the entry inserted first wins.
    pub fn lookup(&self, destination: Ipv4Addr) -> Option<&RouteEntry> {
        let mut best: Option<&RouteEntry> = None;
        for entry in &self.entries {
            if !entry.matches(destination) {
                continue;
            }
            match best {
                Some(current) if u32::from(current.mask) >= u32::from(entry.mask) => {}
                _ => best = Some(entry),
            }
        }
        best
    }

    pub fn find_exact(&self, destination: Ipv4Addr, mask: Ipv4Addr) -> Option<&RouteEntry> {
        self.entries
            .iter()
            .find(|entry| entry.destination == destination && entry.mask == mask)
    }

    fn position(&self, destination: Ipv4Addr, mask: Ipv4Addr) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.destination == destination && entry.mask == mask)
    }

    /// Adds `entry`, replacing any entry for the same destination and mask
    /// in place. Returns true if the prefix was not present before.
    pub fn insert(&mut self, entry: RouteEntry) -> bool {
        match self.position(entry.destination, entry.mask) {
            Some(index) => {
                self.entries[index] = entry;
                false
            }
            None => {
                self.entries.push(entry);
                true
            }
        }
    }

    /// Rewrites gateway, interface and timestamp (and cost, if given) of the
    /// exact-match entry. Returns false when there is no such entry.
    pub fn update(
        &mut self,
        destination: Ipv4Addr,
        mask: Ipv4Addr,
        gateway: Ipv4Addr,
        interface: &str,
        now: Instant,
        cost: Option<u32>,
    ) -> bool {
        let Some(index) = self.position(destination, mask) else {
            return false;
        };
        let entry = &mut self.entries[index];
        entry.gateway = gateway;
        entry.interface = interface.to_string();
        entry.last_updated = now;
        if let Some(cost) = cost {
            entry.cost = cost;
        }
        true
    }

    pub fn remove(&mut self, destination: Ipv4Addr, mask: Ipv4Addr) -> Option<RouteEntry> {
        self.position(destination, mask)
            .map(|index| self.entries.remove(index))
    }

    /// Evicts every expirable entry last refreshed at least `timeout` ago.
    pub fn expire(&mut self, now: Instant, timeout: Duration) -> Vec<RouteEntry> {
        let (expired, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|entry| {
                entry.can_expire() && now.saturating_duration_since(entry.last_updated) >= timeout
            });
        self.entries = kept;
        expired
    }

    pub fn snapshot(&self) -> Vec<RouteEntry> {
        self.entries.clone()
    }

    /// Entries to advertise out `out_iface`, with split horizon applied and
    /// the next hop set to our own address on that interface.
    pub fn to_rip_entries(&self, out_iface: &str, next_hop: Ipv4Addr) -> Vec<RipEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.interface != out_iface)
            .map(|entry| RipEntry::new(entry.destination, entry.mask, next_hop, entry.cost))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RouteEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for RouteTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<16} {:<16} {:<16} {:<10} {:<6}",
            "Destination", "Gateway", "Mask", "Iface", "Cost"
        )?;
        writeln!(f, "{}", "-".repeat(68))?;
        for entry in &self.entries {
            writeln!(
                f,
                "{:<16} {:<16} {:<16} {:<10} {:<6}",
                entry.destination, entry.gateway, entry.mask, entry.interface, entry.cost
            )?;
        }
        Ok(())
    }
}
