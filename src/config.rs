use crate::arp::ArpSettings;
use crate::error::ConfigError;
use crate::icmp;
use crate::interface::{self, Interface, InterfaceRegistry};
use crate::rip::{self, RipSettings};
use crate::route_table::{RouteEntry, RouteSource};
use ipnet::Ipv4Net;
use pnet::util::MacAddr;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Deserialize)]
pub struct RouterConfig {
    pub interfaces: Vec<InterfaceConfig>,
    #[serde(default)]
    pub rip: RipConfig,
    #[serde(default)]
    pub arp: ArpConfig,
    #[serde(default)]
    pub static_routes: Vec<StaticRouteConfig>,
    #[serde(default = "default_icmp_ttl")]
    pub icmp_ttl: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InterfaceConfig {
    pub name: String,
    /// Interface address with prefix length, e.g. `192.168.1.1/24`.
    pub address: Ipv4Net,
    /// Taken from the host interface of the same name when omitted.
    #[serde(default)]
    pub mac: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RipConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_update_interval")]
    pub update_interval_secs: u64,
    #[serde(default = "default_route_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_rip_ttl")]
    pub ttl: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArpConfig {
    #[serde(default = "default_arp_retry_interval")]
    pub retry_interval_ms: u64,
    #[serde(default = "default_arp_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_arp_entry_timeout")]
    pub entry_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StaticRouteConfig {
    pub destination: Ipv4Net,
    #[serde(default = "default_gateway")]
    pub gateway: Ipv4Addr,
    pub interface: String,
    #[serde(default)]
    pub cost: u32,
}

fn default_true() -> bool {
    true
}

fn default_icmp_ttl() -> u8 {
    icmp::DEFAULT_TTL
}

fn default_update_interval() -> u64 {
    rip::UPDATE_INTERVAL.as_secs()
}

fn default_route_timeout() -> u64 {
    rip::TIMEOUT.as_secs()
}

fn default_rip_ttl() -> u8 {
    rip::DEFAULT_TTL
}

fn default_arp_retry_interval() -> u64 {
    1000
}

fn default_arp_max_retries() -> u32 {
    5
}

fn default_arp_entry_timeout() -> u64 {
    15
}

fn default_gateway() -> Ipv4Addr {
    Ipv4Addr::UNSPECIFIED
}

impl Default for RipConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            update_interval_secs: default_update_interval(),
            timeout_secs: default_route_timeout(),
            ttl: default_rip_ttl(),
        }
    }
}

impl Default for ArpConfig {
    fn default() -> Self {
        Self {
            retry_interval_ms: default_arp_retry_interval(),
            max_retries: default_arp_max_retries(),
            entry_timeout_secs: default_arp_entry_timeout(),
        }
    }
}

impl RouterConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config: RouterConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut names = HashSet::new();
        for iface in &self.interfaces {
            if !names.insert(iface.name.as_str()) {
                return Err(ConfigError::DuplicateInterface(iface.name.clone()));
            }
        }

        if self.rip.update_interval_secs == 0 {
            return Err(ConfigError::InvalidTimers("rip.update_interval_secs must be positive".into()));
        }
        if self.rip.timeout_secs < self.rip.update_interval_secs {
            return Err(ConfigError::InvalidTimers(
                "rip.timeout_secs must be at least rip.update_interval_secs".into(),
            ));
        }
        if self.arp.retry_interval_ms == 0 || self.arp.max_retries == 0 {
            return Err(ConfigError::InvalidTimers(
                "arp.retry_interval_ms and arp.max_retries must be positive".into(),
            ));
        }

        for route in &self.static_routes {
            if !names.contains(route.interface.as_str()) {
                return Err(ConfigError::UnknownRouteInterface {
                    destination: route.destination.to_string(),
                    interface: route.interface.clone(),
                });
            }
            if route.destination.addr() != route.destination.network() {
                return Err(ConfigError::HostBitsSet(route.destination.to_string()));
            }
            if route.gateway.is_multicast() || route.gateway.is_broadcast() {
                return Err(ConfigError::InvalidGateway(route.gateway));
            }
        }
        Ok(())
    }

    /// Builds the interface registry, filling in missing MAC addresses from
    /// the host.
    pub fn build_interfaces(&self) -> Result<InterfaceRegistry, ConfigError> {
        self.interfaces
            .iter()
            .map(|iface| -> Result<Interface, ConfigError> {
                let mac = match &iface.mac {
                    Some(value) => value.parse::<MacAddr>().map_err(|_| ConfigError::InvalidMac {
                        name: iface.name.clone(),
                        value: value.clone(),
                    })?,
                    None => interface::host_mac_address(&iface.name)
                        .ok_or_else(|| ConfigError::MissingMac(iface.name.clone()))?,
                };
                Ok(Interface::new(
                    iface.name.clone(),
                    iface.address.addr(),
                    iface.address.netmask(),
                    mac,
                ))
            })
            .collect()
    }

    pub fn rip_settings(&self) -> RipSettings {
        RipSettings {
            update_interval: Duration::from_secs(self.rip.update_interval_secs),
            timeout: Duration::from_secs(self.rip.timeout_secs),
            ttl: self.rip.ttl,
        }
    }

    pub fn arp_settings(&self) -> ArpSettings {
        ArpSettings {
            retry_interval: Duration::from_millis(self.arp.retry_interval_ms),
            max_retries: self.arp.max_retries,
            entry_timeout: Duration::from_secs(self.arp.entry_timeout_secs),
        }
    }

    pub fn static_route_entries(&self, now: Instant) -> Vec<RouteEntry> {
        self.static_routes
            .iter()
            .map(|route| RouteEntry {
                destination: route.destination.network(),
                mask: route.destination.netmask(),
                gateway: route.gateway,
                interface: route.interface.clone(),
                cost: route.cost,
                last_updated: now,
                source: RouteSource::Static,
            })
            .collect()
    }
}
