use pnet::datalink;
use pnet::util::MacAddr;
use std::fmt;
use std::net::Ipv4Addr;

/// A named router port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interface {
    pub name: String,
    pub ip_address: Ipv4Addr,
    pub subnet_mask: Ipv4Addr,
    pub mac_address: MacAddr,
}

impl Interface {
    pub fn new(
        name: impl Into<String>,
        ip_address: Ipv4Addr,
        subnet_mask: Ipv4Addr,
        mac_address: MacAddr,
    ) -> Self {
        Self {
            name: name.into(),
            ip_address,
            subnet_mask,
            mac_address,
        }
    }

    /// Network address of the attached subnet.
    pub fn network(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.ip_address) & u32::from(self.subnet_mask))
    }
}

impl fmt::Display for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<8} {:<15} {:<15} {}",
            self.name, self.ip_address, self.subnet_mask, self.mac_address
        )
    }
}

/// Interfaces in the order they were added, unique by name. Populated
/// before `Router::init` and read-only afterwards, so it is shared without
/// a lock.
#[derive(Debug, Clone, Default)]
pub struct InterfaceRegistry {
    interfaces: Vec<Interface>,
}

impl InterfaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `interface`, replacing one of the same name in place. Returns
    /// the replaced interface.
    pub fn add(&mut self, interface: Interface) -> Option<Interface> {
        match self.interfaces.iter_mut().find(|iface| iface.name == interface.name) {
            Some(slot) => Some(std::mem::replace(slot, interface)),
            None => {
                self.interfaces.push(interface);
                None
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Interface> {
        self.interfaces.iter().find(|iface| iface.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Interface> {
        self.interfaces.iter()
    }

    pub fn len(&self) -> usize {
        self.interfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interfaces.is_empty()
    }

    /// True when `ip` is one of our own interface addresses.
    pub fn is_local_address(&self, ip: Ipv4Addr) -> bool {
        self.interfaces.iter().any(|iface| iface.ip_address == ip)
    }
}

impl FromIterator<Interface> for InterfaceRegistry {
    fn from_iter<T: IntoIterator<Item = Interface>>(iter: T) -> Self {
        let mut registry = Self::new();
        for interface in iter {
            registry.add(interface);
        }
        registry
    }
}

/// MAC address of the host interface called `name`, if the host has one.
pub fn host_mac_address(name: &str) -> Option<MacAddr> {
    datalink::interfaces()
        .into_iter()
        .find(|iface| iface.name == name)
        .and_then(|iface| iface.mac)
}
