use std::net::Ipv4Addr;
use thiserror::Error;

/// Reasons an inbound frame is discarded before it reaches any handler.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PacketError {
    #[error("truncated {0} header")]
    Truncated(&'static str),

    #[error("invalid IPv4 header: {0}")]
    InvalidIpv4(&'static str),

    #[error("unsupported RIP version {0}")]
    UnsupportedRipVersion(u8),

    #[error("unknown RIP command {0}")]
    UnknownRipCommand(u8),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("duplicate interface name: {0}")]
    DuplicateInterface(String),

    #[error("invalid MAC address for {name}: {value}")]
    InvalidMac { name: String, value: String },

    #[error("no MAC address configured or discoverable for {0}")]
    MissingMac(String),

    #[error("static route {destination} refers to unknown interface {interface}")]
    UnknownRouteInterface { destination: String, interface: String },

    #[error("static route destination {0} is not a network address")]
    HostBitsSet(String),

    #[error("gateway {0} is not a unicast address")]
    InvalidGateway(Ipv4Addr),

    #[error("invalid timer settings: {0}")]
    InvalidTimers(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Json(#[from] serde_json::Error),
}
