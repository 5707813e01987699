pub mod arp;
pub mod config;
pub mod error;
pub mod icmp;
pub mod interface;
pub mod packet;
pub mod rip;
pub mod route_table;
pub mod router;
pub mod transport;

pub use config::RouterConfig;
pub use error::{ConfigError, PacketError};
pub use interface::{Interface, InterfaceRegistry};
pub use route_table::{RouteEntry, RouteSource, RouteTable};
pub use router::{Router, RouterSettings};
pub use transport::{DatalinkTransport, ReceivedFrame, Transport};
