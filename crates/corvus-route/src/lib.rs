use corvus_common::Prefix;
use std::{
    future::Future,
    io,
    net::Ipv4Addr,
};
use thiserror::Error;

#[cfg(target_os = "linux")] pub mod linux;

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("IO Error => {0}")]
    Io(#[from] io::Error),

    // Platform-specific errors
    #[cfg(target_os = "linux")]
    #[error("Netlink error => {0}")]
    Netlink(#[from] rtnetlink::Error),
}

/// This enum describes the routing protocol that was used to learn a route.
#[derive(Ord, PartialOrd, Eq, PartialEq, Debug, Hash, Clone, Copy)]
pub enum RouteProtocol {
    /// The source of the route is unknown to this library.
    ///
    /// ## References
    /// - [Page 8, RFC 1354](https://www.rfc-editor.org/rfc/rfc1354.html)
    Other,

    /// This route was manually added by the system administrator.
    ///
    /// ## References
    /// - [Page 8, RFC 1354](https://www.rfc-editor.org/rfc/rfc1354.html) as Netmgmt
    Static,

    /// This route was learned via the Enhanced Interior Gateway Routing Protocol (EIGRP). Routes installed through
    /// [`RouteTable::install`] carry this origin.
    Eigrp,

    /// This route was learned via the Open Shortest Path First (OSPF) Protocol.
    ///
    /// ## References
    /// - [Page 8, RFC 1354](https://www.rfc-editor.org/rfc/rfc1354.html)
    Ospf,

    /// This route was learned via the Border Gateway Protocol (BGP).
    Bgp,

    /// This route was learned via the Dynamic Host Configuration Protocol (DHCP).
    Dhcp,

    /// This route was added by the operating system.
    Kernel,
}

/// This struct represents a single IPv4 route in the routing table of the current environment in a platform-agnostic way. It is
/// the central wrapping object around the routing table's entries.
#[derive(Ord, PartialOrd, Eq, PartialEq, Debug, Hash, Clone, Copy)]
pub struct Route {
    pub protocol: RouteProtocol,
    pub next_hop: Option<Ipv4Addr>,
    pub destination: Option<Prefix>,
    pub priority: Option<u32>,
}

/// This trait is used to implement a platform-agnostic routing table client. The routing daemon pushes its computed successors
/// through [`RouteTable::install`] and retracts them through [`RouteTable::withdraw`]; both operations are safe to repeat with
/// unchanged arguments.
pub trait RouteTable: Sized {
    fn new() -> Result<Self, RouteError>;
    fn all(&self) -> impl Future<Output = Result<Vec<Route>, RouteError>> + Send;
    fn install(&self, destination: Prefix, next_hop: Ipv4Addr, priority: u32) -> impl Future<Output = Result<(), RouteError>> + Send;
    fn withdraw(&self, destination: Prefix) -> impl Future<Output = Result<(), RouteError>> + Send;
}
