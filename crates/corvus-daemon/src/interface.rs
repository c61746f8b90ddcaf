//! Per-link state of the routing process: configured parameters, the neighbor table, the output queue and traffic counters.

use crate::{
    events::{
        AuthOracle,
        PrefixFilter,
    },
    neighbor::Neighbor,
    timers::TimerId,
    transport::PacketFifo,
};
use corvus_common::Prefix;
use corvus_eigrp::metric::EigrpMetrics;
use serde::Deserialize;
use std::{
    collections::BTreeMap,
    net::Ipv4Addr,
};

/// Index of an interface inside the router's interface vector. Candidate entries reference interfaces through this id instead
/// of owning pointers.
pub type InterfaceId = usize;

pub const HELLO_INTERVAL_DEFAULT: u16 = 5;
pub const HOLD_TIME_DEFAULT: u16 = 15;
pub const BANDWIDTH_DEFAULT: u32 = 100_000;
pub const DELAY_DEFAULT: u32 = 10;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NetworkType {
    PointToPoint,
    #[default]
    Broadcast,
    Nbma,
    PointToMultipoint,
    Loopback,
}

/// Configured per-link parameters. Bandwidth is in kbit/s, delay in tens of microseconds; both feed metric composition.
#[derive(Debug, Clone)]
pub struct InterfaceParams {
    pub hello_interval: u16,
    pub hold_time: u16,
    pub bandwidth: u32,
    pub delay: u32,
    pub reliability: u8,
    pub load: u8,
    pub network_type: NetworkType,
    pub passive: bool,
}

impl Default for InterfaceParams {
    fn default() -> Self {
        Self {
            hello_interval: HELLO_INTERVAL_DEFAULT,
            hold_time: HOLD_TIME_DEFAULT,
            bandwidth: BANDWIDTH_DEFAULT,
            delay: DELAY_DEFAULT,
            reliability: 255,
            load: 1,
            network_type: NetworkType::default(),
            passive: false,
        }
    }
}

/// Traffic and drop counters kept per interface.
#[derive(Debug, Default, Clone, Copy)]
pub struct InterfaceStats {
    pub hello_in: u32,
    pub hello_out: u32,
    pub update_in: u32,
    pub update_out: u32,
    pub query_in: u32,
    pub query_out: u32,
    pub reply_in: u32,
    pub reply_out: u32,
    pub dropped: u32,
}

pub struct EigrpInterface {
    pub id: InterfaceId,
    pub name: String,
    pub ifindex: u32,
    /// The interface address together with its prefix length.
    pub address: Prefix,
    pub mtu: u32,
    pub params: InterfaceParams,
    pub neighbors: BTreeMap<Ipv4Addr, Neighbor>,
    /// Outbound packet queue drained by the write-ready scheduler.
    pub obuf: PacketFifo,
    pub hello_timer: Option<TimerId>,
    pub on_write_queue: bool,
    pub stats: InterfaceStats,
    pub inbound_filter: Option<Box<dyn PrefixFilter>>,
    pub outbound_filter: Option<Box<dyn PrefixFilter>>,
    pub auth_oracle: Option<Box<dyn AuthOracle>>,
}

impl EigrpInterface {
    pub fn new(id: InterfaceId, name: String, ifindex: u32, address: Prefix, mtu: u32, params: InterfaceParams) -> Self {
        Self {
            id,
            name,
            ifindex,
            address,
            mtu,
            params,
            neighbors: BTreeMap::new(),
            obuf: PacketFifo::new(),
            hello_timer: None,
            on_write_queue: false,
            stats: InterfaceStats::default(),
            inbound_filter: None,
            outbound_filter: None,
            auth_oracle: None,
        }
    }

    /// The connected prefix this interface contributes to the topology table.
    pub fn connected_prefix(&self) -> Prefix {
        self.address.network()
    }

    /// The metric vector this link originates: its own bandwidth/delay/MTU with a zero hop count. Connected prefixes and the
    /// per-entry link composition both start from this.
    pub fn link_metric(&self) -> EigrpMetrics {
        EigrpMetrics {
            delay: self.params.delay,
            bandwidth: self.params.bandwidth,
            mtu: self.mtu,
            hop_count: 0,
            reliability: self.params.reliability,
            load: self.params.load,
            tag: 0,
            flags: 0,
        }
    }

    /// Whether a packet source belongs on this link. Point-to-point links accept any source, everything else must fall inside
    /// the interface subnet.
    pub fn accepts_source(&self, source: Ipv4Addr) -> bool {
        matches!(self.params.network_type, NetworkType::PointToPoint) || self.address.contains(source)
    }

    pub fn permits_inbound(&self, prefix: &Prefix) -> bool {
        self.inbound_filter.as_ref().map(|filter| filter.permit(prefix)).unwrap_or(true)
    }

    pub fn permits_outbound(&self, prefix: &Prefix) -> bool {
        self.outbound_filter.as_ref().map(|filter| filter.permit(prefix)).unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn interface() -> EigrpInterface {
        EigrpInterface::new(
            0,
            "eth0".to_string(),
            2,
            Prefix::from_str("10.0.1.1/24").unwrap(),
            1500,
            InterfaceParams::default(),
        )
    }

    #[test]
    fn subnet_check_follows_network_type() {
        let mut iface = interface();
        assert!(iface.accepts_source(Ipv4Addr::new(10, 0, 1, 2)));
        assert!(!iface.accepts_source(Ipv4Addr::new(10, 0, 2, 2)));

        iface.params.network_type = NetworkType::PointToPoint;
        assert!(iface.accepts_source(Ipv4Addr::new(10, 0, 2, 2)));
    }

    #[test]
    fn connected_prefix_is_masked() {
        assert_eq!(interface().connected_prefix(), Prefix::from_str("10.0.1.0/24").unwrap());
    }
}
