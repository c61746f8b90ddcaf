//! A peer on a directly attached link and its adjacency state. Neighbors come into existence on the first valid hello from an
//! unknown source and disappear on hold-down expiry, peer termination, K-value mismatch or retransmission exhaustion.

use crate::{
    interface::InterfaceId,
    timers::TimerId,
    transport::PacketFifo,
};
use corvus_eigrp::{
    general::SoftwareVersionTlv,
    metric::KValues,
};
use std::net::Ipv4Addr;

/// Identifies a neighbor across the router: the owning interface plus the peer address.
pub type NeighborKey = (InterfaceId, Ipv4Addr);

#[derive(Debug, Eq, PartialEq, Ord, PartialOrd, Clone, Copy, Default)]
pub enum NeighborState {
    #[default]
    Down,
    /// Hello exchanged and K-values match; our INIT UPDATE is in flight.
    Pending,
    /// The peer acknowledged our INIT; we are streaming our table, terminated by an EOT UPDATE.
    PendingInit,
    /// Full adjacency: both tables exchanged.
    Up,
}

pub struct Neighbor {
    pub address: Ipv4Addr,
    pub interface: InterfaceId,
    pub state: NeighborState,
    /// Last sequence number received from the peer, folded into outbound acks.
    pub recv_sequence: u32,
    /// K-values the peer advertised in its PARAMETER TLV.
    pub k_values: KValues,
    /// Hold time negotiated from the peer's PARAMETER TLV.
    pub hold_time: u16,
    /// Sequence of the INIT UPDATE we sent; zero when none is outstanding.
    pub init_sequence: u32,
    pub hold_timer: Option<TimerId>,
    /// Unicast-reliable packets awaiting acknowledgement.
    pub retrans: PacketFifo,
    /// Per-neighbor copies of multicast sends, retried as unicast when unacknowledged.
    pub multicast: PacketFifo,
    pub sw_version: SoftwareVersionTlv,
}

impl Neighbor {
    pub fn new(interface: InterfaceId, address: Ipv4Addr, hold_time: u16) -> Self {
        Self {
            address,
            interface,
            state: NeighborState::Down,
            recv_sequence: 0,
            k_values: KValues::default(),
            hold_time,
            init_sequence: 0,
            hold_timer: None,
            retrans: PacketFifo::new(),
            multicast: PacketFifo::new(),
            sw_version: SoftwareVersionTlv::default(),
        }
    }

    pub fn key(&self) -> NeighborKey {
        (self.interface, self.address)
    }

    pub fn is_up(&self) -> bool {
        self.state == NeighborState::Up
    }
}
