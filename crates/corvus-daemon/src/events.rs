//! Interfaces to the daemon's external collaborators: the host interface discovery, the forwarding-table client, the
//! distribute-list oracles and the authentication oracle. The protocol core only ever talks to these traits; the concrete
//! implementations live at the edges (`discovery`, `corvus-route`, configuration).

use corvus_common::Prefix;
use std::net::Ipv4Addr;

/// Typed events the interface-discovery collaborator feeds into the router. The core reacts by creating or tearing down EIGRP
/// interfaces and refreshing connected prefixes.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum InterfaceEvent {
    Up {
        name: String,
        ifindex: u32,
        address: Prefix,
        mtu: u32,
    },
    Down {
        ifindex: u32,
    },
    MtuChanged {
        ifindex: u32,
        mtu: u32,
    },
}

/// Receiver for computed routes. Implementations are expected to be idempotent: re-installing an unchanged route must not
/// produce a second host update, which the router additionally guarantees by caching what it last pushed.
pub trait RouteSink {
    fn install(&mut self, destination: Prefix, next_hop: Ipv4Addr, distance: u32);
    fn withdraw(&mut self, destination: Prefix);
}

/// Boolean distribute-list oracle consulted per direction. A denied inbound prefix is stored poisoned (unreachable delay); a
/// denied outbound prefix is simply not emitted.
pub trait PrefixFilter {
    fn permit(&self, prefix: &Prefix) -> bool;
}

/// Prefix-list filter built from configuration: first matching entry decides, otherwise the default verdict applies.
#[derive(Debug, Clone)]
pub struct PrefixListFilter {
    entries: Vec<(Prefix, bool)>,
    default_permit: bool,
}

impl PrefixListFilter {
    pub fn new(entries: Vec<(Prefix, bool)>, default_permit: bool) -> Self {
        Self { entries, default_permit }
    }

    /// A list that denies exactly the given prefixes and permits everything else.
    pub fn deny_list(denied: Vec<Prefix>) -> Self {
        Self {
            entries: denied.into_iter().map(|prefix| (prefix, false)).collect(),
            default_permit: true,
        }
    }
}

impl PrefixFilter for PrefixListFilter {
    fn permit(&self, prefix: &Prefix) -> bool {
        for (classifier, permit) in &self.entries {
            if classifier.covers(prefix) {
                return *permit;
            }
        }
        self.default_permit
    }
}

/// Keyed-MAC oracle for the AUTH TLV. `sign` returns the MAC frame to embed into outbound packets of an interface, `verify`
/// checks an inbound packet's frame. The daemon core carries the bytes and the verdicts; key handling stays outside.
pub trait AuthOracle {
    fn sign(&self, ifindex: u32, payload: &[u8]) -> Option<Vec<u8>>;
    fn verify(&self, ifindex: u32, payload: &[u8], mac: &[u8]) -> bool;
}
