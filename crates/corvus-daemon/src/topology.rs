//! The topology table: every known destination prefix with its per-neighbor candidate entries. All distances are recomputed on
//! mutation; successor flags are maintained so that at most one entry carries the flag while the prefix is passive.

use crate::{
    interface::InterfaceId,
    neighbor::NeighborKey,
    timers::TimerId,
};
use bitflags::bitflags;
use corvus_common::Prefix;
use corvus_eigrp::metric::{
    EigrpMetrics,
    KValues,
    EIGRP_MAX_METRIC,
};
use std::{
    collections::{
        BTreeMap,
        BTreeSet,
    },
    net::Ipv4Addr,
};

/// Canonical table key: the masked network address plus the prefix length.
pub type PrefixKey = (Ipv4Addr, u8);

pub fn prefix_key(prefix: &Prefix) -> PrefixKey {
    let network = prefix.network();
    (network.address, network.length)
}

bitflags! {
    #[derive(Clone, Debug, Eq, PartialEq, Hash, Copy, Default)]
    pub struct EntryFlags: u8 {
        const SUCCESSOR = 0x01;
        const FEASIBLE_SUCCESSOR = 0x02;
    }
}

/// DUAL computation state of a prefix. The four active variants track what caused the diffusing computation; only `Active1`
/// (locally originated) and `Active3` (triggered by a peer's query) are entered by this implementation.
#[derive(Debug, Eq, PartialEq, Clone, Copy, Default)]
pub enum DualState {
    #[default]
    Passive,
    Active0,
    Active1,
    Active2,
    Active3,
}

impl DualState {
    pub fn is_active(&self) -> bool {
        *self != Self::Passive
    }
}

#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum DestinationType {
    Connected,
    Remote,
}

/// One candidate path toward a prefix: the advertising neighbor (None for the connected self-entry), the metric vector it
/// reported and the vector after folding in our own link.
#[derive(Debug, Clone)]
pub struct RouteEntry {
    pub neighbor: Option<NeighborKey>,
    pub interface: InterfaceId,
    pub reported_metric: EigrpMetrics,
    pub total_metric: EigrpMetrics,
    pub reported_distance: u32,
    pub distance: u32,
    pub flags: EntryFlags,
}

impl RouteEntry {
    /// The feasibility condition: a candidate is usable without diffusion when the neighbor's own distance is below our
    /// feasible distance. The connected self-entry is feasible by definition.
    pub fn is_feasible(&self, feasible_distance: u32) -> bool {
        self.neighbor.is_none() || self.reported_distance < feasible_distance
    }

    pub fn is_successor(&self) -> bool {
        self.flags.contains(EntryFlags::SUCCESSOR)
    }
}

pub struct PrefixEntry {
    pub destination: Prefix,
    pub state: DualState,
    pub dest_type: DestinationType,
    /// Lowest distance seen while passive since the last active transition; frozen while active.
    pub feasible_distance: u32,
    /// The distance we advertise to peers.
    pub reported_distance: u32,
    /// Distance of the current successor.
    pub distance: u32,
    pub entries: Vec<RouteEntry>,
    /// Neighbors from whom a REPLY is outstanding while active.
    pub rij: BTreeSet<NeighborKey>,
    /// Subset of `rij` that has not answered the SIAQUERY probe.
    pub sia_pending: BTreeSet<NeighborKey>,
    /// Neighbor whose message drove the prefix active; excluded from the completion flood.
    pub active_origin: Option<NeighborKey>,
    pub serial: u64,
    pub need_update: bool,
    pub active_timer: Option<TimerId>,
    pub sia_timer: Option<TimerId>,
}

impl PrefixEntry {
    pub fn new(destination: Prefix, dest_type: DestinationType) -> Self {
        Self {
            destination: destination.network(),
            state: DualState::Passive,
            dest_type,
            feasible_distance: EIGRP_MAX_METRIC,
            reported_distance: EIGRP_MAX_METRIC,
            distance: EIGRP_MAX_METRIC,
            entries: Vec::new(),
            rij: BTreeSet::new(),
            sia_pending: BTreeSet::new(),
            active_origin: None,
            serial: 0,
            need_update: false,
            active_timer: None,
            sia_timer: None,
        }
    }

    pub fn successor(&self) -> Option<&RouteEntry> {
        self.entries.iter().find(|entry| entry.is_successor())
    }

    pub fn entry_for(&self, neighbor: Option<NeighborKey>) -> Option<&RouteEntry> {
        self.entries.iter().find(|entry| entry.neighbor == neighbor)
    }

    pub fn entry_for_mut(&mut self, neighbor: Option<NeighborKey>) -> Option<&mut RouteEntry> {
        self.entries.iter_mut().find(|entry| entry.neighbor == neighbor)
    }

    /// Minimum candidate distance, `EIGRP_MAX_METRIC` when the prefix has no usable path at all.
    pub fn min_distance(&self) -> u32 {
        self.entries.iter().map(|entry| entry.distance).min().unwrap_or(EIGRP_MAX_METRIC)
    }

    /// Whether any candidate satisfies the feasibility condition against the current feasible distance.
    pub fn has_feasible_successor(&self) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.is_feasible(self.feasible_distance) && entry.distance != EIGRP_MAX_METRIC)
    }

    /// Picks the new successor among the candidates `eligible` admits, breaking distance ties by (a) the entry currently
    /// flagged successor, (b) the lowest incoming-interface index, (c) the lowest advertising-neighbor address. Re-flags
    /// feasible successors, refreshes the summary distances and marks `need_update` when the outcome changed.
    pub fn select_successor(&mut self, eligible: impl Fn(&RouteEntry) -> bool) -> SuccessorChange {
        let previous = self.entries.iter().position(|entry| entry.is_successor());

        let mut best: Option<usize> = None;
        for (index, entry) in self.entries.iter().enumerate() {
            if entry.distance == EIGRP_MAX_METRIC || !eligible(entry) {
                continue;
            }
            best = Some(match best {
                None => index,
                Some(current) => {
                    let challenger = &self.entries[index];
                    let incumbent = &self.entries[current];
                    if challenger.distance < incumbent.distance {
                        index
                    } else if challenger.distance > incumbent.distance {
                        current
                    } else {
                        Self::break_tie(incumbent, current, challenger, index)
                    }
                }
            });
        }

        let feasible_distance = self.feasible_distance;
        for entry in &mut self.entries {
            entry.flags.remove(EntryFlags::SUCCESSOR | EntryFlags::FEASIBLE_SUCCESSOR);
            if entry.is_feasible(feasible_distance) && entry.distance != EIGRP_MAX_METRIC {
                entry.flags.insert(EntryFlags::FEASIBLE_SUCCESSOR);
            }
        }

        let old_distance = self.distance;
        match best {
            Some(index) => {
                self.entries[index].flags.insert(EntryFlags::SUCCESSOR);
                self.distance = self.entries[index].distance;
                self.reported_distance = self.distance;
            }
            None => {
                self.distance = EIGRP_MAX_METRIC;
                self.reported_distance = EIGRP_MAX_METRIC;
            }
        }

        let changed = previous != best || old_distance != self.distance;
        if changed {
            self.need_update = true;
        }
        SuccessorChange {
            changed,
            successor: best.and_then(|index| self.entries.get(index)).map(|entry| entry.neighbor).flatten(),
            distance: self.distance,
        }
    }

    fn break_tie(incumbent: &RouteEntry, current: usize, challenger: &RouteEntry, index: usize) -> usize {
        if incumbent.is_successor() {
            return current;
        }
        if challenger.is_successor() {
            return index;
        }
        if challenger.interface != incumbent.interface {
            return if challenger.interface < incumbent.interface { index } else { current };
        }
        let challenger_addr = challenger.neighbor.map(|(_, addr)| addr.to_bits()).unwrap_or(0);
        let incumbent_addr = incumbent.neighbor.map(|(_, addr)| addr.to_bits()).unwrap_or(0);
        if challenger_addr < incumbent_addr {
            index
        } else {
            current
        }
    }
}

#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub struct SuccessorChange {
    pub changed: bool,
    pub successor: Option<NeighborKey>,
    pub distance: u32,
}

/// What an upsert did to the candidate set; DUAL decides on the severity.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum EntryChange {
    New,
    MetricChanged { distance_increased: bool },
    Unreachable,
    Unchanged,
}

#[derive(Default)]
pub struct TopologyTable {
    prefixes: BTreeMap<PrefixKey, PrefixEntry>,
    serial: u64,
}

impl TopologyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, prefix: &Prefix) -> Option<&PrefixEntry> {
        self.prefixes.get(&prefix_key(prefix))
    }

    pub fn lookup_mut(&mut self, prefix: &Prefix) -> Option<&mut PrefixEntry> {
        self.prefixes.get_mut(&prefix_key(prefix))
    }

    /// Fetches or creates the passive, empty prefix entry for a destination.
    pub fn insert(&mut self, destination: Prefix, dest_type: DestinationType) -> &mut PrefixEntry {
        self.serial += 1;
        let serial = self.serial;
        let entry = self
            .prefixes
            .entry(prefix_key(&destination))
            .or_insert_with(|| PrefixEntry::new(destination, dest_type));
        entry.serial = serial;
        entry
    }

    pub fn remove(&mut self, destination: &Prefix) -> Option<PrefixEntry> {
        self.prefixes.remove(&prefix_key(destination))
    }

    pub fn iter(&self) -> impl Iterator<Item = &PrefixEntry> {
        self.prefixes.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut PrefixEntry> {
        self.prefixes.values_mut()
    }

    pub fn len(&self) -> usize {
        self.prefixes.len()
    }

    /// Applies a neighbor's advertisement for a prefix: folds the link metric into the reported vector, recomputes both
    /// distances and creates or updates the candidate entry.
    pub fn upsert_entry(
        &mut self,
        destination: Prefix,
        neighbor: NeighborKey,
        interface: InterfaceId,
        reported_metric: EigrpMetrics,
        link_metric: EigrpMetrics,
        k_values: &KValues,
    ) -> EntryChange {
        let total_metric = reported_metric.across_link(link_metric.bandwidth, link_metric.delay, link_metric.mtu);
        let reported_distance = k_values.composite(&reported_metric);
        let distance = k_values.composite(&total_metric);

        self.serial += 1;
        let serial = self.serial;
        let entry = self
            .prefixes
            .entry(prefix_key(&destination))
            .or_insert_with(|| PrefixEntry::new(destination, DestinationType::Remote));
        entry.serial = serial;

        match entry.entry_for_mut(Some(neighbor)) {
            Some(existing) => {
                let old_distance = existing.distance;
                let unchanged = existing.reported_metric == reported_metric;
                existing.reported_metric = reported_metric;
                existing.total_metric = total_metric;
                existing.reported_distance = reported_distance;
                existing.distance = distance;

                if unchanged {
                    EntryChange::Unchanged
                } else if distance == EIGRP_MAX_METRIC {
                    EntryChange::Unreachable
                } else {
                    EntryChange::MetricChanged {
                        distance_increased: distance > old_distance,
                    }
                }
            }
            None => {
                entry.entries.push(RouteEntry {
                    neighbor: Some(neighbor),
                    interface,
                    reported_metric,
                    total_metric,
                    reported_distance,
                    distance,
                    flags: EntryFlags::empty(),
                });
                if distance == EIGRP_MAX_METRIC {
                    EntryChange::Unreachable
                } else {
                    EntryChange::New
                }
            }
        }
    }

    /// Installs the self-originated entry for a connected prefix: distance and feasible distance both zero, never active.
    pub fn insert_connected(&mut self, destination: Prefix, interface: InterfaceId, link_metric: EigrpMetrics) {
        self.serial += 1;
        let serial = self.serial;
        let entry = self
            .prefixes
            .entry(prefix_key(&destination))
            .or_insert_with(|| PrefixEntry::new(destination, DestinationType::Connected));
        entry.serial = serial;
        entry.dest_type = DestinationType::Connected;
        entry.feasible_distance = 0;
        entry.distance = 0;
        entry.reported_distance = 0;

        if entry.entry_for(None).is_none() {
            entry.entries.push(RouteEntry {
                neighbor: None,
                interface,
                reported_metric: link_metric,
                total_metric: link_metric,
                reported_distance: 0,
                distance: 0,
                flags: EntryFlags::SUCCESSOR,
            });
        }
    }

    /// Removes a single neighbor's candidate from a prefix. Returns true when an entry was actually dropped.
    pub fn withdraw(&mut self, destination: &Prefix, neighbor: NeighborKey) -> bool {
        self.serial += 1;
        let serial = self.serial;
        if let Some(entry) = self.prefixes.get_mut(&prefix_key(destination)) {
            let before = entry.entries.len();
            entry.entries.retain(|candidate| candidate.neighbor != Some(neighbor));
            entry.serial = serial;
            return entry.entries.len() != before;
        }
        false
    }

    /// Single-pass withdrawal of every candidate a dying neighbor contributed, also scrubbing it from any outstanding reply
    /// sets. Returns the affected prefixes so the caller can feed DUAL one event per prefix.
    pub fn withdraw_all(&mut self, neighbor: NeighborKey) -> Vec<Prefix> {
        self.serial += 1;
        let serial = self.serial;
        let mut affected = Vec::new();
        for entry in self.prefixes.values_mut() {
            let before = entry.entries.len();
            entry.entries.retain(|candidate| candidate.neighbor != Some(neighbor));
            let touched = entry.entries.len() != before
                || entry.rij.remove(&neighbor)
                || entry.sia_pending.remove(&neighbor);
            if touched {
                entry.serial = serial;
                affected.push(entry.destination);
            }
        }
        affected
    }
}
