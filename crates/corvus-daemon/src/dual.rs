//! The Diffusing Update Algorithm, expressed as pure transitions over a prefix entry. Handlers absorb the triggering message
//! into the topology table first, then call into this module; the returned actions (floods, queries, replies, host-table
//! updates, timer arming) are executed by the engine. Keeping the transitions side-effect free mirrors the deferred event
//! dispatch of classic implementations and makes every path unit-testable.

use crate::{
    neighbor::NeighborKey,
    topology::{
        DestinationType,
        DualState,
        PrefixEntry,
    },
};
use corvus_common::Prefix;
use corvus_eigrp::metric::EIGRP_MAX_METRIC;
use std::{
    collections::BTreeSet,
    time::Duration,
};

/// Budget of a diffusing computation before it is declared stuck.
pub const ACTIVE_TIMEOUT: Duration = Duration::from_secs(180);

/// Half-budget point at which unresponsive peers are probed with SIAQUERY.
pub const SIA_PROBE_TIMEOUT: Duration = Duration::from_secs(90);

/// Side effects a DUAL transition asks the engine to perform.
#[derive(Debug, Eq, PartialEq, Clone)]
pub enum DualAction {
    /// Multicast an UPDATE for the prefix on every interface except the one the triggering message arrived on.
    FloodUpdate { prefix: Prefix, except: Option<NeighborKey> },
    /// Send a QUERY for the prefix to every neighbor in the freshly filled `rij`.
    SendQueries { prefix: Prefix },
    /// Probe the listed neighbors with SIAQUERY.
    SendSiaQueries { prefix: Prefix, to: Vec<NeighborKey> },
    /// Push the current successor to the host forwarding table (or retract it when none is left).
    Install { prefix: Prefix },
    /// Last candidate disappeared: flood a single unreachable UPDATE and delete the prefix.
    DeletePrefix { prefix: Prefix },
    /// Arm the active/SIA timer pair for a starting computation.
    StartActiveTimers { prefix: Prefix },
    /// Disarm the active/SIA timer pair of a finished computation.
    StopActiveTimers { prefix: Prefix },
    /// Tear down a peer that stayed silent through the SIA budget.
    TearDownNeighbor { neighbor: NeighborKey },
}

/// Re-evaluates a prefix after its candidate set changed (UPDATE, QUERY absorption, neighbor loss, local metric change).
/// `origin` is the neighbor whose message triggered the change, `from_query` whether that message was a QUERY, and
/// `up_neighbors` the reply set should the prefix have to go active.
pub fn on_topology_change(
    entry: &mut PrefixEntry,
    origin: Option<NeighborKey>,
    from_query: bool,
    up_neighbors: &[NeighborKey],
) -> Vec<DualAction> {
    if entry.state.is_active() {
        // Input from a neighbor we are not waiting on is recorded in the candidate set but causes no transition.
        return Vec::new();
    }
    if entry.dest_type == DestinationType::Connected {
        // Connected prefixes are pinned passive; a peer advertisement can never displace the self-entry at distance zero.
        entry.select_successor(|candidate| candidate.neighbor.is_none());
        return Vec::new();
    }

    let prefix = entry.destination;
    if entry.has_feasible_successor() {
        let feasible_distance = entry.feasible_distance;
        let change = entry.select_successor(|candidate| candidate.is_feasible(feasible_distance));
        entry.feasible_distance = entry.feasible_distance.min(entry.distance);

        let mut actions = Vec::new();
        if change.changed {
            actions.push(DualAction::FloodUpdate { prefix, except: origin });
            actions.push(DualAction::Install { prefix });
        }
        return actions;
    }

    if entry.entries.is_empty() {
        return vec![DualAction::DeletePrefix { prefix }];
    }

    // Feasibility condition failed: start a diffusing computation, freezing the feasible distance at its pre-transition value.
    entry.state = if from_query { DualState::Active3 } else { DualState::Active1 };
    entry.active_origin = origin;
    entry.rij = up_neighbors.iter().copied().collect();
    entry.sia_pending = BTreeSet::new();
    // Advertise the best we currently have while the computation runs.
    entry.select_successor(|_| true);

    if entry.rij.is_empty() {
        // No one to ask: the computation completes on the spot.
        return complete_active(entry);
    }

    vec![DualAction::SendQueries { prefix }, DualAction::StartActiveTimers { prefix }]
}

/// Re-evaluation after a neighbor (and all its candidates) disappeared. While passive this is an ordinary topology change;
/// while active the loss may have been the last outstanding REPLY.
pub fn after_neighbor_loss(entry: &mut PrefixEntry, up_neighbors: &[NeighborKey]) -> Vec<DualAction> {
    if entry.state.is_active() {
        if entry.rij.is_empty() {
            return complete_active(entry);
        }
        return Vec::new();
    }
    on_topology_change(entry, None, false, up_neighbors)
}

/// Handles a REPLY (the caller has already absorbed the reported metric into the candidate set).
pub fn on_reply(entry: &mut PrefixEntry, from: NeighborKey) -> Vec<DualAction> {
    if !entry.state.is_active() {
        return Vec::new();
    }
    entry.rij.remove(&from);
    entry.sia_pending.remove(&from);
    if entry.rij.is_empty() {
        return complete_active(entry);
    }
    Vec::new()
}

/// A SIAREPLY proves the peer is still computing; it leaves `rij` alone and only clears the stuck suspicion.
pub fn on_sia_reply(entry: &mut PrefixEntry, from: NeighborKey) {
    entry.sia_pending.remove(&from);
}

/// Half-budget expiry: probe everyone who still owes a REPLY.
pub fn on_sia_probe(entry: &mut PrefixEntry) -> Vec<DualAction> {
    if !entry.state.is_active() || entry.rij.is_empty() {
        return Vec::new();
    }
    entry.sia_pending = entry.rij.clone();
    vec![DualAction::SendSiaQueries {
        prefix: entry.destination,
        to: entry.rij.iter().copied().collect(),
    }]
}

/// Full-budget expiry: every probed peer that stayed silent is declared stuck and torn down; the computation is forced to a
/// close with whatever answers arrived.
pub fn on_active_timeout(entry: &mut PrefixEntry) -> Vec<DualAction> {
    if !entry.state.is_active() {
        return Vec::new();
    }
    let stuck: Vec<NeighborKey> = if entry.sia_pending.is_empty() {
        entry.rij.iter().copied().collect()
    } else {
        entry.sia_pending.iter().copied().collect()
    };

    let mut actions: Vec<DualAction> = stuck
        .iter()
        .map(|neighbor| DualAction::TearDownNeighbor { neighbor: *neighbor })
        .collect();
    entry.rij.clear();
    entry.sia_pending.clear();
    actions.extend(complete_active(entry));
    actions
}

/// The last expected REPLY arrived (or the computation was forced closed): pick the minimum-distance candidate, reset the
/// feasible distance to it and return to passive.
fn complete_active(entry: &mut PrefixEntry) -> Vec<DualAction> {
    let prefix = entry.destination;
    entry.state = DualState::Passive;
    let origin = entry.active_origin.take();

    let mut actions = vec![DualAction::StopActiveTimers { prefix }];
    if entry.min_distance() == EIGRP_MAX_METRIC {
        actions.push(DualAction::DeletePrefix { prefix });
        return actions;
    }

    entry.feasible_distance = EIGRP_MAX_METRIC;
    entry.select_successor(|_| true);
    entry.feasible_distance = entry.distance;

    actions.push(DualAction::FloodUpdate { prefix, except: origin });
    actions.push(DualAction::Install { prefix });
    actions
}
