//! Human-readable renderings of the neighbor and topology tables, in the shape of the classic `show ip eigrp ...` outputs.
//! Emitted through periodic debug logging and handy in test failures.

use crate::{
    engine::Router,
    events::RouteSink,
    topology::DualState,
};
use std::fmt::Write;

pub fn neighbor_table<S: RouteSink>(router: &Router<S>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "EIGRP neighbors for AS {}", router.as_number);
    let _ = writeln!(out, "{:<18} {:<10} {:<14} {:>6} {:>8} {:>8}", "Address", "Interface", "State", "Hold", "Queued", "Seq");
    for iface in router.interfaces.values() {
        for nbr in iface.neighbors.values() {
            let _ = writeln!(
                out,
                "{:<18} {:<10} {:<14} {:>6} {:>8} {:>8}",
                nbr.address.to_string(),
                iface.name,
                format!("{:?}", nbr.state),
                nbr.hold_time,
                nbr.retrans.len() + nbr.multicast.len(),
                nbr.recv_sequence,
            );
        }
    }
    out
}

pub fn topology_table<S: RouteSink>(router: &Router<S>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "EIGRP topology table for AS {}", router.as_number);
    for entry in router.topology.iter() {
        let state = match entry.state {
            DualState::Passive => "P",
            _ => "A",
        };
        let _ = writeln!(
            out,
            "{} {}, {} successors, FD is {}",
            state,
            entry.destination,
            entry.entries.iter().filter(|candidate| candidate.is_successor()).count(),
            entry.feasible_distance,
        );
        for candidate in &entry.entries {
            let via = match candidate.neighbor {
                Some((_, address)) => format!("via {}", address),
                None => "via Connected".to_string(),
            };
            let _ = writeln!(out, "        {} ({}/{})", via, candidate.distance, candidate.reported_distance);
        }
    }
    out
}
