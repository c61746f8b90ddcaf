//! The router instance: owns the interfaces, the neighbor tables, the topology table and the timer wheel, and drives every
//! protocol reaction from the three entry points the cooperative loop calls into (received frame, expired timer, interface
//! event). The engine itself never touches a socket; it queues outbound packets on interface FIFOs and hands I/O wishes
//! (multicast membership, buffer sizing) back to the caller.

use crate::{
    dual::{
        self,
        DualAction,
        ACTIVE_TIMEOUT,
        SIA_PROBE_TIMEOUT,
    },
    error::{
        DownReason,
        PacketError,
    },
    events::{
        InterfaceEvent,
        PrefixFilter,
        PrefixListFilter,
        RouteSink,
    },
    interface::{
        EigrpInterface,
        InterfaceId,
        InterfaceParams,
    },
    neighbor::{
        Neighbor,
        NeighborKey,
        NeighborState,
    },
    routes::RouteManager,
    timers::{
        Channel,
        TimerKind,
        TimerWheel,
    },
    transport::{
        QueuedPacket,
        RETRANSMIT_INTERVAL,
        RETRANSMIT_LIMIT,
    },
    topology::{
        DestinationType,
        DualState,
        TopologyTable,
    },
};
use corvus_common::Prefix;
use corvus_eigrp::{
    general::{
        AuthenticationTlv,
        ParameterTlv,
        SoftwareVersionTlv,
    },
    header::{
        EigrpHeader,
        HeaderFlags,
        Opcode,
        EIGRP_HEADER_SIZE,
        EIGRP_MULTICAST_ADDRESS,
        EIGRP_VERSION,
    },
    ipv4::Ipv4InternalTlv,
    metric::{
        EigrpMetrics,
        KValues,
        EIGRP_MAX_METRIC,
    },
    verify_checksum,
    EigrpElement,
    EigrpPacket,
    Tlv,
};
use log::{
    debug,
    info,
    warn,
};
use std::{
    collections::{
        BTreeMap,
        HashMap,
        VecDeque,
    },
    net::Ipv4Addr,
    time::{
        Duration,
        Instant,
    },
};

/// Software revision advertised in the SW_VERSION TLV.
const OS_VERSION: (u8, u8) = (0, 99);
const EIGRP_TLV_VERSION: (u8, u8) = (1, 2);

/// Per-interface configuration resolved from the operator config: link parameters plus the distribute-list deny sets.
#[derive(Debug, Clone, Default)]
pub struct InterfaceProfile {
    pub params: InterfaceParams,
    pub deny_in: Vec<Prefix>,
    pub deny_out: Vec<Prefix>,
}

/// Static instance configuration handed to [`Router::new`].
pub struct RouterSettings {
    pub as_number: u16,
    pub k_values: KValues,
    pub router_id_static: Option<Ipv4Addr>,
    /// CIDR classifiers selecting which connected links join the routing process.
    pub networks: Vec<Prefix>,
    pub profiles: HashMap<String, InterfaceProfile>,
}

/// I/O side effects the engine asks its caller to perform against the raw socket.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum IoRequest {
    JoinMulticast { ifindex: u32 },
    LeaveMulticast { ifindex: u32 },
    GrowSendBuffer { bytes: usize },
}

/// A host link reported by interface discovery, remembered whether or not it currently takes part in routing so that
/// membership can be re-evaluated when the router-id changes.
#[derive(Debug, Clone)]
struct HostLink {
    name: String,
    address: Prefix,
    mtu: u32,
}

/// Global drop counters per error kind.
#[derive(Debug, Default, Clone, Copy)]
pub struct RouterStats {
    pub malformed: u32,
    pub bad_checksum: u32,
    pub version_mismatch: u32,
    pub as_mismatch: u32,
    pub auth_failed: u32,
    pub no_such_neighbor: u32,
    pub wrong_subnet: u32,
    pub passive_drops: u32,
}

pub struct Router<S: RouteSink> {
    pub as_number: u16,
    pub k_values: KValues,
    router_id_static: Option<Ipv4Addr>,
    router_id: Option<Ipv4Addr>,
    networks: Vec<Prefix>,
    profiles: HashMap<String, InterfaceProfile>,
    /// Next sequence number handed to a reliable packet; wraps, skipping zero.
    sequence: u32,
    pub interfaces: BTreeMap<InterfaceId, EigrpInterface>,
    /// Every link discovery has reported, keyed by OS ifindex, members or not.
    links: BTreeMap<u32, HostLink>,
    next_interface_id: InterfaceId,
    pub topology: TopologyTable,
    pub timers: TimerWheel,
    /// Interfaces with queued outbound packets, drained one packet per write event.
    write_queue: VecDeque<InterfaceId>,
    pub routes: RouteManager<S>,
    pub stats: RouterStats,
}

impl<S: RouteSink> Router<S> {
    pub fn new(settings: RouterSettings, sink: S) -> Self {
        Self {
            as_number: settings.as_number,
            k_values: settings.k_values,
            router_id_static: settings.router_id_static,
            router_id: None,
            networks: settings.networks,
            profiles: settings.profiles,
            sequence: 1,
            interfaces: BTreeMap::new(),
            links: BTreeMap::new(),
            next_interface_id: 0,
            topology: TopologyTable::new(),
            timers: TimerWheel::new(),
            write_queue: VecDeque::new(),
            routes: RouteManager::new(sink),
            stats: RouterStats::default(),
        }
    }

    // ===== identity =====

    /// Effective router-id: statically configured first, then whatever was in use before, then the host hint. A change
    /// re-evaluates every known link against the network statements, the same per-interface sweep the original runs after a
    /// router-id update.
    pub fn update_router_id(&mut self, now: Instant, hint: Option<Ipv4Addr>) -> (Option<Ipv4Addr>, Vec<IoRequest>) {
        let previous = self.router_id;
        let selected = self.router_id_static.or(self.router_id).or(hint);
        self.router_id = selected;
        if selected == previous {
            return (selected, Vec::new());
        }
        (selected, self.sweep_memberships(now))
    }

    /// Whether a link belongs in the routing process: the instance needs an effective router-id and a network statement
    /// covering the link's address.
    fn link_wanted(&self, address: Prefix) -> bool {
        self.router_id.is_some() && self.networks.iter().any(|network| network.contains(address.address))
    }

    /// Re-applies membership to every known host link, bringing interfaces into or out of the process.
    fn sweep_memberships(&mut self, now: Instant) -> Vec<IoRequest> {
        let mut requests = Vec::new();
        let links: Vec<(u32, HostLink)> = self.links.iter().map(|(ifindex, link)| (*ifindex, link.clone())).collect();
        for (ifindex, link) in links {
            let member = self.interface_by_ifindex(ifindex).is_some();
            let wanted = self.link_wanted(link.address);
            if wanted && !member {
                requests.extend(self.bring_interface_up(now, link.name, ifindex, link.address, link.mtu));
            } else if !wanted && member {
                requests.extend(self.bring_interface_down(now, ifindex));
            }
        }
        requests
    }

    // ===== interface lifecycle =====

    /// Reacts to an interface event from the discovery collaborator.
    pub fn handle_interface_event(&mut self, now: Instant, event: InterfaceEvent) -> Vec<IoRequest> {
        match event {
            InterfaceEvent::Up {
                name,
                ifindex,
                address,
                mtu,
            } => {
                self.links.insert(
                    ifindex,
                    HostLink {
                        name: name.clone(),
                        address,
                        mtu,
                    },
                );
                if self.interfaces.values().any(|iface| iface.ifindex == ifindex) {
                    return Vec::new();
                }
                if !self.link_wanted(address) {
                    debug!("Interface {} ({}) stays out of the routing process", name, address);
                    return Vec::new();
                }
                self.bring_interface_up(now, name, ifindex, address, mtu)
            }
            InterfaceEvent::Down { ifindex } => {
                self.links.remove(&ifindex);
                self.bring_interface_down(now, ifindex)
            }
            InterfaceEvent::MtuChanged { ifindex, mtu } => {
                if let Some(link) = self.links.get_mut(&ifindex) {
                    link.mtu = mtu;
                }
                if let Some(id) = self.interface_by_ifindex(ifindex) {
                    if let Some(iface) = self.interfaces.get_mut(&id) {
                        iface.mtu = mtu;
                    }
                    let (connected, link_metric) = {
                        let iface = &self.interfaces[&id];
                        (iface.connected_prefix(), iface.link_metric())
                    };
                    if let Some(self_entry) = self
                        .topology
                        .lookup_mut(&connected)
                        .and_then(|entry| entry.entry_for_mut(None))
                    {
                        self_entry.reported_metric = link_metric;
                        self_entry.total_metric = link_metric;
                    }
                    self.refresh_interface_entries(now, id);
                }
                Vec::new()
            }
        }
    }

    fn bring_interface_up(&mut self, now: Instant, name: String, ifindex: u32, address: Prefix, mtu: u32) -> Vec<IoRequest> {
        let profile = self.profiles.get(&name).cloned().unwrap_or_default();
        let id = self.add_interface(now, name, ifindex, address, mtu, profile);

        let mut requests = vec![IoRequest::GrowSendBuffer { bytes: mtu as usize }];
        if !self.interfaces[&id].params.passive {
            requests.push(IoRequest::JoinMulticast { ifindex });
        }
        requests
    }

    /// Creates the EIGRP interface record, seeds the hello timer and originates the connected prefix.
    pub fn add_interface(
        &mut self,
        now: Instant,
        name: String,
        ifindex: u32,
        address: Prefix,
        mtu: u32,
        profile: InterfaceProfile,
    ) -> InterfaceId {
        let id = self.next_interface_id;
        self.next_interface_id += 1;

        let mut iface = EigrpInterface::new(id, name, ifindex, address, mtu, profile.params);
        if !profile.deny_in.is_empty() {
            iface.inbound_filter = Some(Box::new(PrefixListFilter::deny_list(profile.deny_in)));
        }
        if !profile.deny_out.is_empty() {
            iface.outbound_filter = Some(Box::new(PrefixListFilter::deny_list(profile.deny_out)));
        }
        info!("Interface {} ({}) joins autonomous system {}", iface.name, address, self.as_number);
        self.interfaces.insert(id, iface);

        let connected = self.interfaces[&id].connected_prefix();
        let link_metric = self.interfaces[&id].link_metric();
        self.topology.insert_connected(connected, id, link_metric);
        self.flood_prefix_update(now, connected, None);

        if !self.interfaces[&id].params.passive {
            self.send_hello(now, id);
            self.reschedule_hello(now, id);
        }
        id
    }

    fn bring_interface_down(&mut self, now: Instant, ifindex: u32) -> Vec<IoRequest> {
        let Some(id) = self.interface_by_ifindex(ifindex) else {
            return Vec::new();
        };

        let peers: Vec<Ipv4Addr> = self.interfaces[&id].neighbors.keys().copied().collect();
        for peer in peers {
            self.neighbor_down(now, (id, peer), DownReason::InterfaceDown);
        }

        let Some(mut iface) = self.interfaces.remove(&id) else {
            return Vec::new();
        };
        if let Some(timer) = iface.hello_timer.take() {
            self.timers.cancel(timer);
        }
        iface.obuf.clear().for_each(drop);

        let connected = iface.connected_prefix();
        if let Some(entry) = self.topology.lookup_mut(&connected) {
            if let Some(timer) = entry.active_timer.take() {
                self.timers.cancel(timer);
            }
            if let Some(timer) = entry.sia_timer.take() {
                self.timers.cancel(timer);
            }
        }
        self.topology.remove(&connected);
        self.routes.withdraw(connected);
        self.flood_unreachable(now, connected, None);

        info!("Interface {} is down, adjacencies torn down", iface.name);
        if iface.params.passive {
            Vec::new()
        } else {
            vec![IoRequest::LeaveMulticast { ifindex }]
        }
    }

    pub fn interface_by_ifindex(&self, ifindex: u32) -> Option<InterfaceId> {
        self.interfaces
            .values()
            .find(|iface| iface.ifindex == ifindex)
            .map(|iface| iface.id)
    }

    /// Re-folds the link metric into every candidate learned through the interface and re-evaluates the affected prefixes.
    /// Used after MTU or bandwidth/delay reconfiguration (DUAL event: local metric change).
    pub fn refresh_interface_entries(&mut self, now: Instant, id: InterfaceId) {
        let Some(iface) = self.interfaces.get(&id) else { return };
        let link_metric = iface.link_metric();

        let mut pending: Vec<(Prefix, NeighborKey, EigrpMetrics)> = Vec::new();
        for entry in self.topology.iter() {
            for candidate in &entry.entries {
                if candidate.interface == id {
                    if let Some(neighbor) = candidate.neighbor {
                        pending.push((entry.destination, neighbor, candidate.reported_metric));
                    }
                }
            }
        }

        for (prefix, neighbor, reported) in pending {
            self.topology.upsert_entry(prefix, neighbor, id, reported, link_metric, &self.k_values);
            self.evaluate_prefix(now, prefix, None, false);
        }
    }

    /// Attaches a fresh inbound distribute-list and re-scans the topology: entries the list now denies are rewritten as
    /// unreachable, which DUAL sees as a distance increase.
    pub fn set_inbound_filter(&mut self, now: Instant, id: InterfaceId, denied: Vec<Prefix>) {
        if !self.interfaces.contains_key(&id) {
            return;
        }
        let filter = PrefixListFilter::deny_list(denied);
        let mut pending: Vec<(Prefix, NeighborKey, EigrpMetrics)> = Vec::new();
        for entry in self.topology.iter() {
            if filter.permit(&entry.destination) {
                continue;
            }
            for candidate in &entry.entries {
                if candidate.interface != id || candidate.reported_metric.is_unreachable() {
                    continue;
                }
                if let Some(neighbor) = candidate.neighbor {
                    let mut poisoned = candidate.reported_metric;
                    poisoned.delay = EIGRP_MAX_METRIC;
                    pending.push((entry.destination, neighbor, poisoned));
                }
            }
        }

        if let Some(iface) = self.interfaces.get_mut(&id) {
            iface.inbound_filter = Some(Box::new(filter));
        }

        for (prefix, neighbor, poisoned) in pending {
            let link_metric = self.interfaces[&id].link_metric();
            self.topology.upsert_entry(prefix, neighbor, id, poisoned, link_metric, &self.k_values);
            self.evaluate_prefix(now, prefix, Some(neighbor), false);
        }
    }

    // ===== frame ingest =====

    /// Entry point for a received EIGRP frame (IP header already stripped). Validates, resolves the interface and neighbor and
    /// dispatches per opcode. Errors are counted and otherwise swallowed; they never unwind into the loop.
    pub fn handle_frame(&mut self, now: Instant, ifindex: u32, source: Ipv4Addr, payload: &[u8]) -> Result<(), PacketError> {
        // Self-originated multicast is discarded silently.
        if self.interfaces.values().any(|iface| iface.address.address == source) {
            return Ok(());
        }

        let Some(id) = self.interface_by_ifindex(ifindex) else {
            self.stats.no_such_neighbor += 1;
            return Err(PacketError::NoSuchNeighbor(source));
        };

        {
            let iface = &self.interfaces[&id];
            if iface.params.passive {
                self.stats.passive_drops += 1;
                self.bump_drop(id);
                return Err(PacketError::PassiveInterface);
            }
            if !iface.accepts_source(source) {
                self.stats.wrong_subnet += 1;
                self.bump_drop(id);
                return Err(PacketError::WrongSubnet(source));
            }
        }

        if payload.len() < EIGRP_HEADER_SIZE {
            self.stats.malformed += 1;
            self.bump_drop(id);
            return Err(PacketError::Malformed);
        }
        if !verify_checksum(payload) {
            self.stats.bad_checksum += 1;
            self.bump_drop(id);
            return Err(PacketError::BadChecksum);
        }

        let Ok((_, packet)) = EigrpPacket::unpack(payload) else {
            self.stats.malformed += 1;
            self.bump_drop(id);
            return Err(PacketError::Malformed);
        };

        if packet.header.version != EIGRP_VERSION {
            self.stats.version_mismatch += 1;
            self.bump_drop(id);
            return Err(PacketError::VersionMismatch(packet.header.version));
        }
        if packet.header.as_number != self.as_number {
            self.stats.as_mismatch += 1;
            self.bump_drop(id);
            return Err(PacketError::AsMismatch(packet.header.as_number, self.as_number));
        }

        let auth_ok = match self.interfaces[&id].auth_oracle.as_ref() {
            None => true,
            Some(oracle) => {
                let mac = packet.tlvs.iter().find_map(|tlv| match tlv {
                    Tlv::Authentication(auth) => Some(auth.data.as_slice()),
                    _ => None,
                });
                mac.is_some_and(|mac| oracle.verify(ifindex, payload, mac))
            }
        };
        if !auth_ok {
            info!("Dropping packet from {}: authentication failed", source);
            self.stats.auth_failed += 1;
            self.bump_drop(id);
            return Err(PacketError::AuthFailed);
        }

        match packet.header.opcode {
            Opcode::Hello => self.handle_hello(now, id, source, &packet),
            Opcode::Update => self.handle_update(now, id, source, &packet)?,
            Opcode::Query => self.handle_query(now, id, source, &packet)?,
            Opcode::Reply => self.handle_reply(now, id, source, &packet)?,
            Opcode::SiaQuery => self.handle_sia_query(now, id, source, &packet)?,
            Opcode::SiaReply => self.handle_sia_reply(now, id, source, &packet)?,
            opcode => {
                warn!("Interface {}: EIGRP opcode {} is not handled", self.interfaces[&id].name, opcode);
                self.bump_drop(id);
            }
        }
        Ok(())
    }

    fn bump_drop(&mut self, id: InterfaceId) {
        if let Some(iface) = self.interfaces.get_mut(&id) {
            iface.stats.dropped += 1;
        }
    }

    /// Resolves the sender of a non-hello packet; per the error model those never create adjacency state.
    fn require_neighbor(&mut self, id: InterfaceId, source: Ipv4Addr) -> Result<NeighborKey, PacketError> {
        if self.interfaces.get(&id).is_some_and(|iface| iface.neighbors.contains_key(&source)) {
            Ok((id, source))
        } else {
            self.stats.no_such_neighbor += 1;
            self.bump_drop(id);
            Err(PacketError::NoSuchNeighbor(source))
        }
    }

    // ===== hello / adjacency =====

    fn handle_hello(&mut self, now: Instant, id: InterfaceId, source: Ipv4Addr, packet: &EigrpPacket) {
        let has_parameter = packet.tlvs.iter().any(|tlv| matches!(tlv, Tlv::Parameter(_)));

        {
            let Some(iface) = self.interfaces.get_mut(&id) else { return };
            if !iface.neighbors.contains_key(&source) {
                // Only a parameter-bearing hello from an unknown source creates a neighbor.
                if !has_parameter {
                    return;
                }
                let hold_time = iface.params.hold_time;
                iface.neighbors.insert(source, Neighbor::new(id, source, hold_time));
            }
        }
        let key = (id, source);

        if packet.header.ack != 0 {
            // A hello with a nonzero ack field is the explicit acknowledgement channel.
            self.process_ack(now, key, packet.header.ack);
        } else if let Some(iface) = self.interfaces.get_mut(&id) {
            iface.stats.hello_in += 1;
        }

        for tlv in &packet.tlvs {
            match tlv {
                Tlv::Parameter(parameter) => self.hello_parameter_decode(now, key, parameter),
                Tlv::SoftwareVersion(version) => {
                    if let Some(nbr) = self.neighbor_mut(key) {
                        nbr.sw_version = *version;
                    }
                }
                Tlv::PeerTermination(_) => {
                    self.neighbor_down(now, key, DownReason::PeerTermination);
                    return;
                }
                _ => {}
            }
            if self.neighbor_mut(key).is_none() {
                // A parameter TLV may have torn the neighbor down mid-packet.
                return;
            }
        }
    }

    fn hello_parameter_decode(&mut self, now: Instant, key: NeighborKey, parameter: &ParameterTlv) {
        let local = self.k_values;
        let state = {
            let Some(nbr) = self.neighbor_mut(key) else { return };
            nbr.k_values = parameter.k_values;
            nbr.hold_time = parameter.hold_time;
            nbr.state
        };

        if parameter.k_values.is_goodbye() {
            if state != NeighborState::Down {
                self.neighbor_down(now, key, DownReason::PeerTermination);
            }
            return;
        }
        if !local.matches(&parameter.k_values) {
            if state != NeighborState::Down {
                self.neighbor_down(now, key, DownReason::KValueMismatch);
            }
            return;
        }

        self.restart_hold_timer(now, key);
        if state == NeighborState::Down {
            if let Some(nbr) = self.neighbor_mut(key) {
                nbr.state = NeighborState::Pending;
            }
            info!("Neighbor {} ({}) is pending: new adjacency", key.1, self.interfaces[&key.0].name);
            self.send_init_update(now, key);
        }
    }

    fn restart_hold_timer(&mut self, now: Instant, key: NeighborKey) {
        let Self { interfaces, timers, .. } = self;
        let Some(nbr) = interfaces.get_mut(&key.0).and_then(|iface| iface.neighbors.get_mut(&key.1)) else {
            return;
        };
        if let Some(timer) = nbr.hold_timer.take() {
            timers.cancel(timer);
        }
        let hold = Duration::from_secs(nbr.hold_time.max(1) as u64);
        nbr.hold_timer = Some(timers.schedule(now + hold, TimerKind::HoldDown(key.0, key.1)));
    }

    /// Exact-match acknowledgement processing: the tail of the reliable FIFO either matches and pops, or nothing happens; the
    /// multicast shadow FIFO is checked the same way. Popping may release the next packet or complete the INIT handshake.
    fn process_ack(&mut self, now: Instant, key: NeighborKey, ack: u32) {
        let mut completed_init = false;
        {
            let Self { interfaces, timers, .. } = self;
            let Some(nbr) = interfaces.get_mut(&key.0).and_then(|iface| iface.neighbors.get_mut(&key.1)) else {
                return;
            };

            let mut acked = false;
            for fifo in [&mut nbr.retrans, &mut nbr.multicast] {
                if fifo.tail().is_some_and(|tail| tail.sequence == ack) {
                    if let Some(packet) = fifo.pop_tail() {
                        if let Some(timer) = packet.retrans_timer {
                            timers.cancel(timer);
                        }
                    }
                    acked = true;
                    break;
                }
            }
            if !acked {
                return;
            }

            if nbr.init_sequence != 0 && nbr.init_sequence == ack && nbr.state == NeighborState::Pending {
                nbr.state = NeighborState::PendingInit;
                nbr.init_sequence = 0;
                completed_init = true;
            }
        }

        // Release the next outstanding packet, if any.
        for channel in [Channel::Reliable, Channel::Multicast] {
            let pending = self
                .neighbor_mut(key)
                .map(|nbr| {
                    let fifo = match channel {
                        Channel::Reliable => &nbr.retrans,
                        Channel::Multicast => &nbr.multicast,
                    };
                    fifo.tail().is_some_and(|tail| tail.retrans_timer.is_none())
                })
                .unwrap_or(false);
            if pending {
                self.transmit_tail(now, key, channel);
            }
        }

        if completed_init {
            self.send_eot_update(now, key);
        }
    }

    // ===== update / query / reply =====

    fn handle_update(&mut self, now: Instant, id: InterfaceId, source: Ipv4Addr, packet: &EigrpPacket) -> Result<(), PacketError> {
        let key = self.require_neighbor(id, source)?;
        if let Some(iface) = self.interfaces.get_mut(&id) {
            iface.stats.update_in += 1;
        }
        if packet.header.sequence != 0 {
            if let Some(nbr) = self.neighbor_mut(key) {
                nbr.recv_sequence = packet.header.sequence;
            }
        }
        if packet.header.ack != 0 {
            self.process_ack(now, key, packet.header.ack);
        }

        // Conditional-receive packets are for listed peers only; we keep no listing, so acknowledge and skip the content.
        if packet.header.flags.contains(HeaderFlags::CONDITIONAL_RECEIVE) {
            if self.neighbor_state(key) >= Some(NeighborState::PendingInit) {
                self.send_ack(now, key);
            }
            return Ok(());
        }

        if packet.header.flags.contains(HeaderFlags::INIT) {
            // The peer (re)starts the exchange; make sure our own INIT is out.
            let needs_init = self
                .neighbor_mut(key)
                .is_some_and(|nbr| nbr.init_sequence == 0 && nbr.state == NeighborState::Pending && nbr.retrans.is_empty());
            if needs_init {
                self.send_init_update(now, key);
            }
        }

        for tlv in &packet.tlvs {
            if let Tlv::Ipv4Internal(route) = tlv {
                self.absorb_route(now, key, route, false);
            }
        }

        if packet.header.flags.contains(HeaderFlags::END_OF_TABLE) {
            let became_full = self.neighbor_mut(key).is_some_and(|nbr| {
                if nbr.state == NeighborState::Pending || nbr.state == NeighborState::PendingInit {
                    nbr.state = NeighborState::Up;
                    true
                } else {
                    false
                }
            });
            if became_full {
                info!("Neighbor {} adjacency became full", source);
            }
        }

        if packet.header.sequence != 0 && self.neighbor_state(key) >= Some(NeighborState::PendingInit) {
            self.send_ack(now, key);
        }
        Ok(())
    }

    fn handle_query(&mut self, now: Instant, id: InterfaceId, source: Ipv4Addr, packet: &EigrpPacket) -> Result<(), PacketError> {
        let key = self.require_neighbor(id, source)?;
        if let Some(iface) = self.interfaces.get_mut(&id) {
            iface.stats.query_in += 1;
        }
        if packet.header.sequence != 0 {
            if let Some(nbr) = self.neighbor_mut(key) {
                nbr.recv_sequence = packet.header.sequence;
            }
        }
        if packet.header.ack != 0 {
            self.process_ack(now, key, packet.header.ack);
        }

        for tlv in &packet.tlvs {
            if let Tlv::Ipv4Internal(route) = tlv {
                let destination = route.destination.network();
                if self.topology.lookup(&destination).is_some() {
                    self.absorb_route(now, key, route, true);
                }
                // Answer with our state after absorbing the query; unknown prefixes get an unreachable reply.
                self.send_reply_to(now, key, destination, Opcode::Reply);
            }
        }

        self.send_ack(now, key);
        Ok(())
    }

    fn handle_reply(&mut self, now: Instant, id: InterfaceId, source: Ipv4Addr, packet: &EigrpPacket) -> Result<(), PacketError> {
        let key = self.require_neighbor(id, source)?;
        if let Some(iface) = self.interfaces.get_mut(&id) {
            iface.stats.reply_in += 1;
        }
        if packet.header.sequence != 0 {
            if let Some(nbr) = self.neighbor_mut(key) {
                nbr.recv_sequence = packet.header.sequence;
            }
        }
        if packet.header.ack != 0 {
            self.process_ack(now, key, packet.header.ack);
        }

        for tlv in &packet.tlvs {
            if let Tlv::Ipv4Internal(route) = tlv {
                let destination = route.destination.network();
                self.upsert_filtered(key, route);
                let actions = match self.topology.lookup_mut(&destination) {
                    Some(entry) => dual::on_reply(entry, key),
                    None => Vec::new(),
                };
                self.execute_actions(now, actions);
            }
        }

        self.send_ack(now, key);
        Ok(())
    }

    fn handle_sia_query(&mut self, now: Instant, id: InterfaceId, source: Ipv4Addr, packet: &EigrpPacket) -> Result<(), PacketError> {
        let key = self.require_neighbor(id, source)?;
        if packet.header.sequence != 0 {
            if let Some(nbr) = self.neighbor_mut(key) {
                nbr.recv_sequence = packet.header.sequence;
            }
        }
        if packet.header.ack != 0 {
            self.process_ack(now, key, packet.header.ack);
        }

        for tlv in &packet.tlvs {
            if let Tlv::Ipv4Internal(route) = tlv {
                // Answer that the computation is still alive with our current state.
                self.send_reply_to(now, key, route.destination.network(), Opcode::SiaReply);
            }
        }
        self.send_ack(now, key);
        Ok(())
    }

    fn handle_sia_reply(&mut self, now: Instant, id: InterfaceId, source: Ipv4Addr, packet: &EigrpPacket) -> Result<(), PacketError> {
        let key = self.require_neighbor(id, source)?;
        if packet.header.sequence != 0 {
            if let Some(nbr) = self.neighbor_mut(key) {
                nbr.recv_sequence = packet.header.sequence;
            }
        }
        if packet.header.ack != 0 {
            self.process_ack(now, key, packet.header.ack);
        }

        for tlv in &packet.tlvs {
            if let Tlv::Ipv4Internal(route) = tlv {
                if let Some(entry) = self.topology.lookup_mut(&route.destination.network()) {
                    dual::on_sia_reply(entry, key);
                }
            }
        }
        self.send_ack(now, key);
        Ok(())
    }

    /// Applies the inbound filter and folds a received route TLV into the topology table.
    fn upsert_filtered(&mut self, key: NeighborKey, route: &Ipv4InternalTlv) {
        let destination = route.destination.network();
        let (link_metric, permitted) = {
            let iface = &self.interfaces[&key.0];
            (iface.link_metric(), iface.permits_inbound(&destination))
        };
        let mut reported = route.metric;
        if !permitted {
            reported.delay = EIGRP_MAX_METRIC;
        }
        self.topology
            .upsert_entry(destination, key, key.0, reported, link_metric, &self.k_values);
    }

    fn absorb_route(&mut self, now: Instant, key: NeighborKey, route: &Ipv4InternalTlv, from_query: bool) {
        self.upsert_filtered(key, route);
        self.evaluate_prefix(now, route.destination.network(), Some(key), from_query);
    }

    fn evaluate_prefix(&mut self, now: Instant, destination: Prefix, origin: Option<NeighborKey>, from_query: bool) {
        let up_neighbors = self.up_neighbors();
        let actions = match self.topology.lookup_mut(&destination) {
            Some(entry) => dual::on_topology_change(entry, origin, from_query, &up_neighbors),
            None => Vec::new(),
        };
        self.execute_actions(now, actions);
    }

    pub fn up_neighbors(&self) -> Vec<NeighborKey> {
        self.interfaces
            .values()
            .flat_map(|iface| iface.neighbors.values().filter(|nbr| nbr.is_up()).map(Neighbor::key))
            .collect()
    }

    fn neighbor_mut(&mut self, key: NeighborKey) -> Option<&mut Neighbor> {
        self.interfaces.get_mut(&key.0).and_then(|iface| iface.neighbors.get_mut(&key.1))
    }

    fn neighbor_state(&self, key: NeighborKey) -> Option<NeighborState> {
        self.interfaces
            .get(&key.0)
            .and_then(|iface| iface.neighbors.get(&key.1))
            .map(|nbr| nbr.state)
    }

    // ===== DUAL action execution =====

    fn execute_actions(&mut self, now: Instant, actions: Vec<DualAction>) {
        for action in actions {
            match action {
                DualAction::FloodUpdate { prefix, except } => {
                    self.flood_prefix_update(now, prefix, except.map(|(iface, _)| iface));
                }
                DualAction::SendQueries { prefix } => self.send_queries(now, prefix),
                DualAction::SendSiaQueries { prefix, to } => {
                    for key in to {
                        self.send_route_reliably(now, key, Opcode::SiaQuery, HeaderFlags::empty(), prefix);
                    }
                }
                DualAction::Install { prefix } => self.install_successor(prefix),
                DualAction::DeletePrefix { prefix } => self.delete_prefix(now, prefix),
                DualAction::StartActiveTimers { prefix } => {
                    if let Some(entry) = self.topology.lookup_mut(&prefix) {
                        if let Some(timer) = entry.active_timer.take() {
                            self.timers.cancel(timer);
                        }
                        if let Some(timer) = entry.sia_timer.take() {
                            self.timers.cancel(timer);
                        }
                        entry.active_timer = Some(self.timers.schedule(now + ACTIVE_TIMEOUT, TimerKind::Active(prefix)));
                        entry.sia_timer = Some(self.timers.schedule(now + SIA_PROBE_TIMEOUT, TimerKind::SiaProbe(prefix)));
                    }
                }
                DualAction::StopActiveTimers { prefix } => {
                    if let Some(entry) = self.topology.lookup_mut(&prefix) {
                        if let Some(timer) = entry.active_timer.take() {
                            self.timers.cancel(timer);
                        }
                        if let Some(timer) = entry.sia_timer.take() {
                            self.timers.cancel(timer);
                        }
                    }
                }
                DualAction::TearDownNeighbor { neighbor } => self.neighbor_down(now, neighbor, DownReason::StuckInActive),
            }
        }
    }

    fn install_successor(&mut self, prefix: Prefix) {
        let Some(entry) = self.topology.lookup(&prefix) else { return };
        if entry.state != DualState::Passive || entry.dest_type == DestinationType::Connected {
            return;
        }
        match entry.successor() {
            Some(successor) if successor.distance != EIGRP_MAX_METRIC => {
                if let Some((_, via)) = successor.neighbor {
                    let distance = successor.distance;
                    self.routes.install(prefix, via, distance);
                }
            }
            _ => self.routes.withdraw(prefix),
        }
    }

    /// The last candidate is gone: one unreachable UPDATE, host-table retraction and removal from the table.
    fn delete_prefix(&mut self, now: Instant, prefix: Prefix) {
        if let Some(entry) = self.topology.lookup_mut(&prefix) {
            if let Some(timer) = entry.active_timer.take() {
                self.timers.cancel(timer);
            }
            if let Some(timer) = entry.sia_timer.take() {
                self.timers.cancel(timer);
            }
        }
        if self.topology.remove(&prefix).is_some() {
            self.routes.withdraw(prefix);
            self.flood_unreachable(now, prefix, None);
        }
    }

    /// Operator-initiated reset: the adjacency is torn down on the spot and the next hello from the peer rebuilds it from
    /// scratch.
    pub fn clear_neighbor(&mut self, now: Instant, key: NeighborKey) {
        self.neighbor_down(now, key, DownReason::Cleared);
    }

    pub fn neighbor_down(&mut self, now: Instant, key: NeighborKey, reason: DownReason) {
        let Some(iface) = self.interfaces.get_mut(&key.0) else { return };
        let Some(mut nbr) = iface.neighbors.remove(&key.1) else { return };
        info!("Neighbor {} ({}) is down: {}", key.1, iface.name, reason);

        if let Some(timer) = nbr.hold_timer.take() {
            self.timers.cancel(timer);
        }
        for packet in nbr.retrans.clear() {
            if let Some(timer) = packet.retrans_timer {
                self.timers.cancel(timer);
            }
        }
        for packet in nbr.multicast.clear() {
            if let Some(timer) = packet.retrans_timer {
                self.timers.cancel(timer);
            }
        }

        let affected = self.topology.withdraw_all(key);
        let up_neighbors = self.up_neighbors();
        for prefix in affected {
            let actions = match self.topology.lookup_mut(&prefix) {
                Some(entry) => dual::after_neighbor_loss(entry, &up_neighbors),
                None => Vec::new(),
            };
            self.execute_actions(now, actions);
        }
    }

    // ===== packet construction and send paths =====

    fn next_sequence(&mut self) -> u32 {
        let sequence = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);
        if self.sequence == 0 {
            self.sequence = 1;
        }
        sequence
    }

    fn build_packet(&self, opcode: Opcode, flags: HeaderFlags, sequence: u32, ack: u32, tlvs: Vec<Tlv>) -> Vec<u8> {
        EigrpPacket {
            header: EigrpHeader::new(opcode, flags, sequence, ack, self.as_number),
            tlvs,
        }
        .pack()
    }

    fn push_interface_head(&mut self, id: InterfaceId, packet: QueuedPacket) {
        let Self {
            interfaces, write_queue, ..
        } = self;
        let Some(iface) = interfaces.get_mut(&id) else { return };
        iface.obuf.push_head(packet);
        if !iface.on_write_queue {
            iface.on_write_queue = true;
            write_queue.push_back(id);
        }
    }

    /// Emits the periodic multicast hello: PARAMETER + SW_VERSION, unreliable.
    pub fn send_hello(&mut self, now: Instant, id: InterfaceId) {
        let _ = now;
        let Some(iface) = self.interfaces.get(&id) else { return };
        if iface.params.passive {
            return;
        }
        let hold_time = iface.params.hold_time;
        let mut tlvs = vec![
            Tlv::Parameter(ParameterTlv {
                k_values: self.k_values,
                hold_time,
            }),
            Tlv::SoftwareVersion(SoftwareVersionTlv {
                os_major: OS_VERSION.0,
                os_minor: OS_VERSION.1,
                eigrp_major: EIGRP_TLV_VERSION.0,
                eigrp_minor: EIGRP_TLV_VERSION.1,
            }),
        ];
        self.append_auth(id, Opcode::Hello, HeaderFlags::empty(), 0, 0, &mut tlvs);

        let data = self.build_packet(Opcode::Hello, HeaderFlags::empty(), 0, 0, tlvs);
        self.push_interface_head(id, QueuedPacket::new(data, EIGRP_MULTICAST_ADDRESS, 0));
        if let Some(iface) = self.interfaces.get_mut(&id) {
            iface.stats.hello_out += 1;
        }
    }

    /// Prepends the keyed-MAC frame when the interface runs authentication. Every packet-construction path goes through here,
    /// so peers enforcing the symmetric check accept updates, queries and replies just like hellos. The oracle signs the
    /// packet as it would go out without the AUTH TLV.
    fn append_auth(&self, id: InterfaceId, opcode: Opcode, flags: HeaderFlags, sequence: u32, ack: u32, tlvs: &mut Vec<Tlv>) {
        let Some(iface) = self.interfaces.get(&id) else { return };
        if let Some(oracle) = iface.auth_oracle.as_ref() {
            let unsigned = self.build_packet(opcode, flags, sequence, ack, tlvs.clone());
            if let Some(mac) = oracle.sign(iface.ifindex, &unsigned) {
                tlvs.insert(0, Tlv::Authentication(AuthenticationTlv { data: mac }));
            }
        }
    }

    fn reschedule_hello(&mut self, now: Instant, id: InterfaceId) {
        let Self { interfaces, timers, .. } = self;
        let Some(iface) = interfaces.get_mut(&id) else { return };
        if let Some(timer) = iface.hello_timer.take() {
            timers.cancel(timer);
        }
        let interval = Duration::from_secs(iface.params.hello_interval.max(1) as u64);
        iface.hello_timer = Some(timers.schedule(now + interval, TimerKind::Hello(id)));
    }

    /// A pure acknowledgement: an unreliable unicast hello whose ack field carries the peer's last sequence.
    pub fn send_ack(&mut self, now: Instant, key: NeighborKey) {
        let _ = now;
        let Some(nbr) = self.interfaces.get(&key.0).and_then(|iface| iface.neighbors.get(&key.1)) else {
            return;
        };
        let ack = nbr.recv_sequence;
        if ack == 0 {
            return;
        }
        let mut tlvs = Vec::new();
        self.append_auth(key.0, Opcode::Hello, HeaderFlags::empty(), 0, ack, &mut tlvs);
        let data = self.build_packet(Opcode::Hello, HeaderFlags::empty(), 0, ack, tlvs);
        self.push_interface_head(key.0, QueuedPacket::new(data, key.1, 0));
    }

    /// Queues a reliable unicast packet on the neighbor's retransmission FIFO, transmitting immediately when the FIFO was
    /// idle. Returns the sequence number the packet was stamped with.
    fn send_reliable(&mut self, now: Instant, key: NeighborKey, opcode: Opcode, flags: HeaderFlags, mut tlvs: Vec<Tlv>) -> Option<u32> {
        let ack = self
            .interfaces
            .get(&key.0)
            .and_then(|iface| iface.neighbors.get(&key.1))
            .map(|nbr| nbr.recv_sequence)?;

        let sequence = self.next_sequence();
        self.append_auth(key.0, opcode, flags, sequence, ack, &mut tlvs);
        let data = self.build_packet(opcode, flags, sequence, ack, tlvs);

        let was_empty = {
            let nbr = self.neighbor_mut(key)?;
            let was_empty = nbr.retrans.is_empty();
            nbr.retrans.push_head(QueuedPacket::new(data, key.1, sequence));
            was_empty
        };
        if was_empty {
            self.transmit_tail(now, key, Channel::Reliable);
        }
        Some(sequence)
    }

    /// Copies the outstanding tail of one of a neighbor's FIFOs onto the interface output queue and arms its retransmit timer.
    fn transmit_tail(&mut self, now: Instant, key: NeighborKey, channel: Channel) {
        let (data, destination) = {
            let Self { interfaces, timers, .. } = self;
            let Some(nbr) = interfaces.get_mut(&key.0).and_then(|iface| iface.neighbors.get_mut(&key.1)) else {
                return;
            };
            let fifo = match channel {
                Channel::Reliable => &mut nbr.retrans,
                Channel::Multicast => &mut nbr.multicast,
            };
            let Some(tail) = fifo.tail_mut() else { return };
            if let Some(timer) = tail.retrans_timer.take() {
                timers.cancel(timer);
            }
            tail.retrans_timer = Some(timers.schedule(now + RETRANSMIT_INTERVAL, TimerKind::Retransmit(key.0, key.1, channel)));
            (tail.data.clone(), tail.destination)
        };
        self.push_interface_head(key.0, QueuedPacket::new(data, destination, 0));
    }

    fn send_init_update(&mut self, now: Instant, key: NeighborKey) {
        if let Some(sequence) = self.send_reliable(now, key, Opcode::Update, HeaderFlags::INIT, Vec::new()) {
            if let Some(nbr) = self.neighbor_mut(key) {
                nbr.init_sequence = sequence;
            }
        }
    }

    /// Streams our full table to a freshly initialized neighbor, chunked to the link MTU; the final packet carries the EOT
    /// flag. Split horizon: prefixes whose successor points out the neighbor's own interface are withheld.
    fn send_eot_update(&mut self, now: Instant, key: NeighborKey) {
        let Some(iface) = self.interfaces.get(&key.0) else { return };
        let budget = (iface.mtu as usize).saturating_sub(20 + EIGRP_HEADER_SIZE).max(64);

        let mut tlvs: Vec<Tlv> = Vec::new();
        for entry in self.topology.iter() {
            let Some(successor) = entry.successor() else { continue };
            if entry.dest_type == DestinationType::Remote && successor.interface == key.0 {
                continue;
            }
            if !iface.permits_outbound(&entry.destination) {
                continue;
            }
            tlvs.push(Tlv::Ipv4Internal(Ipv4InternalTlv {
                next_hop: Ipv4Addr::UNSPECIFIED,
                metric: successor.total_metric,
                destination: entry.destination,
            }));
        }

        let mut chunks: Vec<Vec<Tlv>> = vec![Vec::new()];
        let mut used = 0usize;
        for tlv in tlvs {
            let size = tlv.pack().len();
            if used + size > budget && !chunks.last().unwrap().is_empty() {
                chunks.push(Vec::new());
                used = 0;
            }
            used += size;
            chunks.last_mut().unwrap().push(tlv);
        }

        let last = chunks.len() - 1;
        for (index, chunk) in chunks.into_iter().enumerate() {
            let flags = if index == last { HeaderFlags::END_OF_TABLE } else { HeaderFlags::empty() };
            self.send_reliable(now, key, Opcode::Update, flags, chunk);
            if let Some(iface) = self.interfaces.get_mut(&key.0) {
                iface.stats.update_out += 1;
            }
        }
    }

    /// Protocol-wide reliable multicast: the packet goes out once to 224.0.0.10 and a shadow copy lands in every UP neighbor's
    /// multicast FIFO for unicast retry.
    fn send_multicast_reliable(&mut self, now: Instant, id: InterfaceId, opcode: Opcode, mut tlvs: Vec<Tlv>) {
        let has_up = self
            .interfaces
            .get(&id)
            .map(|iface| iface.neighbors.values().any(Neighbor::is_up))
            .unwrap_or(false);
        if !has_up {
            return;
        }

        let sequence = self.next_sequence();
        self.append_auth(id, opcode, HeaderFlags::empty(), sequence, 0, &mut tlvs);
        let data = self.build_packet(opcode, HeaderFlags::empty(), sequence, 0, tlvs);

        let mut idle_shadows: Vec<Ipv4Addr> = Vec::new();
        {
            let Some(iface) = self.interfaces.get_mut(&id) else { return };
            for nbr in iface.neighbors.values_mut().filter(|nbr| nbr.is_up()) {
                let was_empty = nbr.multicast.is_empty();
                nbr.multicast.push_head(QueuedPacket::new(data.clone(), nbr.address, sequence));
                if was_empty {
                    idle_shadows.push(nbr.address);
                }
            }
        }
        // Arm the retransmit timer on each shadow that became the new tail. The initial delivery is the multicast copy; the
        // shadow only ever goes out as a unicast retry.
        for address in idle_shadows {
            let Self { interfaces, timers, .. } = self;
            if let Some(tail) = interfaces
                .get_mut(&id)
                .and_then(|iface| iface.neighbors.get_mut(&address))
                .and_then(|nbr| nbr.multicast.tail_mut())
            {
                tail.retrans_timer = Some(timers.schedule(
                    now + RETRANSMIT_INTERVAL,
                    TimerKind::Retransmit(id, address, Channel::Multicast),
                ));
            }
        }

        self.push_interface_head(id, QueuedPacket::new(data, EIGRP_MULTICAST_ADDRESS, 0));
    }

    /// The TLV describing our current state for a prefix; unreachable when we do not know it or have no usable successor.
    fn prefix_tlv(&self, destination: Prefix) -> Ipv4InternalTlv {
        let metric = self
            .topology
            .lookup(&destination)
            .and_then(|entry| entry.successor())
            .map(|successor| successor.total_metric)
            .filter(|metric| !metric.is_unreachable())
            .unwrap_or(EigrpMetrics::UNREACHABLE);
        Ipv4InternalTlv {
            next_hop: Ipv4Addr::UNSPECIFIED,
            metric,
            destination: destination.network(),
        }
    }

    /// Multicasts an UPDATE for one prefix on every interface except the one the change came from.
    fn flood_prefix_update(&mut self, now: Instant, destination: Prefix, except: Option<InterfaceId>) {
        let tlv = self.prefix_tlv(destination);
        let ids: Vec<InterfaceId> = self.interfaces.keys().copied().collect();
        for id in ids {
            if Some(id) == except {
                continue;
            }
            let iface = &self.interfaces[&id];
            if iface.params.passive || !iface.permits_outbound(&destination) {
                continue;
            }
            self.send_multicast_reliable(now, id, Opcode::Update, vec![Tlv::Ipv4Internal(tlv)]);
            if let Some(iface) = self.interfaces.get_mut(&id) {
                iface.stats.update_out += 1;
            }
        }
    }

    fn flood_unreachable(&mut self, now: Instant, destination: Prefix, except: Option<InterfaceId>) {
        let tlv = Ipv4InternalTlv {
            next_hop: Ipv4Addr::UNSPECIFIED,
            metric: EigrpMetrics::UNREACHABLE,
            destination: destination.network(),
        };
        let ids: Vec<InterfaceId> = self.interfaces.keys().copied().collect();
        for id in ids {
            if Some(id) == except || self.interfaces[&id].params.passive {
                continue;
            }
            self.send_multicast_reliable(now, id, Opcode::Update, vec![Tlv::Ipv4Internal(tlv)]);
        }
    }

    /// Unicasts a QUERY to every neighbor in the prefix's reply set.
    fn send_queries(&mut self, now: Instant, destination: Prefix) {
        let targets: Vec<NeighborKey> = self
            .topology
            .lookup(&destination)
            .map(|entry| entry.rij.iter().copied().collect())
            .unwrap_or_default();
        for key in targets {
            self.send_route_reliably(now, key, Opcode::Query, HeaderFlags::empty(), destination);
            if let Some(iface) = self.interfaces.get_mut(&key.0) {
                iface.stats.query_out += 1;
            }
        }
    }

    fn send_reply_to(&mut self, now: Instant, key: NeighborKey, destination: Prefix, opcode: Opcode) {
        self.send_route_reliably(now, key, opcode, HeaderFlags::empty(), destination);
        if let Some(iface) = self.interfaces.get_mut(&key.0) {
            iface.stats.reply_out += 1;
        }
    }

    fn send_route_reliably(&mut self, now: Instant, key: NeighborKey, opcode: Opcode, flags: HeaderFlags, destination: Prefix) {
        let tlv = self.prefix_tlv(destination);
        self.send_reliable(now, key, opcode, flags, vec![Tlv::Ipv4Internal(tlv)]);
    }

    // ===== timers =====

    /// Fires every expired timer. Each callback runs to completion between packet events.
    pub fn fire_expired(&mut self, now: Instant) {
        while let Some(kind) = self.timers.pop_expired(now) {
            self.fire_timer(now, kind);
        }
    }

    fn fire_timer(&mut self, now: Instant, kind: TimerKind) {
        match kind {
            TimerKind::Hello(id) => {
                if self.interfaces.contains_key(&id) {
                    self.send_hello(now, id);
                    self.reschedule_hello(now, id);
                }
            }
            TimerKind::HoldDown(id, address) => {
                if let Some(nbr) = self.interfaces.get_mut(&id).and_then(|iface| iface.neighbors.get_mut(&address)) {
                    nbr.hold_timer = None;
                }
                self.neighbor_down(now, (id, address), DownReason::HoldDownExpiry);
            }
            TimerKind::Retransmit(id, address, channel) => self.retransmit_expired(now, (id, address), channel),
            TimerKind::Active(prefix) => {
                let actions = match self.topology.lookup_mut(&prefix) {
                    Some(entry) => {
                        entry.active_timer = None;
                        dual::on_active_timeout(entry)
                    }
                    None => Vec::new(),
                };
                self.execute_actions(now, actions);
            }
            TimerKind::SiaProbe(prefix) => {
                let actions = match self.topology.lookup_mut(&prefix) {
                    Some(entry) => {
                        entry.sia_timer = None;
                        dual::on_sia_probe(entry)
                    }
                    None => Vec::new(),
                };
                self.execute_actions(now, actions);
            }
        }
    }

    fn retransmit_expired(&mut self, now: Instant, key: NeighborKey, channel: Channel) {
        let exhausted = {
            let Some(nbr) = self.neighbor_mut(key) else { return };
            let fifo = match channel {
                Channel::Reliable => &mut nbr.retrans,
                Channel::Multicast => &mut nbr.multicast,
            };
            match fifo.tail_mut() {
                Some(tail) => {
                    tail.retrans_timer = None;
                    tail.retrans_count += 1;
                    tail.retrans_count >= RETRANSMIT_LIMIT
                }
                None => return,
            }
        };

        if exhausted {
            self.neighbor_down(now, key, DownReason::RetransmitExhausted);
        } else {
            self.transmit_tail(now, key, channel);
        }
    }

    // ===== write scheduling =====

    /// Hands the next outbound packet to the I/O loop: one packet per call, head first, from the interface at the front of the
    /// write queue. Returns the OS ifindex and source address to emit with.
    pub fn dequeue_write(&mut self) -> Option<(u32, Ipv4Addr, QueuedPacket)> {
        loop {
            let id = *self.write_queue.front()?;
            let Some(iface) = self.interfaces.get_mut(&id) else {
                self.write_queue.pop_front();
                continue;
            };
            match iface.obuf.pop_head() {
                Some(packet) => {
                    let result = (iface.ifindex, iface.address.address, packet);
                    if iface.obuf.is_empty() {
                        iface.on_write_queue = false;
                        self.write_queue.pop_front();
                    }
                    return Some(result);
                }
                None => {
                    iface.on_write_queue = false;
                    self.write_queue.pop_front();
                }
            }
        }
    }

    pub fn has_pending_writes(&self) -> bool {
        !self.write_queue.is_empty()
    }

    /// Puts a packet the kernel refused with EAGAIN back at the head of its interface queue.
    pub fn requeue_write(&mut self, ifindex: u32, packet: QueuedPacket) {
        if let Some(id) = self.interface_by_ifindex(ifindex) {
            self.push_interface_head(id, packet);
        }
    }

    // ===== shutdown =====

    /// Announces departure on every active link: a hello carrying the goodbye PARAMETER (K1..K5 = 0xFF).
    pub fn shutdown(&mut self, now: Instant) {
        let _ = now;
        let goodbye = KValues {
            k1: 0xFF,
            k2: 0xFF,
            k3: 0xFF,
            k4: 0xFF,
            k5: 0xFF,
            k6: 0,
        };
        let ids: Vec<InterfaceId> = self.interfaces.keys().copied().collect();
        for id in ids {
            let iface = &self.interfaces[&id];
            if iface.params.passive {
                continue;
            }
            let hold_time = iface.params.hold_time;
            let mut tlvs = vec![Tlv::Parameter(ParameterTlv {
                k_values: goodbye,
                hold_time,
            })];
            self.append_auth(id, Opcode::Hello, HeaderFlags::empty(), 0, 0, &mut tlvs);
            let data = self.build_packet(Opcode::Hello, HeaderFlags::empty(), 0, 0, tlvs);
            self.push_interface_head(id, QueuedPacket::new(data, EIGRP_MULTICAST_ADDRESS, 0));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    const R2: Ipv4Addr = Ipv4Addr::new(1, 1, 1, 2);
    const R3: Ipv4Addr = Ipv4Addr::new(1, 1, 1, 3);
    const IFINDEX: u32 = 2;

    #[derive(Default)]
    struct Recorder {
        installs: Vec<(Prefix, Ipv4Addr, u32)>,
        withdraws: Vec<Prefix>,
    }

    impl RouteSink for Recorder {
        fn install(&mut self, destination: Prefix, next_hop: Ipv4Addr, distance: u32) {
            self.installs.push((destination, next_hop, distance));
        }

        fn withdraw(&mut self, destination: Prefix) {
            self.withdraws.push(destination);
        }
    }

    fn test_router() -> Router<Recorder> {
        let settings = RouterSettings {
            as_number: 100,
            k_values: KValues::default(),
            router_id_static: None,
            networks: vec![Prefix::ANY],
            profiles: HashMap::new(),
        };
        Router::new(settings, Recorder::default())
    }

    fn router_with_interface(now: Instant) -> (Router<Recorder>, InterfaceId) {
        let mut router = test_router();
        let id = router.add_interface(
            now,
            "eth0".to_string(),
            IFINDEX,
            Prefix::from_str("1.1.1.1/24").unwrap(),
            1500,
            InterfaceProfile::default(),
        );
        drain(&mut router);
        (router, id)
    }

    fn add_up_neighbor(router: &mut Router<Recorder>, id: InterfaceId, address: Ipv4Addr) {
        let iface = router.interfaces.get_mut(&id).unwrap();
        let mut nbr = Neighbor::new(id, address, 15);
        nbr.state = NeighborState::Up;
        iface.neighbors.insert(address, nbr);
    }

    fn peer_packet(opcode: Opcode, flags: HeaderFlags, sequence: u32, ack: u32, tlvs: Vec<Tlv>) -> Vec<u8> {
        EigrpPacket {
            header: EigrpHeader::new(opcode, flags, sequence, ack, 100),
            tlvs,
        }
        .pack()
    }

    fn parameter_tlv() -> Tlv {
        Tlv::Parameter(ParameterTlv {
            k_values: KValues::default(),
            hold_time: 15,
        })
    }

    fn advertised_metric(delay: u32) -> EigrpMetrics {
        EigrpMetrics {
            delay,
            bandwidth: 1_000_000,
            mtu: 1500,
            hop_count: 0,
            reliability: 255,
            load: 1,
            tag: 0,
            flags: 0,
        }
    }

    fn route_tlv(destination: &str, delay: u32) -> Tlv {
        Tlv::Ipv4Internal(Ipv4InternalTlv {
            next_hop: Ipv4Addr::UNSPECIFIED,
            metric: advertised_metric(delay),
            destination: Prefix::from_str(destination).unwrap(),
        })
    }

    fn drain(router: &mut Router<Recorder>) -> Vec<(Ipv4Addr, EigrpPacket)> {
        let mut out = Vec::new();
        while let Some((_, _, packet)) = router.dequeue_write() {
            let (_, parsed) = EigrpPacket::unpack(&packet.data).unwrap();
            out.push((packet.destination, parsed));
        }
        out
    }

    fn target() -> Prefix {
        Prefix::from_str("10.0.0.0/8").unwrap()
    }

    /// Brings the R2 adjacency all the way up, leaving 10.0.0.0/8 installed via R2.
    fn establish_adjacency(router: &mut Router<Recorder>, now: Instant) {
        let hello = peer_packet(Opcode::Hello, HeaderFlags::empty(), 0, 0, vec![parameter_tlv()]);
        router.handle_frame(now, IFINDEX, R2, &hello).unwrap();

        let sent = drain(router);
        let (destination, init) = &sent[0];
        assert_eq!(*destination, R2);
        assert!(init.header.flags.contains(HeaderFlags::INIT));
        assert_eq!(init.header.sequence, 1);
        assert_eq!(init.header.ack, 0);

        // The peer acknowledges our INIT through a pure-ack hello.
        let ack = peer_packet(Opcode::Hello, HeaderFlags::empty(), 0, 1, Vec::new());
        router.handle_frame(now, IFINDEX, R2, &ack).unwrap();

        let sent = drain(router);
        let (_, eot) = &sent[0];
        assert!(eot.header.flags.contains(HeaderFlags::END_OF_TABLE));
        assert!(eot
            .tlvs
            .iter()
            .any(|tlv| matches!(tlv, Tlv::Ipv4Internal(route) if route.destination == Prefix::from_str("1.1.1.0/24").unwrap())));
        let eot_sequence = eot.header.sequence;

        // The peer's own end-of-table, advertising 10.0.0.0/8 with the classic test metric.
        let peer_eot = peer_packet(
            Opcode::Update,
            HeaderFlags::END_OF_TABLE,
            1,
            eot_sequence,
            vec![route_tlv("10.0.0.0/8", 10)],
        );
        router.handle_frame(now, IFINDEX, R2, &peer_eot).unwrap();
    }

    #[test]
    fn adjacency_bring_up_installs_first_route() {
        let now = Instant::now();
        let (mut router, id) = router_with_interface(now);
        establish_adjacency(&mut router, now);

        assert_eq!(router.neighbor_state((id, R2)), Some(NeighborState::Up));

        let entry = router.topology.lookup(&target()).unwrap();
        assert_eq!(entry.state, DualState::Passive);
        assert_eq!(entry.feasible_distance, 30_720);
        assert_eq!(entry.distance, 30_720);
        assert_eq!(entry.successor().unwrap().neighbor, Some((id, R2)));

        assert_eq!(router.routes.sink().installs, vec![(target(), R2, 30_720)]);

        // The reliable EOT was acknowledged.
        let sent = drain(&mut router);
        assert!(sent
            .iter()
            .any(|(dst, packet)| *dst == R2 && packet.header.opcode == Opcode::Hello && packet.header.ack == 1));
    }

    #[test]
    fn passive_prefix_invariants_after_convergence() {
        let now = Instant::now();
        let (mut router, _) = router_with_interface(now);
        establish_adjacency(&mut router, now);

        for entry in router.topology.iter() {
            if entry.state != DualState::Passive {
                continue;
            }
            assert!(entry.entries.iter().filter(|candidate| candidate.is_successor()).count() <= 1);
            for candidate in &entry.entries {
                assert!(candidate.distance >= entry.feasible_distance);
            }
            if let Some(successor) = entry.successor() {
                assert!(successor.neighbor.is_none() || successor.reported_distance < entry.feasible_distance);
            }
        }
    }

    #[test]
    fn duplicate_update_does_not_reinstall() {
        let now = Instant::now();
        let (mut router, _) = router_with_interface(now);
        establish_adjacency(&mut router, now);
        assert_eq!(router.routes.sink().installs.len(), 1);

        let update = peer_packet(Opcode::Update, HeaderFlags::empty(), 2, 0, vec![route_tlv("10.0.0.0/8", 10)]);
        router.handle_frame(now, IFINDEX, R2, &update).unwrap();
        assert_eq!(router.routes.sink().installs.len(), 1);
    }

    #[test]
    fn ack_mismatch_leaves_fifos_alone() {
        let now = Instant::now();
        let (mut router, id) = router_with_interface(now);
        let hello = peer_packet(Opcode::Hello, HeaderFlags::empty(), 0, 0, vec![parameter_tlv()]);
        router.handle_frame(now, IFINDEX, R2, &hello).unwrap();
        drain(&mut router);
        assert_eq!(router.interfaces[&id].neighbors[&R2].retrans.len(), 1);

        // A wrong ack must not pop anything.
        let bad_ack = peer_packet(Opcode::Hello, HeaderFlags::empty(), 0, 9, Vec::new());
        router.handle_frame(now, IFINDEX, R2, &bad_ack).unwrap();
        assert_eq!(router.interfaces[&id].neighbors[&R2].retrans.len(), 1);
        assert_eq!(router.neighbor_state((id, R2)), Some(NeighborState::Pending));
    }

    #[test]
    fn only_tail_carries_retransmit_timer() {
        let now = Instant::now();
        let (mut router, id) = router_with_interface(now);
        add_up_neighbor(&mut router, id, R2);

        for _ in 0..3 {
            let _ = router.send_reliable(now, (id, R2), Opcode::Update, HeaderFlags::empty(), vec![route_tlv("10.0.0.0/8", 10)]);
        }

        let nbr = &router.interfaces[&id].neighbors[&R2];
        assert_eq!(nbr.retrans.len(), 3);
        let timers: Vec<bool> = nbr.retrans.iter().map(|packet| packet.retrans_timer.is_some()).collect();
        // Head to tail: only the oldest packet is armed.
        assert_eq!(timers, vec![false, false, true]);

        let sequences: Vec<u32> = nbr.retrans.iter().map(|packet| packet.sequence).collect();
        let mut sorted = sequences.clone();
        sorted.sort_by(|a, b| b.cmp(a));
        assert_eq!(sequences, sorted, "sequences must increase from tail to head");
    }

    #[test]
    fn feasible_successor_takes_over_without_queries() {
        let now = Instant::now();
        let (mut router, id) = router_with_interface(now);
        establish_adjacency(&mut router, now);
        add_up_neighbor(&mut router, id, R3);

        // R3 offers a worse path that still satisfies the feasibility condition.
        let update = peer_packet(Opcode::Update, HeaderFlags::empty(), 1, 0, vec![route_tlv("10.0.0.0/8", 50)]);
        router.handle_frame(now, IFINDEX, R3, &update).unwrap();
        drain(&mut router);

        router.neighbor_down(now, (id, R2), DownReason::HoldDownExpiry);

        let entry = router.topology.lookup(&target()).unwrap();
        assert_eq!(entry.state, DualState::Passive);
        assert_eq!(entry.successor().unwrap().neighbor, Some((id, R3)));
        assert_eq!(entry.distance, 40_960);
        assert_eq!(entry.feasible_distance, 30_720);

        let sent = drain(&mut router);
        assert!(!sent.iter().any(|(_, packet)| packet.header.opcode == Opcode::Query));
        assert_eq!(router.routes.sink().installs.last(), Some(&(target(), R3, 40_960)));
    }

    #[test]
    fn diffusing_computation_and_reply_convergence() {
        let now = Instant::now();
        let (mut router, id) = router_with_interface(now);
        establish_adjacency(&mut router, now);
        add_up_neighbor(&mut router, id, R3);

        // R3's reported distance exceeds FD: not a feasible successor.
        let update = peer_packet(Opcode::Update, HeaderFlags::empty(), 1, 0, vec![route_tlv("10.0.0.0/8", 640)]);
        router.handle_frame(now, IFINDEX, R3, &update).unwrap();
        drain(&mut router);

        router.neighbor_down(now, (id, R2), DownReason::HoldDownExpiry);

        let entry = router.topology.lookup(&target()).unwrap();
        assert_eq!(entry.state, DualState::Active1);
        assert_eq!(entry.rij.iter().copied().collect::<Vec<_>>(), vec![(id, R3)]);
        assert!(entry.active_timer.is_some());
        assert!(entry.sia_timer.is_some());

        let sent = drain(&mut router);
        assert!(sent.iter().any(|(dst, packet)| *dst == R3 && packet.header.opcode == Opcode::Query));

        // R3 replies with its unchanged path; the computation completes.
        let reply = peer_packet(Opcode::Reply, HeaderFlags::empty(), 2, 0, vec![route_tlv("10.0.0.0/8", 640)]);
        router.handle_frame(now, IFINDEX, R3, &reply).unwrap();

        let entry = router.topology.lookup(&target()).unwrap();
        assert_eq!(entry.state, DualState::Passive);
        assert_eq!(entry.feasible_distance, entry.distance);
        assert_eq!(entry.successor().unwrap().neighbor, Some((id, R3)));
        let distance = entry.distance;
        assert_eq!(router.routes.sink().installs.last(), Some(&(target(), R3, distance)));

        let sent = drain(&mut router);
        assert!(sent
            .iter()
            .any(|(dst, packet)| *dst == EIGRP_MULTICAST_ADDRESS && packet.header.opcode == Opcode::Update));
    }

    #[test]
    fn retransmit_exhaustion_tears_the_neighbor_down() {
        let now = Instant::now();
        let (mut router, id) = router_with_interface(now);
        establish_adjacency(&mut router, now);
        drain(&mut router);

        let sequence = router
            .send_reliable(now, (id, R2), Opcode::Update, HeaderFlags::empty(), vec![route_tlv("172.16.0.0/16", 10)])
            .unwrap();

        // The update sits unacknowledged; every 5 seconds it goes out again, sixteen times in total, each attempt keeping the
        // hold-down alive with a fresh hello from the (silent-on-acks) peer.
        let mut at = now;
        for attempt in 1..=RETRANSMIT_LIMIT {
            at += RETRANSMIT_INTERVAL;
            router.fire_expired(at);
            let hello = peer_packet(Opcode::Hello, HeaderFlags::empty(), 0, 0, vec![parameter_tlv()]);
            router.handle_frame(at, IFINDEX, R2, &hello).unwrap();
            if attempt < RETRANSMIT_LIMIT {
                let retransmissions = drain(&mut router)
                    .iter()
                    .filter(|(dst, packet)| *dst == R2 && packet.header.sequence == sequence)
                    .count();
                assert_eq!(retransmissions, 1, "one retransmission per interval (attempt {attempt})");
                assert!(router.interfaces[&id].neighbors.contains_key(&R2));
            }
        }
        assert!(!router.interfaces[&id].neighbors.contains_key(&R2));
        assert!(router.topology.lookup(&target()).is_none(), "the dead peer's routes are withdrawn");
    }

    #[test]
    fn inbound_filter_rescan_poisons_and_diffuses() {
        let now = Instant::now();
        let (mut router, id) = router_with_interface(now);
        establish_adjacency(&mut router, now);
        drain(&mut router);

        router.set_inbound_filter(now, id, vec![target()]);

        // The only candidate is now unreachable: DUAL sees a distance increase with no feasible successor.
        let entry = router.topology.lookup(&target()).unwrap();
        assert!(entry.entry_for(Some((id, R2))).unwrap().reported_metric.is_unreachable());
        assert_eq!(entry.state, DualState::Active1);

        let sent = drain(&mut router);
        assert!(sent.iter().any(|(dst, packet)| *dst == R2 && packet.header.opcode == Opcode::Query));

        // Fresh advertisements of the denied prefix keep arriving poisoned.
        let reply = peer_packet(Opcode::Reply, HeaderFlags::empty(), 5, 0, vec![route_tlv("10.0.0.0/8", 10)]);
        router.handle_frame(now, IFINDEX, R2, &reply).unwrap();
        assert!(router.topology.lookup(&target()).is_none(), "unreachable everywhere deletes the prefix");
        assert_eq!(router.routes.sink().withdraws.last(), Some(&target()));
    }

    #[test]
    fn hold_down_expiry_withdraws_and_emits_unreachable() {
        let now = Instant::now();
        let (mut router, id) = router_with_interface(now);
        establish_adjacency(&mut router, now);
        add_up_neighbor(&mut router, id, R3);
        drain(&mut router);

        // No further hellos from R2: the negotiated 15 s hold-down expires.
        router.fire_expired(now + Duration::from_secs(16));

        assert!(!router.interfaces[&id].neighbors.contains_key(&R2));
        assert!(router.topology.lookup(&target()).is_none());
        assert_eq!(router.routes.sink().withdraws, vec![target()]);

        // Exactly one unreachable UPDATE toward the survivors.
        let unreachable: Vec<_> = drain(&mut router)
            .into_iter()
            .filter(|(_, packet)| {
                packet.header.opcode == Opcode::Update
                    && packet.tlvs.iter().any(
                        |tlv| matches!(tlv, Tlv::Ipv4Internal(route) if route.metric.is_unreachable() && route.destination == target()),
                    )
            })
            .collect();
        assert_eq!(unreachable.len(), 1);
    }

    #[test]
    fn query_for_unknown_prefix_gets_unreachable_reply() {
        let now = Instant::now();
        let (mut router, id) = router_with_interface(now);
        add_up_neighbor(&mut router, id, R2);

        let query = peer_packet(Opcode::Query, HeaderFlags::empty(), 4, 0, vec![route_tlv("172.16.0.0/16", 10)]);
        router.handle_frame(now, IFINDEX, R2, &query).unwrap();

        let sent = drain(&mut router);
        let reply = sent
            .iter()
            .find(|(dst, packet)| *dst == R2 && packet.header.opcode == Opcode::Reply)
            .expect("a reply must be sent");
        assert!(matches!(&reply.1.tlvs[0], Tlv::Ipv4Internal(route) if route.metric.is_unreachable()));
        // The reliable reply also folds in an ack of the query.
        assert_eq!(reply.1.header.ack, 4);
    }

    #[test]
    fn goodbye_and_kvalue_mismatch_drop_adjacency() {
        let now = Instant::now();
        let (mut router, id) = router_with_interface(now);
        establish_adjacency(&mut router, now);

        let goodbye = KValues {
            k1: 0xFF,
            k2: 0xFF,
            k3: 0xFF,
            k4: 0xFF,
            k5: 0xFF,
            k6: 0,
        };
        let packet = peer_packet(
            Opcode::Hello,
            HeaderFlags::empty(),
            0,
            0,
            vec![Tlv::Parameter(ParameterTlv {
                k_values: goodbye,
                hold_time: 15,
            })],
        );
        router.handle_frame(now, IFINDEX, R2, &packet).unwrap();
        assert!(!router.interfaces[&id].neighbors.contains_key(&R2));

        // A mismatching K set never forms an adjacency in the first place.
        let mismatched = KValues {
            k2: 1,
            ..KValues::default()
        };
        let packet = peer_packet(
            Opcode::Hello,
            HeaderFlags::empty(),
            0,
            0,
            vec![Tlv::Parameter(ParameterTlv {
                k_values: mismatched,
                hold_time: 15,
            })],
        );
        router.handle_frame(now, IFINDEX, R3, &packet).unwrap();
        assert_eq!(router.neighbor_state((id, R3)), Some(NeighborState::Down));
    }

    #[test]
    fn passive_interface_neither_sends_nor_accepts() {
        let now = Instant::now();
        let mut router = test_router();
        let id = router.add_interface(
            now,
            "eth1".to_string(),
            7,
            Prefix::from_str("192.168.2.1/24").unwrap(),
            1500,
            InterfaceProfile {
                params: InterfaceParams {
                    passive: true,
                    ..InterfaceParams::default()
                },
                ..InterfaceProfile::default()
            },
        );

        assert!(drain(&mut router).is_empty(), "no hello on a passive link");
        assert!(router.interfaces[&id].hello_timer.is_none());

        let hello = peer_packet(Opcode::Hello, HeaderFlags::empty(), 0, 0, vec![parameter_tlv()]);
        assert_eq!(
            router.handle_frame(now, 7, Ipv4Addr::new(192, 168, 2, 2), &hello),
            Err(PacketError::PassiveInterface)
        );
        assert!(router.interfaces[&id].neighbors.is_empty());
    }

    #[test]
    fn sequence_wrap_skips_zero() {
        let now = Instant::now();
        let (mut router, id) = router_with_interface(now);
        add_up_neighbor(&mut router, id, R2);
        router.sequence = u32::MAX;

        let first = router.send_reliable(now, (id, R2), Opcode::Update, HeaderFlags::empty(), Vec::new());
        let second = router.send_reliable(now, (id, R2), Opcode::Update, HeaderFlags::empty(), Vec::new());
        assert_eq!(first, Some(u32::MAX));
        assert_eq!(second, Some(1));
    }

    #[test]
    fn frames_failing_validation_are_counted_and_dropped() {
        let now = Instant::now();
        let (mut router, _) = router_with_interface(now);

        let mut bad_checksum = peer_packet(Opcode::Hello, HeaderFlags::empty(), 0, 0, vec![parameter_tlv()]);
        bad_checksum[6] ^= 0xFF;
        assert_eq!(router.handle_frame(now, IFINDEX, R2, &bad_checksum), Err(PacketError::BadChecksum));

        let wrong_as = EigrpPacket {
            header: EigrpHeader::new(Opcode::Hello, HeaderFlags::empty(), 0, 0, 200),
            tlvs: vec![parameter_tlv()],
        }
        .pack();
        assert_eq!(router.handle_frame(now, IFINDEX, R2, &wrong_as), Err(PacketError::AsMismatch(200, 100)));

        let outside_subnet = peer_packet(Opcode::Hello, HeaderFlags::empty(), 0, 0, vec![parameter_tlv()]);
        assert_eq!(
            router.handle_frame(now, IFINDEX, Ipv4Addr::new(9, 9, 9, 9), &outside_subnet),
            Err(PacketError::WrongSubnet(Ipv4Addr::new(9, 9, 9, 9)))
        );

        let update_from_stranger = peer_packet(Opcode::Update, HeaderFlags::empty(), 1, 0, Vec::new());
        assert_eq!(
            router.handle_frame(now, IFINDEX, R2, &update_from_stranger),
            Err(PacketError::NoSuchNeighbor(R2))
        );

        assert_eq!(router.stats.bad_checksum, 1);
        assert_eq!(router.stats.as_mismatch, 1);
        assert_eq!(router.stats.wrong_subnet, 1);
        assert_eq!(router.stats.no_such_neighbor, 1);
    }

    #[test]
    fn multicast_update_shadows_every_up_neighbor() {
        let now = Instant::now();
        let (mut router, id) = router_with_interface(now);
        establish_adjacency(&mut router, now);
        add_up_neighbor(&mut router, id, R3);
        drain(&mut router);

        // A locally originated change (a second connected link) floods eth0 and shadows both UP peers there.
        let second = router.add_interface(
            now,
            "eth2".to_string(),
            9,
            Prefix::from_str("192.168.9.1/24").unwrap(),
            1500,
            InterfaceProfile::default(),
        );
        assert_ne!(second, id);

        let shadowed: Vec<usize> = router.interfaces[&id]
            .neighbors
            .values()
            .map(|nbr| nbr.multicast.len())
            .collect();
        assert_eq!(shadowed, vec![1, 1]);

        let sent = drain(&mut router);
        assert!(sent
            .iter()
            .any(|(dst, packet)| *dst == EIGRP_MULTICAST_ADDRESS && packet.header.opcode == Opcode::Update));
    }

    #[test]
    fn sia_probe_and_timeout_recover_stuck_computation() {
        let now = Instant::now();
        let (mut router, id) = router_with_interface(now);
        establish_adjacency(&mut router, now);
        add_up_neighbor(&mut router, id, R3);
        let update = peer_packet(Opcode::Update, HeaderFlags::empty(), 1, 0, vec![route_tlv("10.0.0.0/8", 640)]);
        router.handle_frame(now, IFINDEX, R3, &update).unwrap();
        router.neighbor_down(now, (id, R2), DownReason::HoldDownExpiry);
        assert_eq!(router.topology.lookup(&target()).unwrap().state, DualState::Active1);
        drain(&mut router);

        // Half budget: SIAQUERY probes toward everyone still owing a reply.
        router.fire_expired(now + SIA_PROBE_TIMEOUT + Duration::from_secs(1));
        let sent = drain(&mut router);
        assert!(sent.iter().any(|(dst, packet)| *dst == R3 && packet.header.opcode == Opcode::SiaQuery));

        // Full budget with no SIAREPLY: the silent peer goes down, the prefix ends up deleted as unreachable.
        router.fire_expired(now + ACTIVE_TIMEOUT + Duration::from_secs(1));
        assert!(!router.interfaces[&id].neighbors.contains_key(&R3));
        assert!(router.topology.lookup(&target()).is_none());
    }

    #[test]
    fn router_id_change_sweeps_interface_membership() {
        let now = Instant::now();
        let mut router = test_router();

        // Without an effective router-id the link is recorded but stays out of the process.
        let up = InterfaceEvent::Up {
            name: "eth0".to_string(),
            ifindex: IFINDEX,
            address: Prefix::from_str("1.1.1.1/24").unwrap(),
            mtu: 1500,
        };
        assert!(router.handle_interface_event(now, up.clone()).is_empty());
        assert!(router.interfaces.is_empty());

        // Learning a router-id re-evaluates the known links and brings the interface in.
        let (router_id, requests) = router.update_router_id(now, Some(Ipv4Addr::new(1, 1, 1, 1)));
        assert_eq!(router_id, Some(Ipv4Addr::new(1, 1, 1, 1)));
        assert!(requests.contains(&IoRequest::JoinMulticast { ifindex: IFINDEX }));
        assert!(router.interface_by_ifindex(IFINDEX).is_some());

        // An unchanged selection (previously-used id wins over a new hint) does not sweep again.
        let (router_id, requests) = router.update_router_id(now, Some(Ipv4Addr::new(9, 9, 9, 9)));
        assert_eq!(router_id, Some(Ipv4Addr::new(1, 1, 1, 1)));
        assert!(requests.is_empty());

        // Re-delivering the Up event for an already-member link is a no-op.
        assert!(router.handle_interface_event(now, up).is_empty());
    }

    struct MacOracle;

    impl crate::events::AuthOracle for MacOracle {
        fn sign(&self, _ifindex: u32, _payload: &[u8]) -> Option<Vec<u8>> {
            Some(b"corvus-mac".to_vec())
        }

        fn verify(&self, _ifindex: u32, _payload: &[u8], mac: &[u8]) -> bool {
            mac == b"corvus-mac"
        }
    }

    #[test]
    fn auth_oracle_signs_every_outbound_packet_and_gates_inbound() {
        let now = Instant::now();
        let (mut router, id) = router_with_interface(now);
        router.interfaces.get_mut(&id).unwrap().auth_oracle = Some(Box::new(MacOracle));

        // Unsigned frames are dropped once authentication is on.
        let unsigned = peer_packet(Opcode::Hello, HeaderFlags::empty(), 0, 0, vec![parameter_tlv()]);
        assert_eq!(router.handle_frame(now, IFINDEX, R2, &unsigned), Err(PacketError::AuthFailed));

        // A signed hello forms the adjacency as usual; the triggered INIT update must carry the MAC as well, or the peer's
        // symmetric check would stall the exchange right here.
        let signed = peer_packet(
            Opcode::Hello,
            HeaderFlags::empty(),
            0,
            0,
            vec![
                Tlv::Authentication(AuthenticationTlv {
                    data: b"corvus-mac".to_vec(),
                }),
                parameter_tlv(),
            ],
        );
        router.handle_frame(now, IFINDEX, R2, &signed).unwrap();
        assert_eq!(router.neighbor_state((id, R2)), Some(NeighborState::Pending));

        router.send_hello(now, id);
        let sent = drain(&mut router);
        assert!(sent.iter().any(|(_, packet)| packet.header.flags.contains(HeaderFlags::INIT)));
        for (_, packet) in &sent {
            assert!(
                matches!(packet.tlvs.first(), Some(Tlv::Authentication(auth)) if auth.data == b"corvus-mac"),
                "unsigned {} packet left the router",
                packet.header.opcode
            );
        }
    }

    #[test]
    fn interface_down_event_cleans_up() {
        let now = Instant::now();
        let (mut router, id) = router_with_interface(now);
        establish_adjacency(&mut router, now);

        let requests = router.handle_interface_event(now, InterfaceEvent::Down { ifindex: IFINDEX });
        assert_eq!(requests, vec![IoRequest::LeaveMulticast { ifindex: IFINDEX }]);
        assert!(!router.interfaces.contains_key(&id));
        assert_eq!(router.topology.len(), 0);
        assert!(router.timers.next_deadline().is_none(), "all timers cancelled");
    }

    #[test]
    fn cleared_neighbor_reinitializes_on_next_hello() {
        let now = Instant::now();
        let (mut router, id) = router_with_interface(now);
        establish_adjacency(&mut router, now);
        drain(&mut router);

        router.clear_neighbor(now, (id, R2));
        assert!(!router.interfaces[&id].neighbors.contains_key(&R2));
        assert!(router.topology.lookup(&target()).is_none());

        // The next hello starts a fresh adjacency from scratch.
        let hello = peer_packet(Opcode::Hello, HeaderFlags::empty(), 0, 0, vec![parameter_tlv()]);
        router.handle_frame(now, IFINDEX, R2, &hello).unwrap();
        assert_eq!(router.neighbor_state((id, R2)), Some(NeighborState::Pending));
        assert!(drain(&mut router)
            .iter()
            .any(|(dst, packet)| *dst == R2 && packet.header.flags.contains(HeaderFlags::INIT)));
    }

    #[test]
    fn hello_timer_reschedules_and_emits() {
        let now = Instant::now();
        let (mut router, _) = router_with_interface(now);

        router.fire_expired(now + Duration::from_secs(6));
        let sent = drain(&mut router);
        let hello = sent
            .iter()
            .find(|(dst, packet)| *dst == EIGRP_MULTICAST_ADDRESS && packet.header.opcode == Opcode::Hello)
            .expect("periodic hello");
        assert_eq!(hello.1.header.sequence, 0);
        assert!(hello.1.tlvs.iter().any(|tlv| matches!(tlv, Tlv::Parameter(_))));
        assert!(hello.1.tlvs.iter().any(|tlv| matches!(tlv, Tlv::SoftwareVersion(_))));

        // The timer re-armed itself.
        router.fire_expired(now + Duration::from_secs(11));
        assert!(drain(&mut router).iter().any(|(_, packet)| packet.header.opcode == Opcode::Hello));
    }
}
