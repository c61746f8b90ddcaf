//! One-shot host interface discovery over rtnetlink: enumerates the links that are up and carry an IPv4 address and turns
//! them into the typed events the router consumes. Live link monitoring belongs to the host-integration layer; the daemon
//! only needs the initial snapshot plus whatever events the operator injects.

use crate::events::InterfaceEvent;
use corvus_common::Prefix;
use futures_util::TryStreamExt;
use netlink_packet_route::{
    address::AddressAttribute,
    link::{
        LinkAttribute,
        LinkFlag,
    },
    AddressFamily,
};
use rtnetlink::Handle;
use std::{
    collections::HashMap,
    net::IpAddr,
};

pub async fn discover(handle: &Handle) -> Result<Vec<InterfaceEvent>, rtnetlink::Error> {
    struct LinkInfo {
        name: String,
        mtu: u32,
        usable: bool,
    }

    let mut links: HashMap<u32, LinkInfo> = HashMap::new();
    let mut link_dump = handle.link().get().execute();
    while let Some(message) = link_dump.try_next().await? {
        let flags = message.header.flags;
        let usable = flags.contains(&LinkFlag::Up) && !flags.contains(&LinkFlag::Loopback);
        let mut name = String::new();
        let mut mtu = 1500;
        for attribute in &message.attributes {
            match attribute {
                LinkAttribute::IfName(value) => name = value.clone(),
                LinkAttribute::Mtu(value) => mtu = *value,
                _ => {}
            }
        }
        links.insert(message.header.index, LinkInfo { name, mtu, usable });
    }

    let mut events = Vec::new();
    let mut address_dump = handle.address().get().execute();
    while let Some(message) = address_dump.try_next().await? {
        if message.header.family != AddressFamily::Inet {
            continue;
        }
        let Some(link) = links.get(&message.header.index) else { continue };
        if !link.usable {
            continue;
        }
        for attribute in &message.attributes {
            if let AddressAttribute::Address(IpAddr::V4(address)) = attribute {
                events.push(InterfaceEvent::Up {
                    name: link.name.clone(),
                    ifindex: message.header.index,
                    address: Prefix::new(*address, message.header.prefix_len),
                    mtu: link.mtu,
                });
            }
        }
    }
    Ok(events)
}

/// Router-id hint per the selection rules: the numerically highest local IPv4 address.
pub fn router_id_hint(events: &[InterfaceEvent]) -> Option<std::net::Ipv4Addr> {
    events
        .iter()
        .filter_map(|event| match event {
            InterfaceEvent::Up { address, .. } => Some(address.address),
            _ => None,
        })
        .max()
}
