//! Bridge between DUAL's successor decisions and the host forwarding table. The manager remembers what it last pushed so that
//! repeated installs with unchanged arguments never reach the host, even if the sink below forgot to be idempotent.

use crate::{
    events::RouteSink,
    topology::{
        prefix_key,
        PrefixKey,
    },
};
use corvus_common::Prefix;
use log::debug;
use std::{
    collections::BTreeMap,
    net::Ipv4Addr,
};

pub struct RouteManager<S: RouteSink> {
    sink: S,
    installed: BTreeMap<PrefixKey, (Ipv4Addr, u32)>,
}

impl<S: RouteSink> RouteManager<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            installed: BTreeMap::new(),
        }
    }

    pub fn install(&mut self, destination: Prefix, next_hop: Ipv4Addr, distance: u32) {
        let key = prefix_key(&destination);
        if self.installed.get(&key) == Some(&(next_hop, distance)) {
            return;
        }
        debug!("Installing route {} via {} distance {}", destination, next_hop, distance);
        self.installed.insert(key, (next_hop, distance));
        self.sink.install(destination, next_hop, distance);
    }

    pub fn withdraw(&mut self, destination: Prefix) {
        if self.installed.remove(&prefix_key(&destination)).is_none() {
            return;
        }
        debug!("Withdrawing route {}", destination);
        self.sink.withdraw(destination);
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }
}
