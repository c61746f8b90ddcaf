use crate::{
    Route,
    RouteError,
    RouteProtocol,
    RouteTable,
};
use corvus_common::{
    next_enum_of,
    Prefix,
};
use futures_util::TryStreamExt;
use netlink_packet_route::{
    route::{
        RouteAddress,
        RouteAttribute,
        RouteHeader,
        RouteMessage,
        RouteScope,
        RouteType,
    },
    AddressFamily,
};
use rtnetlink::{
    new_connection,
    Handle,
    IpVersion,
};
use std::{
    future::Future,
    net::Ipv4Addr,
};
use tokio::task::JoinHandle;

pub type NetlinkRouteProtocol = netlink_packet_route::route::RouteProtocol;

impl From<NetlinkRouteProtocol> for RouteProtocol {
    fn from(value: NetlinkRouteProtocol) -> Self {
        match value {
            NetlinkRouteProtocol::Eigrp => Self::Eigrp,
            NetlinkRouteProtocol::Ospf => Self::Ospf,
            NetlinkRouteProtocol::Bgp => Self::Bgp,
            NetlinkRouteProtocol::Static => Self::Static,
            NetlinkRouteProtocol::Dhcp => Self::Dhcp,
            NetlinkRouteProtocol::Kernel => Self::Kernel,
            _ => Self::Other,
        }
    }
}

pub struct LinuxRouteTable {
    netlink_handle: Handle,
    _connection_thread: JoinHandle<()>,
}

impl LinuxRouteTable {
    /// Builds the netlink message shared by the withdraw path: enough of the
    /// route key (family, destination, protocol, table) for the kernel to
    /// identify the entry.
    fn route_message(destination: Prefix) -> RouteMessage {
        let mut message = RouteMessage::default();
        message.header.address_family = AddressFamily::Inet;
        message.header.destination_prefix_length = destination.length;
        message.header.protocol = NetlinkRouteProtocol::Eigrp;
        message.header.scope = RouteScope::Universe;
        message.header.kind = RouteType::Unicast;
        message.header.table = RouteHeader::RT_TABLE_MAIN;
        message
            .attributes
            .push(RouteAttribute::Destination(RouteAddress::Inet(destination.network().address)));
        message
    }
}

impl RouteTable for LinuxRouteTable {
    fn new() -> Result<Self, RouteError> {
        let (connection, netlink_handle, _) = new_connection()?;
        let connection_thread = tokio::spawn(connection);
        Ok(Self {
            netlink_handle,
            _connection_thread: connection_thread,
        })
    }

    fn all(&self) -> impl Future<Output = Result<Vec<Route>, RouteError>> + Send {
        fn netlink_route_message_to_route(route: RouteMessage) -> Route {
            Route {
                // The protocol origin of this route
                protocol: RouteProtocol::from(route.header.protocol),

                // The next hop in the pathway to the destination prefix
                next_hop: next_enum_of!(route.attributes, RouteAttribute::Gateway(val) => val).and_then(|addr| {
                    match addr {
                        RouteAddress::Inet(addr) => Some(*addr),
                        _ => None,
                    }
                }),

                // The priority of the route
                priority: next_enum_of!(route.attributes, RouteAttribute::Priority(value) => *value),

                // The destination of the route (if not present, alternate to 0.0.0.0/0)
                destination: next_enum_of!(route.attributes, RouteAttribute::Destination(value) => value).and_then(
                    |addr| {
                        match addr {
                            RouteAddress::Inet(addr) => Some(Prefix::new(*addr, route.header.destination_prefix_length)),
                            _ => None,
                        }
                    },
                ),
            }
        }

        async {
            let mut routes = Vec::new();

            // Collect IPv4 routing table entries
            let mut netlink_v4_routes = self.netlink_handle.route().get(IpVersion::V4).execute();
            while let Some(route) = netlink_v4_routes.try_next().await? {
                routes.push(netlink_route_message_to_route(route));
            }

            Ok(routes)
        }
    }

    fn install(&self, destination: Prefix, next_hop: Ipv4Addr, priority: u32) -> impl Future<Output = Result<(), RouteError>> + Send {
        async move {
            self.netlink_handle
                .route()
                .add()
                .v4()
                .replace()
                .protocol(NetlinkRouteProtocol::Eigrp)
                .destination_prefix(destination.network().address, destination.length)
                .gateway(next_hop)
                .priority(priority)
                .execute()
                .await?;
            Ok(())
        }
    }

    fn withdraw(&self, destination: Prefix) -> impl Future<Output = Result<(), RouteError>> + Send {
        async move {
            self.netlink_handle.route().del(Self::route_message(destination)).execute().await?;
            Ok(())
        }
    }
}
