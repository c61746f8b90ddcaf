// Copyright 2025 The Corvus Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

mod config;
mod discovery;
mod dual;
mod dump;
mod engine;
mod error;
mod events;
mod interface;
mod neighbor;
mod network;
mod routes;
mod timers;
mod topology;
mod transport;

use crate::{
    config::Config,
    engine::{
        IoRequest,
        Router,
    },
    events::RouteSink,
    network::RawSocket,
};
use clap::Parser;
use corvus_common::Prefix;
use corvus_route::{
    linux::LinuxRouteTable,
    RouteTable,
};
use log::{
    debug,
    error,
    info,
    warn,
    LevelFilter,
};
use mio::{
    unix::SourceFd,
    Events,
    Interest,
    Poll,
    Token,
};
use simple_logger::SimpleLogger;
use std::{
    io,
    net::Ipv4Addr,
    path::PathBuf,
    process::exit,
    rc::Rc,
    sync::atomic::{
        AtomicBool,
        Ordering,
    },
    time::Instant,
};

/// Corvus is a modern interior routing daemon speaking EIGRP over raw IP protocol 88.
#[derive(Parser)]
#[command(name = "corvusd", version)]
struct Cli {
    /// Path to the daemon configuration file
    #[arg(short, long, default_value = "corvusd.toml")]
    config: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: LevelFilter,
}

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn request_shutdown(_signal: libc::c_int) {
    SHUTDOWN.store(true, Ordering::SeqCst);
}

/// Pushes computed routes into the kernel table through rtnetlink. Netlink round-trips run on a current-thread runtime owned
/// here; installs are quick and keep the cooperative loop responsive enough for a routing daemon's duty cycle.
struct NetlinkSink {
    runtime: Rc<tokio::runtime::Runtime>,
    table: LinuxRouteTable,
}

impl RouteSink for NetlinkSink {
    fn install(&mut self, destination: Prefix, next_hop: Ipv4Addr, distance: u32) {
        if let Err(error) = self.runtime.block_on(self.table.install(destination, next_hop, distance)) {
            error!("Unable to install route {} => {}", destination, error);
        }
    }

    fn withdraw(&mut self, destination: Prefix) {
        if let Err(error) = self.runtime.block_on(self.table.withdraw(destination)) {
            error!("Unable to withdraw route {} => {}", destination, error);
        }
    }
}

fn drop_privileges(uid: Option<u32>, gid: Option<u32>) -> io::Result<()> {
    if let Some(gid) = gid {
        if unsafe { libc::setgid(gid) } != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    if let Some(uid) = uid {
        if unsafe { libc::setuid(uid) } != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

fn apply_io_request(socket: &RawSocket, request: IoRequest) {
    match request {
        IoRequest::JoinMulticast { ifindex } => {
            if let Err(error) = socket.join_multicast(ifindex) {
                warn!("Unable to join 224.0.0.10 on ifindex {} => {}", ifindex, error);
            }
        }
        IoRequest::LeaveMulticast { ifindex } => {
            if let Err(error) = socket.leave_multicast(ifindex) {
                warn!("Unable to leave 224.0.0.10 on ifindex {} => {}", ifindex, error);
            }
        }
        IoRequest::GrowSendBuffer { bytes } => {
            if let Err(error) = socket.grow_send_buffer(bytes) {
                warn!("Unable to grow send buffer to {} bytes => {}", bytes, error);
            }
        }
    }
}

/// The cooperative loop: wait for socket readiness or the next timer deadline, then run exactly one batch of work. Nothing in
/// here blocks outside of `poll`.
fn run<S: RouteSink>(router: &mut Router<S>, socket: &RawSocket) -> anyhow::Result<i32> {
    let mut poll = Poll::new()?;
    let mut events = Events::with_capacity(256);
    const SOCKET: Token = Token(0);
    let fd = socket.raw_fd();
    poll.registry().register(&mut SourceFd(&fd), SOCKET, Interest::READABLE)?;
    let mut write_interest = false;

    loop {
        let now = Instant::now();
        router.fire_expired(now);

        if SHUTDOWN.load(Ordering::SeqCst) {
            debug!("{}", dump::neighbor_table(router));
            debug!("{}", dump::topology_table(router));
            router.shutdown(now);
            while let Some((_, source, packet)) = router.dequeue_write() {
                let _ = socket.send(source, packet.destination, &packet.data);
            }
            info!("Clean shutdown");
            return Ok(0);
        }

        if router.has_pending_writes() != write_interest {
            write_interest = router.has_pending_writes();
            let interest = if write_interest {
                Interest::READABLE | Interest::WRITABLE
            } else {
                Interest::READABLE
            };
            poll.registry().reregister(&mut SourceFd(&fd), SOCKET, interest)?;
        }

        let timeout = router.timers.next_deadline().map(|deadline| deadline.saturating_duration_since(now));
        if let Err(error) = poll.poll(&mut events, timeout) {
            if error.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(error.into());
        }

        let now = Instant::now();
        for event in events.iter() {
            if event.is_readable() {
                loop {
                    match socket.recv() {
                        Ok(Some(frame)) => {
                            if let Err(error) = router.handle_frame(now, frame.ifindex, frame.source, &frame.payload) {
                                debug!("Dropping packet from {} => {}", frame.source, error);
                            }
                        }
                        Ok(None) => break,
                        Err(error) => {
                            error!("Fatal error reading raw socket => {}", error);
                            return Ok(2);
                        }
                    }
                }
            }
            if event.is_writable() {
                // One packet per write event keeps acks and hellos ahead of bulk data.
                if let Some((ifindex, source, packet)) = router.dequeue_write() {
                    match socket.send(source, packet.destination, &packet.data) {
                        Ok(_) => {}
                        Err(error) if error.kind() == io::ErrorKind::WouldBlock => router.requeue_write(ifindex, packet),
                        Err(error) => warn!("Unable to send packet to {} => {}", packet.destination, error),
                    }
                }
            }
        }
    }
}

fn main() {
    let cli = Cli::parse();
    if let Err(error) = SimpleLogger::new().with_level(cli.log_level).init() {
        println!("Unable to initialize logging => {}", error);
        exit(-1);
    }

    let config = match Config::from_path(&cli.config) {
        Ok(config) => config,
        Err(error) => {
            error!("Unable to load configuration from {} => {}", cli.config.display(), error);
            exit(3);
        }
    };
    let settings = match config.settings() {
        Ok(settings) => settings,
        Err(error) => {
            error!("Invalid configuration => {}", error);
            exit(3);
        }
    };

    let socket = match RawSocket::new() {
        Ok(socket) => socket,
        Err(error) => {
            error!("Unable to initialize the raw socket (CAP_NET_RAW required) => {}", error);
            exit(2);
        }
    };

    if let Err(error) = drop_privileges(config.run_as_uid, config.run_as_gid) {
        error!("Unable to drop privileges => {}", error);
        exit(1);
    }

    unsafe {
        libc::signal(libc::SIGINT, request_shutdown as libc::sighandler_t);
        libc::signal(libc::SIGTERM, request_shutdown as libc::sighandler_t);
    }

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_io().enable_time().build() {
        Ok(runtime) => Rc::new(runtime),
        Err(error) => {
            error!("Unable to initialize the netlink runtime => {}", error);
            exit(2);
        }
    };

    let setup = runtime.block_on(async {
        let table = LinuxRouteTable::new()?;
        let (connection, handle, _) = rtnetlink::new_connection()?;
        tokio::spawn(connection);
        let events = discovery::discover(&handle).await?;
        Ok::<_, anyhow::Error>((table, events))
    });
    let (table, interface_events) = match setup {
        Ok(setup) => setup,
        Err(error) => {
            error!("Unable to talk to the host network stack => {}", error);
            exit(2);
        }
    };

    let mut router = Router::new(settings, NetlinkSink { runtime, table });
    let now = Instant::now();
    let (router_id, requests) = router.update_router_id(now, discovery::router_id_hint(&interface_events));
    match router_id {
        Some(router_id) => info!("EIGRP AS {} starting with router-id {}", router.as_number, router_id),
        None => warn!("No router-id available; links stay out of the routing process until one is known"),
    }
    for request in requests {
        apply_io_request(&socket, request);
    }

    for event in interface_events {
        for request in router.handle_interface_event(now, event) {
            apply_io_request(&socket, request);
        }
    }

    match run(&mut router, &socket) {
        Ok(code) => exit(code),
        Err(error) => {
            error!("Event loop failed => {}", error);
            exit(2);
        }
    }
}
