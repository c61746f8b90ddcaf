//! Raw-socket plumbing: one IPv4 raw socket per instance with `IP_HDRINCL` set, `IP_PKTINFO` to recover the arrival
//! interface, and multicast membership managed per link. The daemon builds the IP header itself (TTL 1, internetwork-control
//! TOS) and always emits multicast through the specific outgoing interface.

use corvus_eigrp::header::{
    EIGRP_IP_PROTOCOL,
    EIGRP_MULTICAST_ADDRESS,
};
use socket2::{
    Domain,
    InterfaceIndexOrAddress,
    Protocol,
    SockAddr,
    Socket,
    Type,
};
use std::{
    io,
    mem,
    net::{
        Ipv4Addr,
        SocketAddrV4,
    },
    os::fd::{
        AsRawFd,
        RawFd,
    },
};

/// IPTOS_PREC_INTERNETCONTROL.
const TOS_INTERNETCONTROL: u32 = 0xC0;

const IPV4_HEADER_SIZE: usize = 20;

/// Largest frame we accept, IP header included.
pub const MAX_PACKET_SIZE: usize = 65535;

/// A received EIGRP frame with the IP header already stripped.
#[derive(Debug, Clone)]
pub struct ReceivedFrame {
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
    pub ifindex: u32,
    pub payload: Vec<u8>,
}

pub struct RawSocket {
    socket: Socket,
}

impl RawSocket {
    /// Opens and configures the protocol-88 raw socket. Requires CAP_NET_RAW; the caller drops privileges afterwards.
    pub fn new() -> io::Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::from(EIGRP_IP_PROTOCOL as i32)))?;
        socket.set_nonblocking(true)?;
        socket.set_header_included_v4(true)?;
        socket.set_multicast_ttl_v4(1)?;
        socket.set_multicast_loop_v4(false)?;
        socket.set_tos(TOS_INTERNETCONTROL)?;

        // Arrival-interface recovery for the read path.
        let enable: libc::c_int = 1;
        let rc = unsafe {
            libc::setsockopt(
                socket.as_raw_fd(),
                libc::IPPROTO_IP,
                libc::IP_PKTINFO,
                &enable as *const _ as *const libc::c_void,
                mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { socket })
    }

    pub fn raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }

    pub fn join_multicast(&self, ifindex: u32) -> io::Result<()> {
        self.socket
            .join_multicast_v4_n(&EIGRP_MULTICAST_ADDRESS, &InterfaceIndexOrAddress::Index(ifindex))
    }

    pub fn leave_multicast(&self, ifindex: u32) -> io::Result<()> {
        self.socket
            .leave_multicast_v4_n(&EIGRP_MULTICAST_ADDRESS, &InterfaceIndexOrAddress::Index(ifindex))
    }

    /// Raises SO_SNDBUF to at least `bytes`; the kernel may round, shrinking is never attempted.
    pub fn grow_send_buffer(&self, bytes: usize) -> io::Result<()> {
        if self.socket.send_buffer_size()? < bytes {
            self.socket.set_send_buffer_size(bytes)?;
        }
        Ok(())
    }

    /// Emits one EIGRP payload. Multicast destinations are pinned to the outgoing interface via IP_MULTICAST_IF instead of a
    /// routing lookup; unicast relies on the kernel's connected-route selection for the directly attached peer.
    pub fn send(&self, source: Ipv4Addr, destination: Ipv4Addr, payload: &[u8]) -> io::Result<usize> {
        if destination.is_multicast() {
            self.socket.set_multicast_if_v4(&source)?;
        }

        let mut packet = Vec::with_capacity(IPV4_HEADER_SIZE + payload.len());
        packet.extend_from_slice(&build_ipv4_header(source, destination, payload.len()));
        packet.extend_from_slice(payload);

        let address = SockAddr::from(SocketAddrV4::new(destination, 0));
        self.socket.send_to(&packet, &address)
    }

    /// Receives one frame together with its arrival ifindex. Returns `Ok(None)` when the socket would block.
    pub fn recv(&self) -> io::Result<Option<ReceivedFrame>> {
        let mut buffer = vec![0_u8; MAX_PACKET_SIZE + 1];
        let mut control = [0_u8; 64];
        let mut iov = libc::iovec {
            iov_base: buffer.as_mut_ptr() as *mut libc::c_void,
            iov_len: buffer.len(),
        };
        let mut message: libc::msghdr = unsafe { mem::zeroed() };
        message.msg_iov = &mut iov;
        message.msg_iovlen = 1;
        message.msg_control = control.as_mut_ptr() as *mut libc::c_void;
        message.msg_controllen = control.len();

        let received = unsafe { libc::recvmsg(self.socket.as_raw_fd(), &mut message, 0) };
        if received < 0 {
            let error = io::Error::last_os_error();
            return if error.kind() == io::ErrorKind::WouldBlock {
                Ok(None)
            } else {
                Err(error)
            };
        }
        let received = received as usize;
        if received < IPV4_HEADER_SIZE {
            return Ok(None);
        }

        let ifindex = pktinfo_ifindex(&message).unwrap_or(0);

        let header_length = ((buffer[0] & 0x0F) as usize) * 4;
        if header_length < IPV4_HEADER_SIZE || header_length > received {
            return Ok(None);
        }
        let source = Ipv4Addr::new(buffer[12], buffer[13], buffer[14], buffer[15]);
        let destination = Ipv4Addr::new(buffer[16], buffer[17], buffer[18], buffer[19]);

        Ok(Some(ReceivedFrame {
            source,
            destination,
            ifindex,
            payload: buffer[header_length..received].to_vec(),
        }))
    }
}

fn pktinfo_ifindex(message: &libc::msghdr) -> Option<u32> {
    let mut cmsg = unsafe { libc::CMSG_FIRSTHDR(message) };
    while !cmsg.is_null() {
        let header = unsafe { &*cmsg };
        if header.cmsg_level == libc::IPPROTO_IP && header.cmsg_type == libc::IP_PKTINFO {
            let info = unsafe { &*(libc::CMSG_DATA(cmsg) as *const libc::in_pktinfo) };
            return Some(info.ipi_ifindex as u32);
        }
        cmsg = unsafe { libc::CMSG_NXTHDR(message, cmsg) };
    }
    None
}

/// A minimal IPv4 header for IP_HDRINCL. Identification and checksum are left zero for the kernel to fill in.
fn build_ipv4_header(source: Ipv4Addr, destination: Ipv4Addr, payload_length: usize) -> [u8; IPV4_HEADER_SIZE] {
    let total_length = (IPV4_HEADER_SIZE + payload_length) as u16;
    let mut header = [0_u8; IPV4_HEADER_SIZE];
    header[0] = 0x45;
    header[1] = TOS_INTERNETCONTROL as u8;
    header[2..4].copy_from_slice(&total_length.to_be_bytes());
    header[8] = 1; // TTL
    header[9] = EIGRP_IP_PROTOCOL;
    header[12..16].copy_from_slice(&source.octets());
    header[16..20].copy_from_slice(&destination.octets());
    header
}
