//! The 20-byte common header every EIGRP packet starts with, together with the opcode and header-flag definitions shared by the
//! daemon and the codec.

use crate::EigrpElement;
use alloc::vec::Vec;
use bitflags::bitflags;
use corvus_common::value_enum;
use core::net::Ipv4Addr;
use nom::{
    number::complete::{
        be_u16,
        be_u32,
        be_u8,
    },
    IResult,
};

/// Protocol version carried in the first header byte. Only version 2 is on the wire today.
pub const EIGRP_VERSION: u8 = 2;

/// Size of the common header in bytes.
pub const EIGRP_HEADER_SIZE: usize = 20;

/// IP protocol number EIGRP runs on.
pub const EIGRP_IP_PROTOCOL: u8 = 88;

/// All-EIGRP-routers multicast group.
pub const EIGRP_MULTICAST_ADDRESS: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 10);

value_enum! {
    /// The opcode stored in the second byte of the header, selecting how the TLV payload is interpreted.
    #[derive(Ord, PartialOrd, Eq, PartialEq, Debug, Hash, Clone, Copy)]
    pub enum Opcode(u8) {
        Update = 1,
        Request = 2,
        Query = 3,
        Reply = 4,
        Hello = 5,
        Probe = 7,
        SiaQuery = 10,
        SiaReply = 11
    }
}

bitflags! {
    /// This structure contains the flags of the EIGRP common header.
    #[derive(Clone, Debug, Ord, PartialOrd, Eq, PartialEq, Hash, Copy, Default)]
    pub struct HeaderFlags: u32 {
        /// Set on the first UPDATE of an adjacency; asks the peer to send its full table.
        const INIT = 0x0000_0001;

        /// Conditional receive: the packet is only for peers listed in a preceding SEQUENCE TLV.
        const CONDITIONAL_RECEIVE = 0x0000_0002;

        /// The sender restarted and is re-synchronizing.
        const RESTART = 0x0000_0004;

        /// End of table: terminates the initial full-table UPDATE burst.
        const END_OF_TABLE = 0x0000_0008;
    }
}

/// This struct represents the EIGRP common header. The routerID field is unused in the classic packet profile and is emitted as
/// zero; sequence and ack carry the reliable-transport numbering and checksum covers the whole packet including the TLVs.
#[derive(Ord, PartialOrd, Eq, PartialEq, Debug, Hash, Clone, Copy)]
pub struct EigrpHeader {
    pub version: u8,
    pub opcode: Opcode,
    pub checksum: u16,
    pub flags: HeaderFlags,
    pub sequence: u32,
    pub ack: u32,
    pub router_id: u16,
    pub as_number: u16,
}

impl EigrpHeader {
    pub fn new(opcode: Opcode, flags: HeaderFlags, sequence: u32, ack: u32, as_number: u16) -> Self {
        Self {
            version: EIGRP_VERSION,
            opcode,
            checksum: 0,
            flags,
            sequence,
            ack,
            router_id: 0,
            as_number,
        }
    }
}

impl EigrpElement for EigrpHeader {
    fn unpack(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, version) = be_u8(input)?;
        let (input, opcode) = be_u8(input)?;
        let (input, checksum) = be_u16(input)?;
        let (input, flags) = be_u32(input)?;
        let (input, sequence) = be_u32(input)?;
        let (input, ack) = be_u32(input)?;
        let (input, router_id) = be_u16(input)?;
        let (input, as_number) = be_u16(input)?;
        Ok((
            input,
            Self {
                version,
                opcode: Opcode::from(opcode),
                checksum,
                flags: HeaderFlags::from_bits_retain(flags),
                sequence,
                ack,
                router_id,
                as_number,
            },
        ))
    }

    fn pack(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(EIGRP_HEADER_SIZE);
        buffer.extend_from_slice(&self.version.to_be_bytes());
        buffer.extend_from_slice(&u8::from(self.opcode).to_be_bytes());
        buffer.extend_from_slice(&self.checksum.to_be_bytes());
        buffer.extend_from_slice(&self.flags.bits().to_be_bytes());
        buffer.extend_from_slice(&self.sequence.to_be_bytes());
        buffer.extend_from_slice(&self.ack.to_be_bytes());
        buffer.extend_from_slice(&self.router_id.to_be_bytes());
        buffer.extend_from_slice(&self.as_number.to_be_bytes());
        buffer
    }
}
