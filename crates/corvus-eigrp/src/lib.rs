//! This crate (Corvus project module) implements serialization and deserialization APIs for the Enhanced Interior Gateway Routing
//! Protocol (EIGRP), the distance-vector IGP that exchanges routing information over raw IP protocol 88 and computes loop-free
//! routes with the Diffusing Update Algorithm (DUAL). The crate covers the classic (non-wide) packet format: the 20-byte common
//! header and the TLVs the protocol core consumes.
//!
//! ## TLVs currently implemented
//! | Type   | Name             | Status      |
//! |--------|------------------|-------------|
//! | 0x0001 | PARAMETER        | Implemented |
//! | 0x0002 | AUTHENTICATION   | Opaque      |
//! | 0x0003 | SEQUENCE         | Implemented |
//! | 0x0004 | SW_VERSION       | Implemented |
//! | 0x0005 | NEXT_MCAST_SEQ   | Implemented |
//! | 0x0007 | PEER_TERMINATION | Opaque      |
//! | 0x0102 | IPv4_INTERNAL    | Implemented |
//!
//! Unrecognized TLV types are preserved as [`Tlv::Unknown`] so that a parsed packet re-serializes byte-for-byte.
//!
//! ## References
//! - [RFC 7868 - Cisco's Enhanced Interior Gateway Routing Protocol](https://datatracker.ietf.org/doc/html/rfc7868)
//! - [Wikipedia "Enhanced Interior Gateway Routing Protocol"](https://en.wikipedia.org/wiki/Enhanced_Interior_Gateway_Routing_Protocol)

#![no_std]
extern crate alloc;

pub mod general;
pub mod header;
pub mod ipv4;
pub mod metric;
#[cfg(all(feature = "std", test))] pub mod test;

use crate::{
    general::{
        AuthenticationTlv,
        ParameterTlv,
        PeerTerminationTlv,
        SequenceTlv,
        SoftwareVersionTlv,
    },
    header::EigrpHeader,
    ipv4::Ipv4InternalTlv,
};
use alloc::vec::Vec;
use nom::{
    bytes::complete::take,
    error::{
        Error,
        ErrorKind,
    },
    multi::many0,
    number::complete::{
        be_u16,
        be_u32,
    },
    IResult,
    Parser,
};

pub trait EigrpElement {
    fn unpack(input: &[u8]) -> IResult<&[u8], Self>
    where
        Self: Sized;
    fn pack(&self) -> Vec<u8>;
}

/// This enum is a wrapper around the TLV frames carried after the EIGRP header. Every TLV starts with a type (u16) and a total
/// length (u16, including the four header bytes); a frame whose length field falls below 4 or runs past the end of the packet is a
/// framing error and fails the whole parse. A recognized type whose *body* is malformed degrades to [`Tlv::Unknown`] instead, so
/// one bad TLV does not take down the rest of the packet.
#[derive(Ord, PartialOrd, Eq, PartialEq, Debug, Hash, Clone)]
pub enum Tlv {
    Parameter(ParameterTlv),
    Authentication(AuthenticationTlv),
    Sequence(SequenceTlv),
    SoftwareVersion(SoftwareVersionTlv),
    NextMulticastSequence(u32),
    PeerTermination(PeerTerminationTlv),
    Ipv4Internal(Ipv4InternalTlv),
    Unknown {
        kind: u16,
        data: Vec<u8>,
    },
}

pub const TLV_PARAMETER: u16 = 0x0001;
pub const TLV_AUTHENTICATION: u16 = 0x0002;
pub const TLV_SEQUENCE: u16 = 0x0003;
pub const TLV_SW_VERSION: u16 = 0x0004;
pub const TLV_NEXT_MCAST_SEQ: u16 = 0x0005;
pub const TLV_PEER_TERMINATION: u16 = 0x0007;
pub const TLV_IPV4_INTERNAL: u16 = 0x0102;

impl EigrpElement for Tlv {
    fn unpack(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, kind) = be_u16(input)?;
        let (input, length) = be_u16(input)?;
        if length < 4 {
            return Err(nom::Err::Error(Error::new(input, ErrorKind::LengthValue)));
        }
        let (input, data) = take((length - 4) as usize)(input)?;

        let parsed = match kind {
            TLV_PARAMETER => ParameterTlv::unpack(data).map(|(_, tlv)| Self::Parameter(tlv)),
            TLV_AUTHENTICATION => AuthenticationTlv::unpack(data).map(|(_, tlv)| Self::Authentication(tlv)),
            TLV_SEQUENCE => SequenceTlv::unpack(data).map(|(_, tlv)| Self::Sequence(tlv)),
            TLV_SW_VERSION => SoftwareVersionTlv::unpack(data).map(|(_, tlv)| Self::SoftwareVersion(tlv)),
            TLV_NEXT_MCAST_SEQ => be_u32(data).map(|(_, sequence)| Self::NextMulticastSequence(sequence)),
            TLV_PEER_TERMINATION => PeerTerminationTlv::unpack(data).map(|(_, tlv)| Self::PeerTermination(tlv)),
            TLV_IPV4_INTERNAL => Ipv4InternalTlv::unpack(data).map(|(_, tlv)| Self::Ipv4Internal(tlv)),
            _ => {
                return Ok((
                    input,
                    Self::Unknown {
                        kind,
                        data: data.to_vec(),
                    },
                ))
            }
        };

        Ok((
            input,
            parsed.unwrap_or(Self::Unknown {
                kind,
                data: data.to_vec(),
            }),
        ))
    }

    fn pack(&self) -> Vec<u8> {
        let (kind, body) = match self {
            Self::Parameter(tlv) => (TLV_PARAMETER, tlv.pack()),
            Self::Authentication(tlv) => (TLV_AUTHENTICATION, tlv.pack()),
            Self::Sequence(tlv) => (TLV_SEQUENCE, tlv.pack()),
            Self::SoftwareVersion(tlv) => (TLV_SW_VERSION, tlv.pack()),
            Self::NextMulticastSequence(sequence) => (TLV_NEXT_MCAST_SEQ, sequence.to_be_bytes().to_vec()),
            Self::PeerTermination(tlv) => (TLV_PEER_TERMINATION, tlv.pack()),
            Self::Ipv4Internal(tlv) => (TLV_IPV4_INTERNAL, tlv.pack()),
            Self::Unknown { kind, data } => (*kind, data.clone()),
        };

        let mut buffer = Vec::with_capacity(4 + body.len());
        buffer.extend_from_slice(&kind.to_be_bytes());
        buffer.extend_from_slice(&((body.len() as u16 + 4).to_be_bytes()));
        buffer.extend(body);
        buffer
    }
}

/// This struct represents a complete EIGRP packet, the common header followed by any number of TLVs. [`EigrpPacket::pack`] computes
/// and embeds the checksum; parsing leaves checksum verification to [`verify_checksum`] because it must run over the raw bytes
/// before they are picked apart.
#[derive(Ord, PartialOrd, Eq, PartialEq, Debug, Hash, Clone)]
pub struct EigrpPacket {
    pub header: EigrpHeader,
    pub tlvs: Vec<Tlv>,
}

impl EigrpElement for EigrpPacket {
    fn unpack(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, header) = EigrpHeader::unpack(input)?;
        let (input, tlvs) = many0(Tlv::unpack).parse(input)?;
        // A TLV frame whose length field is bogus leaves trailing bytes behind; that discards the whole packet.
        if !input.is_empty() {
            return Err(nom::Err::Error(Error::new(input, ErrorKind::LengthValue)));
        }
        Ok((input, Self { header, tlvs }))
    }

    fn pack(&self) -> Vec<u8> {
        let mut buffer = self.header.pack();
        for tlv in &self.tlvs {
            buffer.extend(tlv.pack());
        }

        let checksum = checksum(&buffer);
        buffer[2..4].copy_from_slice(&checksum.to_be_bytes());
        buffer
    }
}

/// IP-style 16-bit one's-complement checksum over the whole EIGRP payload. The checksum field itself must be zero while
/// computing; a packet received intact therefore sums to zero under [`verify_checksum`].
pub fn checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);
    for chunk in &mut chunks {
        sum += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
    }
    if let [last] = chunks.remainder() {
        sum += (*last as u32) << 8;
    }
    while (sum >> 16) != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

pub fn verify_checksum(data: &[u8]) -> bool {
    checksum(data) == 0
}
