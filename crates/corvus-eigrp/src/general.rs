//! The general TLVs exchanged inside HELLO packets: metric weights and hold time, software revisions, the conditional-receive
//! listing and peer termination. AUTHENTICATION and PEER_TERMINATION bodies stay opaque to the codec; the former belongs to the
//! keyed-MAC oracle and the latter only matters by its presence.

use crate::{
    metric::KValues,
    EigrpElement,
};
use alloc::vec::Vec;
use core::net::Ipv4Addr;
use nom::{
    bytes::complete::take,
    error::{
        Error,
        ErrorKind,
    },
    multi::many0,
    number::complete::{
        be_u16,
        be_u8,
    },
    IResult,
    Parser,
};

/// This struct represents the PARAMETER TLV (0x0001) sent in every periodic hello. It carries the six metric coefficients and the
/// hold time the receiver should run the adjacency with. K1..K5 must match between two routers for an adjacency to form; a
/// PARAMETER with K1..K5 all 0xFF is the legacy "goodbye" signalling peer termination.
#[derive(Ord, PartialOrd, Eq, PartialEq, Debug, Hash, Clone, Copy)]
pub struct ParameterTlv {
    pub k_values: KValues,
    pub hold_time: u16,
}

impl EigrpElement for ParameterTlv {
    fn unpack(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, k1) = be_u8(input)?;
        let (input, k2) = be_u8(input)?;
        let (input, k3) = be_u8(input)?;
        let (input, k4) = be_u8(input)?;
        let (input, k5) = be_u8(input)?;
        let (input, k6) = be_u8(input)?;
        let (input, hold_time) = be_u16(input)?;
        Ok((
            input,
            Self {
                k_values: KValues { k1, k2, k3, k4, k5, k6 },
                hold_time,
            },
        ))
    }

    fn pack(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(8);
        buffer.extend_from_slice(&[
            self.k_values.k1,
            self.k_values.k2,
            self.k_values.k3,
            self.k_values.k4,
            self.k_values.k5,
            self.k_values.k6,
        ]);
        buffer.extend_from_slice(&self.hold_time.to_be_bytes());
        buffer
    }
}

/// This struct represents the AUTHENTICATION TLV (0x0002). The keyed-MAC frame inside is produced and verified by the
/// authentication oracle; the codec only carries the bytes.
#[derive(Ord, PartialOrd, Eq, PartialEq, Debug, Hash, Clone)]
pub struct AuthenticationTlv {
    pub data: Vec<u8>,
}

impl EigrpElement for AuthenticationTlv {
    fn unpack(input: &[u8]) -> IResult<&[u8], Self> {
        Ok((&[], Self { data: input.to_vec() }))
    }

    fn pack(&self) -> Vec<u8> {
        self.data.clone()
    }
}

/// This struct represents the SEQUENCE TLV (0x0003), the conditional-receive listing: the addresses of the peers that should
/// *not* process the next CONDITIONAL_RECEIVE multicast. Each entry is an address length (always 4 for IPv4) followed by the
/// address itself.
#[derive(Ord, PartialOrd, Eq, PartialEq, Debug, Hash, Clone)]
pub struct SequenceTlv {
    pub addresses: Vec<Ipv4Addr>,
}

fn unpack_sequence_entry(input: &[u8]) -> IResult<&[u8], Ipv4Addr> {
    let (input, addr_length) = be_u8(input)?;
    if addr_length != 4 {
        return Err(nom::Err::Error(Error::new(input, ErrorKind::LengthValue)));
    }
    let (input, addr) = take(4usize)(input)?;
    Ok((input, Ipv4Addr::new(addr[0], addr[1], addr[2], addr[3])))
}

impl EigrpElement for SequenceTlv {
    fn unpack(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, addresses) = many0(unpack_sequence_entry).parse(input)?;
        Ok((input, Self { addresses }))
    }

    fn pack(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(self.addresses.len() * 5);
        for address in &self.addresses {
            buffer.extend_from_slice(&4_u8.to_be_bytes());
            buffer.extend_from_slice(&address.octets());
        }
        buffer
    }
}

/// This struct represents the SW_VERSION TLV (0x0004): two bytes of OS release and two bytes of the EIGRP TLV revision the
/// sender speaks. Retained per neighbor for display purposes only.
#[derive(Ord, PartialOrd, Eq, PartialEq, Debug, Hash, Clone, Copy, Default)]
pub struct SoftwareVersionTlv {
    pub os_major: u8,
    pub os_minor: u8,
    pub eigrp_major: u8,
    pub eigrp_minor: u8,
}

impl EigrpElement for SoftwareVersionTlv {
    fn unpack(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, os_major) = be_u8(input)?;
        let (input, os_minor) = be_u8(input)?;
        let (input, eigrp_major) = be_u8(input)?;
        let (input, eigrp_minor) = be_u8(input)?;
        Ok((
            input,
            Self {
                os_major,
                os_minor,
                eigrp_major,
                eigrp_minor,
            },
        ))
    }

    fn pack(&self) -> Vec<u8> {
        alloc::vec![self.os_major, self.os_minor, self.eigrp_major, self.eigrp_minor]
    }
}

/// This struct represents the PEER_TERMINATION TLV (0x0007), a request to tear down the adjacency with the sender. The body is
/// kept opaque; receiving the TLV at all is the signal.
#[derive(Ord, PartialOrd, Eq, PartialEq, Debug, Hash, Clone, Default)]
pub struct PeerTerminationTlv {
    pub data: Vec<u8>,
}

impl EigrpElement for PeerTerminationTlv {
    fn unpack(input: &[u8]) -> IResult<&[u8], Self> {
        Ok((&[], Self { data: input.to_vec() }))
    }

    fn pack(&self) -> Vec<u8> {
        self.data.clone()
    }
}
