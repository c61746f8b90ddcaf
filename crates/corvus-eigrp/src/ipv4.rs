//! The IPv4 internal-route TLV (0x0102): a next hop, the metric vector, and a destination prefix packed into the minimum number
//! of octets its length requires.

use crate::{
    metric::EigrpMetrics,
    EigrpElement,
};
use alloc::vec::Vec;
use corvus_common::Prefix;
use nom::{
    bytes::complete::take,
    error::{
        Error,
        ErrorKind,
    },
    number::complete::{
        be_u32,
        be_u8,
    },
    IResult,
};

/// Number of destination octets a prefix of the given length occupies on the wire. At least one octet is always present, so a
/// default route still carries a single zero byte.
pub const fn destination_octets(prefix_length: u8) -> usize {
    1 + (prefix_length.saturating_sub(1) / 8) as usize
}

/// This struct represents the IPv4_INTERNAL TLV carried by UPDATE, QUERY, REPLY and their SIA variants. A next hop of 0.0.0.0
/// tells the receiver to use the packet's IP source address. The destination field is variable length: only the octets covered
/// by the prefix length are emitted.
#[derive(Ord, PartialOrd, Eq, PartialEq, Debug, Hash, Clone, Copy)]
pub struct Ipv4InternalTlv {
    pub next_hop: core::net::Ipv4Addr,
    pub metric: EigrpMetrics,
    pub destination: Prefix,
}

impl EigrpElement for Ipv4InternalTlv {
    fn unpack(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, next_hop) = take(4usize)(input)?;
        let (input, delay) = be_u32(input)?;
        let (input, bandwidth) = be_u32(input)?;
        let (input, mtu) = take(3usize)(input)?;
        let (input, hop_count) = be_u8(input)?;
        let (input, reliability) = be_u8(input)?;
        let (input, load) = be_u8(input)?;
        let (input, tag) = be_u8(input)?;
        let (input, flags) = be_u8(input)?;
        let (input, prefix_length) = be_u8(input)?;
        if prefix_length > 32 {
            return Err(nom::Err::Error(Error::new(input, ErrorKind::Verify)));
        }

        let (input, destination) = take(destination_octets(prefix_length))(input)?;
        let mut octets = [0_u8; 4];
        octets[..destination.len()].copy_from_slice(destination);

        Ok((
            input,
            Self {
                next_hop: core::net::Ipv4Addr::new(next_hop[0], next_hop[1], next_hop[2], next_hop[3]),
                metric: EigrpMetrics {
                    delay,
                    bandwidth,
                    mtu: ((mtu[0] as u32) << 16) | ((mtu[1] as u32) << 8) | mtu[2] as u32,
                    hop_count,
                    reliability,
                    load,
                    tag,
                    flags,
                },
                destination: Prefix::new(core::net::Ipv4Addr::from(octets), prefix_length),
            },
        ))
    }

    fn pack(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(25);
        buffer.extend_from_slice(&self.next_hop.octets());
        buffer.extend_from_slice(&self.metric.delay.to_be_bytes());
        buffer.extend_from_slice(&self.metric.bandwidth.to_be_bytes());
        buffer.extend_from_slice(&self.metric.mtu.to_be_bytes()[1..]);
        buffer.extend_from_slice(&[
            self.metric.hop_count,
            self.metric.reliability,
            self.metric.load,
            self.metric.tag,
            self.metric.flags,
            self.destination.length,
        ]);
        buffer.extend_from_slice(&self.destination.address.octets()[..destination_octets(self.destination.length)]);
        buffer
    }
}
