use std::net::Ipv4Addr;
use thiserror::Error;

/// Reasons a received frame is dropped before it reaches a protocol handler. Each maps to a per-interface drop counter; none of
/// them mutate neighbor state.
#[derive(Debug, Error, Eq, PartialEq, Clone, Copy)]
pub enum PacketError {
    #[error("Malformed packet")]
    Malformed,
    #[error("Checksum verification failed")]
    BadChecksum,
    #[error("Unsupported protocol version {0}")]
    VersionMismatch(u8),
    #[error("Packet for autonomous system {0}, we serve {1}")]
    AsMismatch(u16, u16),
    #[error("Authentication failed")]
    AuthFailed,
    #[error("Non-hello packet from unknown neighbor {0}")]
    NoSuchNeighbor(Ipv4Addr),
    #[error("Source {0} is outside the interface subnet")]
    WrongSubnet(Ipv4Addr),
    #[error("Received on a passive interface")]
    PassiveInterface,
}

/// Why an adjacency was torn down. Carried into the neighbor-down path for logging and so tests can assert on the trigger.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum DownReason {
    HoldDownExpiry,
    KValueMismatch,
    PeerTermination,
    RetransmitExhausted,
    StuckInActive,
    InterfaceDown,
    Cleared,
}

impl std::fmt::Display for DownReason {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(match self {
            Self::HoldDownExpiry => "holding time expired",
            Self::KValueMismatch => "K-value mismatch",
            Self::PeerTermination => "peer termination received",
            Self::RetransmitExhausted => "retry limit exceeded",
            Self::StuckInActive => "stuck in active",
            Self::InterfaceDown => "interface down",
            Self::Cleared => "manually cleared",
        })
    }
}
