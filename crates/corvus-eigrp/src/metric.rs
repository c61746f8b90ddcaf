//! The classic five-tuple metric and its algebra: scaling a received vector across the incoming link and collapsing it into the
//! 32-bit composite distance DUAL compares.

/// Composite distance ceiling. A delay of this value marks a route as unreachable and poisons any composition it takes part in.
pub const EIGRP_MAX_METRIC: u32 = 0xFFFF_FFFF;

/// This struct contains the six metric coefficients. The defaults (K1=K3=1, rest 0) reduce the composite formula to scaled
/// bandwidth plus scaled delay. K6 is reserved for the wide-metric format and never participates in neighborship checks.
#[derive(Ord, PartialOrd, Eq, PartialEq, Debug, Hash, Clone, Copy)]
pub struct KValues {
    pub k1: u8,
    pub k2: u8,
    pub k3: u8,
    pub k4: u8,
    pub k5: u8,
    pub k6: u8,
}

impl Default for KValues {
    fn default() -> Self {
        Self {
            k1: 1,
            k2: 0,
            k3: 1,
            k4: 0,
            k5: 0,
            k6: 0,
        }
    }
}

impl KValues {
    /// Byte-wise K1..K5 comparison used by the neighbor state machine. K6 is excluded on purpose.
    pub fn matches(&self, other: &KValues) -> bool {
        self.k1 == other.k1 && self.k2 == other.k2 && self.k3 == other.k3 && self.k4 == other.k4 && self.k5 == other.k5
    }

    /// K1..K5 all 0xFF is the legacy goodbye message inside a PARAMETER TLV.
    pub fn is_goodbye(&self) -> bool {
        self.k1 == 0xFF && self.k2 == 0xFF && self.k3 == 0xFF && self.k4 == 0xFF && self.k5 == 0xFF
    }

    /// Collapses a metric vector into the composite distance:
    ///
    /// `(K1*bw + (K2*bw)/(256-load) + K3*delay) * (K5/(reliability+K4))`
    ///
    /// where `bw = 10^7 * 256 / bandwidth_kbps` and `delay = delay_units * 256`. The trailing multiplier only applies when K5 is
    /// nonzero. The result saturates at [`EIGRP_MAX_METRIC`], and an unreachable delay short-circuits to it.
    pub fn composite(&self, metric: &EigrpMetrics) -> u32 {
        if metric.delay == EIGRP_MAX_METRIC {
            return EIGRP_MAX_METRIC;
        }

        let scaled_bandwidth = if metric.bandwidth == 0 {
            return EIGRP_MAX_METRIC;
        } else {
            10_000_000_u64 * 256 / metric.bandwidth as u64
        };
        let scaled_delay = metric.delay as u64 * 256;

        let mut distance = self.k1 as u64 * scaled_bandwidth + self.k3 as u64 * scaled_delay;
        if self.k2 != 0 {
            distance += self.k2 as u64 * scaled_bandwidth / (256 - metric.load as u64);
        }
        if self.k5 != 0 {
            let divisor = metric.reliability as u64 + self.k4 as u64;
            if divisor == 0 {
                return EIGRP_MAX_METRIC;
            }
            distance = distance * self.k5 as u64 / divisor;
        }
        distance.min(EIGRP_MAX_METRIC as u64) as u32
    }
}

/// This struct represents the metric vector carried in route TLVs. Delay is in tens of microseconds times the hop scaling,
/// bandwidth in kbit/s, and the MTU occupies three bytes on the wire.
#[derive(Ord, PartialOrd, Eq, PartialEq, Debug, Hash, Clone, Copy)]
pub struct EigrpMetrics {
    pub delay: u32,
    pub bandwidth: u32,
    pub mtu: u32,
    pub hop_count: u8,
    pub reliability: u8,
    pub load: u8,
    pub tag: u8,
    pub flags: u8,
}

impl EigrpMetrics {
    /// A vector that advertises the destination as unreachable.
    pub const UNREACHABLE: EigrpMetrics = EigrpMetrics {
        delay: EIGRP_MAX_METRIC,
        bandwidth: 0,
        mtu: 0,
        hop_count: 0,
        reliability: 0,
        load: 0,
        tag: 0,
        flags: 0,
    };

    pub fn is_unreachable(&self) -> bool {
        self.delay == EIGRP_MAX_METRIC
    }

    /// Folds the egress link into a received vector: bandwidth clamps to the slowest hop, delays add, MTU clamps to the smallest
    /// hop and the hop count grows by one. An unreachable vector passes through unchanged so poisoning survives composition.
    pub fn across_link(mut self, link_bandwidth: u32, link_delay: u32, link_mtu: u32) -> Self {
        if self.is_unreachable() {
            return self;
        }
        self.bandwidth = self.bandwidth.min(link_bandwidth);
        self.delay = self.delay.saturating_add(link_delay);
        self.mtu = self.mtu.min(link_mtu);
        self.hop_count = self.hop_count.saturating_add(1);
        self
    }
}
