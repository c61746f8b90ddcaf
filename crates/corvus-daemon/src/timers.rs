//! Deadline bookkeeping for the cooperative loop: a binary min-heap of absolute deadlines with lazy cancellation. Cancelled
//! handles stay in the heap and are skipped on pop, which keeps cancellation O(1) without touching the heap structure.

use corvus_common::Prefix;
use std::{
    cmp::Reverse,
    collections::{
        BinaryHeap,
        HashMap,
    },
    net::Ipv4Addr,
    time::Instant,
};

use crate::interface::InterfaceId;

/// Which reliable FIFO of a neighbor a retransmit timer belongs to.
#[derive(Debug, Eq, PartialEq, Hash, Clone, Copy)]
pub enum Channel {
    Reliable,
    Multicast,
}

/// The holder and meaning of a pending timer. The engine matches on this when a deadline fires.
#[derive(Debug, Eq, PartialEq, Hash, Clone, Copy)]
pub enum TimerKind {
    /// Periodic hello emission on an interface.
    Hello(InterfaceId),
    /// Neighbor hold-down; expiry tears the adjacency down.
    HoldDown(InterfaceId, Ipv4Addr),
    /// Retransmission of the tail packet of one of a neighbor's FIFOs.
    Retransmit(InterfaceId, Ipv4Addr, Channel),
    /// Full active-timer budget of a diffusing computation.
    Active(Prefix),
    /// Half-budget probe point for stuck-in-active handling.
    SiaProbe(Prefix),
}

#[derive(Debug, Eq, PartialEq, Hash, Clone, Copy, PartialOrd, Ord)]
pub struct TimerId(u64);

pub struct TimerWheel {
    heap: BinaryHeap<Reverse<(Instant, TimerId)>>,
    pending: HashMap<TimerId, TimerKind>,
    next_id: u64,
}

impl TimerWheel {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            pending: HashMap::new(),
            next_id: 0,
        }
    }

    /// Arms a timer at an absolute deadline and returns the handle its holder keeps for cancellation.
    pub fn schedule(&mut self, deadline: Instant, kind: TimerKind) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.pending.insert(id, kind);
        self.heap.push(Reverse((deadline, id)));
        id
    }

    /// Disarms a timer. Cancelling a handle that already fired (or was cancelled before) is a no-op.
    pub fn cancel(&mut self, id: TimerId) {
        self.pending.remove(&id);
        if self.pending.is_empty() {
            self.heap.clear();
        }
    }

    /// The earliest live deadline, used to bound the poll timeout.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(Reverse((deadline, id))) = self.heap.peek().copied() {
            if self.pending.contains_key(&id) {
                return Some(deadline);
            }
            self.heap.pop();
        }
        None
    }

    /// Pops the next timer whose deadline has passed. Returns one timer at a time so packet events interleave between firings.
    pub fn pop_expired(&mut self, now: Instant) -> Option<TimerKind> {
        while let Some(Reverse((deadline, id))) = self.heap.peek().copied() {
            if deadline > now {
                return None;
            }
            self.heap.pop();
            if let Some(kind) = self.pending.remove(&id) {
                return Some(kind);
            }
        }
        None
    }

    #[cfg(test)]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn fires_in_deadline_order() {
        let mut wheel = TimerWheel::new();
        let start = Instant::now();
        wheel.schedule(start + Duration::from_secs(5), TimerKind::Hello(1));
        wheel.schedule(start + Duration::from_secs(1), TimerKind::Hello(0));

        assert_eq!(wheel.next_deadline(), Some(start + Duration::from_secs(1)));
        assert_eq!(wheel.pop_expired(start + Duration::from_secs(2)), Some(TimerKind::Hello(0)));
        assert_eq!(wheel.pop_expired(start + Duration::from_secs(2)), None);
        assert_eq!(wheel.pop_expired(start + Duration::from_secs(6)), Some(TimerKind::Hello(1)));
    }

    #[test]
    fn cancelled_timers_are_skipped() {
        let mut wheel = TimerWheel::new();
        let start = Instant::now();
        let id = wheel.schedule(start + Duration::from_secs(1), TimerKind::Hello(0));
        wheel.schedule(start + Duration::from_secs(2), TimerKind::Hello(1));

        wheel.cancel(id);
        // Cancelling twice is a no-op.
        wheel.cancel(id);

        assert_eq!(wheel.next_deadline(), Some(start + Duration::from_secs(2)));
        assert_eq!(wheel.pop_expired(start + Duration::from_secs(3)), Some(TimerKind::Hello(1)));
        assert_eq!(wheel.pending_count(), 0);
    }
}
