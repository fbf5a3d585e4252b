//! Simulator events and their queue ordering.

use std::cmp::Ordering;

use grayhole::{NodeId, PacketInfo, TimerKind, Timestamp};

/// Insertion counter breaking ties between events due at the same instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SequenceNumber(u64);

impl SequenceNumber {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

/// Topology changes and bookkeeping a scenario schedules ahead of time.
///
/// Every action except [`TakeSnapshot`](ScenarioAction::TakeSnapshot)
/// changes the topology, after which the routing tree is recomputed.
#[derive(Debug, Clone, PartialEq)]
pub enum ScenarioAction {
    /// Cut every link between nodes of different groups.
    Partition { groups: Vec<Vec<NodeId>> },
    /// Heal all partitions (restore every link).
    HealPartition,
    /// Take one link down.
    DisableLink { from: NodeId, to: NodeId },
    /// Bring one link back up.
    EnableLink { from: NodeId, to: NodeId },
    /// Change the loss probability of one link.
    SetLossRate { from: NodeId, to: NodeId, rate: f64 },
    /// Record the current routing tree.
    TakeSnapshot,
}

impl ScenarioAction {
    /// Whether executing this action can change the routing tree.
    pub fn changes_topology(&self) -> bool {
        !matches!(self, ScenarioAction::TakeSnapshot)
    }
}

/// A datagram travelling hop by hop through the mesh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InFlight {
    /// Header fields seen by the packet hooks.
    pub info: PacketInfo,
    /// Application payload.
    pub payload: Vec<u8>,
    /// Hops taken so far.
    pub hops: u16,
}

/// Something that happens at a simulated instant.
#[derive(Debug, Clone)]
pub enum Event {
    /// A node timer reached its deadline.
    TimerFire { node: NodeId, timer: TimerKind },
    /// A datagram arrived at node `at` over a link.
    PacketArrival { at: NodeId, packet: InFlight },
    /// Apply a scheduled scenario action.
    ScenarioAction(ScenarioAction),
}

/// An event in the queue, ordered by `(time, seq)` with the earliest first.
#[derive(Debug, Clone)]
pub struct ScheduledEvent {
    /// Simulated time at which it fires.
    pub time: Timestamp,
    /// Tie breaker, assigned in scheduling order.
    pub seq: SequenceNumber,
    /// Payload.
    pub event: Event,
}

impl ScheduledEvent {
    pub fn new(time: Timestamp, seq: SequenceNumber, event: Event) -> Self {
        Self { time, seq, event }
    }
}

// BinaryHeap is a max-heap; ordering is reversed to pop the earliest event.
impl PartialEq for ScheduledEvent {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.seq == other.seq
    }
}

impl Eq for ScheduledEvent {}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}
