//! Metrics collection for simulation analysis.

use std::collections::BTreeMap;

use grayhole::{NodeId, TelemetryRecord, Timestamp};
use serde::Serialize;

/// The routing tree at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeSnapshot {
    /// When this snapshot was taken.
    pub time: Timestamp,
    /// Preferred parent of every joined non-anchor node.
    pub parents: BTreeMap<NodeId, NodeId>,
    /// Hop count of every joined node.
    pub depths: BTreeMap<NodeId, u16>,
    /// Nodes with no path to the anchor.
    pub detached: Vec<NodeId>,
}

impl TreeSnapshot {
    pub fn new(time: Timestamp) -> Self {
        Self {
            time,
            parents: BTreeMap::new(),
            depths: BTreeMap::new(),
            detached: Vec::new(),
        }
    }

    /// Record a node's place in the tree, `None` when it has no path.
    pub fn record_node(&mut self, node: NodeId, parent: Option<NodeId>, depth: Option<u16>) {
        match depth {
            Some(depth) => {
                self.depths.insert(node, depth);
                if let Some(parent) = parent {
                    self.parents.insert(node, parent);
                }
            }
            None => self.detached.push(node),
        }
    }

    /// Whether every recorded node reaches the anchor.
    pub fn fully_joined(&self) -> bool {
        self.detached.is_empty()
    }

    pub fn max_depth(&self) -> u16 {
        self.depths.values().copied().max().unwrap_or(0)
    }

    /// Whether `via` lies on the path from `node` to the anchor.
    pub fn routes_through(&self, node: NodeId, via: NodeId) -> bool {
        let mut current = node;
        for _ in 0..self.parents.len() {
            match self.parents.get(&current) {
                Some(&parent) if parent == via => return true,
                Some(&parent) => current = parent,
                None => return false,
            }
        }
        false
    }
}

/// Packet counters kept by the simulator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PacketCounters {
    /// Datagrams handed to a transport.
    pub originated: u64,
    /// Single-hop transmissions over a link.
    pub transmissions: u64,
    /// Datagrams delivered to their destination.
    pub delivered: u64,
    /// Transmissions lost to link loss.
    pub lost: u64,
    /// Datagrams discarded by a packet hook.
    pub intercepted: u64,
    /// Datagrams with no next hop or a link that went down.
    pub unroutable: u64,
}

/// Simulation metrics collected over time.
#[derive(Debug, Clone, Default)]
pub struct SimMetrics {
    pub packets: PacketCounters,
    /// Tree snapshots taken at intervals and on request.
    pub snapshots: Vec<TreeSnapshot>,
}

impl SimMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_snapshot(&mut self, snapshot: TreeSnapshot) {
        self.snapshots.push(snapshot);
    }

    pub fn latest_snapshot(&self) -> Option<&TreeSnapshot> {
        self.snapshots.last()
    }
}

/// Result of running a simulation.
#[derive(Debug, Clone)]
pub struct SimulationResult {
    /// Final simulation time.
    pub end_time: Timestamp,
    /// Collected metrics.
    pub metrics: SimMetrics,
    /// Every observation record, in emission order.
    pub log: Vec<TelemetryRecord>,
    /// Whether the run ended because the event queue ran dry.
    pub queue_exhausted: bool,
}

impl SimulationResult {
    /// The log in its textual OBS form, one record per line.
    pub fn log_lines(&self) -> impl Iterator<Item = String> + '_ {
        self.log.iter().map(|r| r.to_string())
    }
}
