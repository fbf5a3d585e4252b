//! Discrete event simulator for grayhole experiments.

use std::collections::BinaryHeap;

use grayhole::{
    Duration, ExperimentConfig, LinkAddr, NodeId, PacketInfo, Protocol, TelemetryRecord, TimerKind,
    Timestamp,
};
use hashbrown::HashMap;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, trace};

use crate::error::{SimError, SimResult};
use crate::event::{Event, InFlight, ScenarioAction, ScheduledEvent, SequenceNumber};
use crate::metrics::{SimMetrics, SimulationResult, TreeSnapshot};
use crate::node::{Outgoing, RoutingView, SimNode};
use crate::topology::{RoutingTree, Topology};

/// Hop budget of a single datagram.
pub const MAX_HOPS: u16 = 64;

/// Discrete event simulator for grayhole networks.
///
/// Every node runs the same [`ExperimentConfig`]; roles follow from the
/// node identifiers. Datagrams travel hop by hop along a shortest-hop tree
/// anchored at the configured root, and every hop passes through the
/// relaying node's packet hooks.
pub struct Simulator {
    nodes: HashMap<NodeId, SimNode>,
    config: ExperimentConfig,
    topology: Topology,
    tree: RoutingTree,
    current_time: Timestamp,
    event_queue: BinaryHeap<ScheduledEvent>,
    metrics: SimMetrics,
    log: Vec<TelemetryRecord>,
    next_seq: u64,
    seed: u64,
    /// Link-loss draws.
    rng: ChaCha8Rng,
    snapshot_interval: Option<Duration>,
    next_snapshot: Option<Timestamp>,
}

impl Simulator {
    pub fn new(seed: u64, config: ExperimentConfig) -> Self {
        Self {
            nodes: HashMap::new(),
            config,
            topology: Topology::new(),
            tree: RoutingTree::compute(&Topology::new(), &[], config.root_id),
            current_time: Timestamp::ZERO,
            event_queue: BinaryHeap::new(),
            metrics: SimMetrics::new(),
            log: Vec::new(),
            next_seq: 0,
            seed,
            rng: ChaCha8Rng::seed_from_u64(seed),
            snapshot_interval: None,
            next_snapshot: None,
        }
    }

    pub fn with_topology(mut self, topology: Topology) -> Self {
        self.topology = topology;
        self.refresh_routing();
        self
    }

    /// Record the tree automatically every `interval`.
    pub fn with_snapshot_interval(mut self, interval: Duration) -> Self {
        if !interval.is_zero() {
            self.snapshot_interval = Some(interval);
            self.next_snapshot = Some(self.current_time + interval);
        }
        self
    }

    /// Add and start node `id`.
    ///
    /// The node joins the current tree before it starts, so the anchor logs
    /// ROOT first and every timer is scheduled from its armed deadline.
    pub fn add_node(&mut self, id: NodeId) -> SimResult<NodeId> {
        if self.nodes.contains_key(&id) {
            return Err(SimError::Scenario(format!("duplicate node id {id}")));
        }
        let node_seed = self.seed.wrapping_add(u64::from(id).wrapping_mul(1000));
        let node = SimNode::new(id, node_seed, self.config, self.current_time)?;
        debug!(node = id, role = %node.role(), "adding node");
        self.nodes.insert(id, node);
        self.refresh_routing();

        let now = self.current_time;
        let mut deadlines = Vec::new();
        if let Some(node) = self.nodes.get_mut(&id) {
            node.start(now);
            deadlines.extend(
                TimerKind::ALL
                    .into_iter()
                    .filter_map(|timer| node.deadline(timer).map(|at| (timer, at))),
            );
        }
        for (timer, at) in deadlines {
            self.schedule(at, Event::TimerFire { node: id, timer });
        }
        self.collect(id);
        Ok(id)
    }

    pub fn node(&self, id: NodeId) -> Option<&SimNode> {
        self.nodes.get(&id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut SimNode> {
        self.nodes.get_mut(&id)
    }

    /// All node ids in ascending order.
    pub fn node_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.nodes.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    pub fn current_time(&self) -> Timestamp {
        self.current_time
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Mutable topology. Call [`refresh_routing`](Self::refresh_routing)
    /// afterwards so nodes see the change.
    pub fn topology_mut(&mut self) -> &mut Topology {
        &mut self.topology
    }

    pub fn tree(&self) -> &RoutingTree {
        &self.tree
    }

    pub fn metrics(&self) -> &SimMetrics {
        &self.metrics
    }

    /// Observation records collected so far, in emission order.
    pub fn log(&self) -> &[TelemetryRecord] {
        &self.log
    }

    pub fn schedule(&mut self, time: Timestamp, event: Event) {
        let seq = SequenceNumber::new(self.next_seq);
        self.next_seq += 1;
        self.event_queue.push(ScheduledEvent::new(time, seq, event));
    }

    pub fn schedule_action(&mut self, time: Timestamp, action: ScenarioAction) {
        self.schedule(time, Event::ScenarioAction(action));
    }

    /// Recompute the routing tree and push each node's place in it.
    pub fn refresh_routing(&mut self) {
        let ids = self.node_ids();
        self.tree = RoutingTree::compute(&self.topology, &ids, self.config.root_id);
        let root = self.tree.root();
        for (&id, node) in self.nodes.iter_mut() {
            let joined = self.tree.contains(id);
            node.set_routing(RoutingView {
                joined,
                anchor: joined.then_some(root),
                parent: self.tree.parent(id).zip(self.tree.rank(id)),
            });
        }
        trace!(members = self.tree.len(), "routing tree recomputed");
    }

    /// Run simulation until the specified time.
    pub fn run_until(&mut self, end_time: Timestamp) -> SimulationResult {
        while self
            .event_queue
            .peek()
            .is_some_and(|event| event.time <= end_time)
        {
            let Some(event) = self.event_queue.pop() else {
                break;
            };
            self.advance_time(event.time);
            self.process_event(event.event);
            self.maybe_take_snapshot();
        }

        self.advance_time(end_time);
        self.take_snapshot();

        let packets = &self.metrics.packets;
        info!(
            end_ms = self.current_time.as_millis(),
            records = self.log.len(),
            originated = packets.originated,
            delivered = packets.delivered,
            intercepted = packets.intercepted,
            lost = packets.lost,
            "simulation finished"
        );

        SimulationResult {
            end_time: self.current_time,
            metrics: self.metrics.clone(),
            log: self.log.clone(),
            queue_exhausted: self.event_queue.is_empty(),
        }
    }

    pub fn run_for(&mut self, duration: Duration) -> SimulationResult {
        self.run_until(self.current_time + duration)
    }

    fn advance_time(&mut self, time: Timestamp) {
        if time > self.current_time {
            self.current_time = time;
        }
    }

    fn process_event(&mut self, event: Event) {
        match event {
            Event::TimerFire { node, timer } => self.fire_timer(node, timer),
            Event::PacketArrival { at, packet } => self.arrive(at, packet),
            Event::ScenarioAction(action) => self.execute_action(action),
        }
    }

    /// Fire one timer and schedule its rearmed deadline.
    fn fire_timer(&mut self, node_id: NodeId, timer: TimerKind) {
        let now = self.current_time;
        let next = match self.nodes.get_mut(&node_id) {
            Some(node) => {
                node.fire_timer(timer, now);
                node.deadline(timer)
            }
            None => return,
        };
        trace!(node = node_id, timer = timer.as_str(), "timer fired");
        if let Some(at) = next {
            self.schedule(at, Event::TimerFire { node: node_id, timer });
        }
        self.collect(node_id);
    }

    /// Move a node's pending records into the log and route its outbox.
    fn collect(&mut self, node_id: NodeId) {
        let outgoing = match self.nodes.get_mut(&node_id) {
            Some(node) => {
                self.log.extend(node.take_records());
                node.take_outgoing()
            }
            None => return,
        };
        for datagram in outgoing {
            self.originate(node_id, datagram);
        }
    }

    fn collect_records(&mut self, node_id: NodeId) {
        if let Some(node) = self.nodes.get_mut(&node_id) {
            self.log.extend(node.take_records());
        }
    }

    /// Inject a datagram at its origin, through the origin's outbound hook.
    fn originate(&mut self, origin: NodeId, datagram: Outgoing) {
        self.metrics.packets.originated += 1;
        let now = self.current_time;
        let packet = InFlight {
            info: PacketInfo {
                protocol: Protocol::Udp,
                src: LinkAddr::from_node_id(origin),
                dst: datagram.dst,
                dst_port: datagram.port,
            },
            payload: datagram.payload,
            hops: 0,
        };

        let verdict = match self.nodes.get_mut(&origin) {
            Some(node) => node.packet_out(&packet.info, now),
            None => return,
        };
        self.collect_records(origin);
        if verdict.is_drop() {
            self.metrics.packets.intercepted += 1;
            return;
        }
        self.forward(origin, packet);
    }

    /// Transmit a datagram one hop along the tree.
    fn forward(&mut self, from: NodeId, mut packet: InFlight) {
        let dst = packet.info.dst.node_id();
        if packet.hops >= MAX_HOPS {
            debug!(from, dst, "hop budget exhausted");
            self.metrics.packets.unroutable += 1;
            return;
        }
        let Some(next) = self.tree.next_hop(from, dst) else {
            debug!(from, dst, "no next hop");
            self.metrics.packets.unroutable += 1;
            return;
        };
        let (loss_rate, delay) = match self.topology.get_link(from, next) {
            Some(link) if link.active => (link.loss_rate, link.delay),
            _ => {
                self.metrics.packets.unroutable += 1;
                return;
            }
        };

        self.metrics.packets.transmissions += 1;
        if loss_rate > 0.0 && self.rng.gen::<f64>() < loss_rate {
            trace!(from, to = next, "lost on link");
            self.metrics.packets.lost += 1;
            return;
        }

        packet.hops += 1;
        let at = self.current_time + delay;
        self.schedule(at, Event::PacketArrival { at: next, packet });
    }

    /// A datagram reached `at`: inbound hook, then delivery or relay.
    fn arrive(&mut self, at: NodeId, packet: InFlight) {
        let now = self.current_time;
        let inbound = match self.nodes.get_mut(&at) {
            Some(node) => node.packet_in(&packet.info, now),
            None => {
                self.metrics.packets.unroutable += 1;
                return;
            }
        };
        self.collect_records(at);
        if inbound.is_drop() {
            self.metrics.packets.intercepted += 1;
            return;
        }

        if packet.info.dst.node_id() == at {
            self.metrics.packets.delivered += 1;
            if packet.info.dst_port == self.config.data_port {
                if let Some(node) = self.nodes.get_mut(&at) {
                    node.deliver(&packet.payload, now);
                }
            }
            self.collect(at);
            return;
        }

        let outbound = match self.nodes.get_mut(&at) {
            Some(node) => node.packet_out(&packet.info, now),
            None => return,
        };
        self.collect_records(at);
        if outbound.is_drop() {
            self.metrics.packets.intercepted += 1;
            return;
        }
        self.forward(at, packet);
    }

    fn execute_action(&mut self, action: ScenarioAction) {
        debug!(?action, now_ms = self.current_time.as_millis(), "scenario action");
        let refresh = action.changes_topology();
        match action {
            ScenarioAction::Partition { groups } => {
                self.topology.partition(&groups);
            }
            ScenarioAction::HealPartition => {
                self.topology.heal();
            }
            ScenarioAction::DisableLink { from, to } => {
                if let Some(link) = self.topology.get_link_mut(from, to) {
                    link.active = false;
                }
            }
            ScenarioAction::EnableLink { from, to } => {
                if let Some(link) = self.topology.get_link_mut(from, to) {
                    link.active = true;
                }
            }
            ScenarioAction::SetLossRate { from, to, rate } => {
                if let Some(link) = self.topology.get_link_mut(from, to) {
                    link.loss_rate = rate.clamp(0.0, 1.0);
                }
            }
            ScenarioAction::TakeSnapshot => {
                self.take_snapshot();
            }
        }
        if refresh {
            self.refresh_routing();
        }
    }

    fn maybe_take_snapshot(&mut self) {
        if let (Some(next), Some(interval)) = (self.next_snapshot, self.snapshot_interval) {
            if self.current_time >= next {
                self.take_snapshot();
                self.next_snapshot = Some(next + interval);
            }
        }
    }

    /// Record the current tree.
    pub fn take_snapshot(&mut self) {
        let mut snapshot = TreeSnapshot::new(self.current_time);
        for id in self.node_ids() {
            snapshot.record_node(id, self.tree.parent(id), self.tree.depth(id));
        }
        self.metrics.add_snapshot(snapshot);
    }
}
