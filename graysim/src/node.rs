//! Simulated collaborators and the SimNode wrapper.
//!
//! Each [`SimNode`] owns one `grayhole` engine wired to in-memory
//! collaborators. The simulator drives the engine by calling its handlers
//! directly instead of the async run loop, and pushes routing state in from
//! the topology after every change.

use std::cell::Cell;
use std::future::{ready, Ready};

use grayhole::{
    Clock, ConfigError, EventKind, ExperimentConfig, LinkAddr, Node, NodeEvent, NodeId,
    PacketHooks, PacketInfo, Random, Rank, Role, SendError, TelemetryRecord, TelemetrySink,
    TimerKind, Timestamp, Transport, Verdict,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::trace;

/// Simulation clock, set by the simulator before every handler call.
#[derive(Debug, Default)]
pub struct SimClock {
    current: Cell<Timestamp>,
}

impl SimClock {
    pub fn new(now: Timestamp) -> Self {
        Self {
            current: Cell::new(now),
        }
    }

    pub fn set(&self, time: Timestamp) {
        self.current.set(time);
    }
}

impl Clock for SimClock {
    type SleepFuture<'a> = Ready<()>;

    fn now(&self) -> Timestamp {
        self.current.get()
    }

    fn sleep_until(&self, _time: Timestamp) -> Self::SleepFuture<'_> {
        // The event queue decides when the node next runs.
        ready(())
    }
}

/// Per-node ChaCha8 stream.
pub struct SimRandom {
    rng: ChaCha8Rng,
}

impl SimRandom {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }
}

impl Random for SimRandom {
    fn gen_range(&mut self, min: u64, max: u64) -> u64 {
        if max <= min {
            return min;
        }
        self.rng.gen_range(min..max)
    }
}

/// Routing state of one node as derived from the simulator's tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoutingView {
    pub joined: bool,
    pub anchor: Option<NodeId>,
    pub parent: Option<(NodeId, Rank)>,
}

/// Routing collaborator whose state is pushed by the simulator.
#[derive(Debug, Default)]
pub struct SimRouting {
    view: RoutingView,
    anchor_started: bool,
}

impl SimRouting {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, view: RoutingView) {
        self.view = view;
    }

    pub fn view(&self) -> RoutingView {
        self.view
    }

    /// Whether the engine asked to anchor a tree.
    pub fn anchor_started(&self) -> bool {
        self.anchor_started
    }
}

impl grayhole::Routing for SimRouting {
    fn has_joined(&self) -> bool {
        self.view.joined
    }

    fn anchor_address(&self) -> Option<LinkAddr> {
        self.view.anchor.map(LinkAddr::from_node_id)
    }

    fn start_as_anchor(&mut self) {
        self.anchor_started = true;
    }

    fn preferred_parent(&self) -> Option<(NodeId, Rank)> {
        self.view.parent
    }
}

/// A datagram handed to the transport, waiting to be routed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outgoing {
    pub payload: Vec<u8>,
    pub dst: LinkAddr,
    pub port: u16,
}

/// Outbox transport. Refuses sends while the node has no uplink.
#[derive(Debug)]
pub struct SimTransport {
    local: LinkAddr,
    uplink: bool,
    outbox: Vec<Outgoing>,
}

impl SimTransport {
    pub fn new(id: NodeId) -> Self {
        Self {
            local: LinkAddr::from_node_id(id),
            uplink: false,
            outbox: Vec::new(),
        }
    }

    pub fn set_uplink(&mut self, uplink: bool) {
        self.uplink = uplink;
    }

    pub fn take_outgoing(&mut self) -> Vec<Outgoing> {
        std::mem::take(&mut self.outbox)
    }
}

impl Transport for SimTransport {
    fn local_addr(&self) -> LinkAddr {
        self.local
    }

    fn send_datagram(&mut self, payload: &[u8], dst: LinkAddr, port: u16) -> Result<(), SendError> {
        if !self.uplink && !self.is_local_addr(&dst) {
            return Err(SendError::NoRoute);
        }
        self.outbox.push(Outgoing {
            payload: payload.to_vec(),
            dst,
            port,
        });
        Ok(())
    }
}

/// Telemetry sink buffering records until the simulator collects them.
#[derive(Debug, Default)]
pub struct SimSink {
    pending: Vec<TelemetryRecord>,
}

impl SimSink {
    pub fn take(&mut self) -> Vec<TelemetryRecord> {
        std::mem::take(&mut self.pending)
    }
}

impl TelemetrySink for SimSink {
    fn emit(&mut self, record: TelemetryRecord) {
        trace!(target: "graysim::obs", "{record}");
        self.pending.push(record);
    }
}

/// The engine type every simulated node runs.
pub type EngineNode = Node<SimTransport, SimRouting, SimRandom, SimClock, SimSink>;

/// A simulated node wrapping a grayhole engine.
pub struct SimNode {
    inner: EngineNode,
    created_at: Timestamp,
}

impl SimNode {
    /// Build a node with identifier `id` whose random stream is seeded by `seed`.
    pub fn new(
        id: NodeId,
        seed: u64,
        config: ExperimentConfig,
        now: Timestamp,
    ) -> Result<Self, ConfigError> {
        let inner = Node::new(
            SimTransport::new(id),
            SimRouting::new(),
            SimRandom::new(seed),
            SimClock::new(now),
            SimSink::default(),
            config,
        )?;
        Ok(Self {
            inner,
            created_at: now,
        })
    }

    pub fn id(&self) -> NodeId {
        self.inner.identity().id()
    }

    pub fn role(&self) -> Role {
        self.inner.identity().role()
    }

    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    pub fn inner(&self) -> &EngineNode {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut EngineNode {
        &mut self.inner
    }

    pub fn start(&mut self, now: Timestamp) {
        self.inner.clock().set(now);
        self.inner.start();
    }

    pub fn fire_timer(&mut self, timer: TimerKind, now: Timestamp) {
        self.inner.clock().set(now);
        self.inner.dispatch(NodeEvent::TimerFired(timer));
    }

    pub fn packet_in(&mut self, packet: &PacketInfo, now: Timestamp) -> Verdict {
        self.inner.clock().set(now);
        self.inner.on_packet_in(packet)
    }

    pub fn packet_out(&mut self, packet: &PacketInfo, now: Timestamp) -> Verdict {
        self.inner.clock().set(now);
        self.inner.on_packet_out(packet)
    }

    pub fn deliver(&mut self, payload: &[u8], now: Timestamp) {
        self.inner.clock().set(now);
        self.inner.dispatch(NodeEvent::DatagramReceived(payload));
    }

    pub fn deadline(&self, timer: TimerKind) -> Option<Timestamp> {
        self.inner.deadline(timer)
    }

    /// Push the node's place in the routing tree.
    pub fn set_routing(&mut self, view: RoutingView) {
        self.inner.routing_mut().apply(view);
        self.inner.transport_mut().set_uplink(view.joined);
    }

    pub fn routing_view(&self) -> RoutingView {
        self.inner.routing().view()
    }

    pub fn take_outgoing(&mut self) -> Vec<Outgoing> {
        self.inner.transport_mut().take_outgoing()
    }

    pub fn take_records(&mut self) -> Vec<TelemetryRecord> {
        self.inner.telemetry_sink_mut().take()
    }

    /// Whether this node logged a record of `kind` that is still pending.
    pub fn has_pending(&self, kind: EventKind) -> bool {
        self.inner
            .telemetry_sink()
            .pending
            .iter()
            .any(|r| r.kind() == kind)
    }
}
