//! Node implementation - the per-node behavior state machine.
//!
//! The Node struct owns every piece of per-node state (identity, sequence
//! counter, parent bookkeeping, attack counters) together with its
//! collaborators. It is fully event-driven: the substrate hands it one
//! [`NodeEvent`] at a time through [`Node::dispatch`] and every event is
//! processed to completion before the next one.
//!
//! The handlers live next to the state they touch:
//! - [`scheduler`](crate::scheduler) - periodic data packets
//! - [`parent`](crate::parent) - preferred-parent churn
//! - [`intercept`](crate::intercept) - the selective-forwarding adversary
//! - [`sink`](crate::sink) - delay measurement at the anchor
//! - [`stats`](crate::stats) - periodic attack counters
//!
//! # Usage
//!
//! ```ignore
//! let mut node = Node::new(transport, routing, random, clock, sink, config)?;
//! node.start();
//!
//! // Substrate loop
//! node.dispatch(NodeEvent::PacketIn(&info));
//! node.fire_due_timers();
//! ```

use crate::config::{ConfigError, ExperimentConfig};
use crate::intercept::PacketInterceptor;
use crate::parent::ParentTracker;
use crate::scheduler::SendScheduler;
use crate::sink::SinkReceiver;
use crate::stats::StatsReporter;
use crate::telemetry::{Telemetry, TelemetryEvent, TelemetrySink};
use crate::time::Timestamp;
use crate::traits::{Clock, DatagramChannel, PacketHooks, Random, Routing, Transport};
use crate::types::{AttackCounters, NodeIdentity, PacketInfo, ParentState, TimerKind, Verdict};

/// A single event delivered by the substrate.
#[derive(Debug, Clone, Copy)]
pub enum NodeEvent<'a> {
    /// A timer deadline elapsed.
    TimerFired(TimerKind),
    /// A packet entered the local packet-processing path.
    PacketIn(&'a PacketInfo),
    /// A packet is leaving through the local packet-processing path.
    PacketOut(&'a PacketInfo),
    /// An application datagram arrived on the data port.
    DatagramReceived(&'a [u8]),
}

/// The node-behavior engine.
///
/// Generic over:
/// - `T`: Transport implementation
/// - `Rt`: Routing-tree view
/// - `R`: Random number generator
/// - `Clk`: Clock/timer implementation
/// - `S`: Telemetry sink
pub struct Node<T, Rt, R, Clk, S> {
    // Dependencies (injected)
    pub(crate) transport: T,
    pub(crate) routing: Rt,
    pub(crate) random: R,
    pub(crate) clock: Clk,
    pub(crate) telemetry: Telemetry<S>,

    pub(crate) identity: NodeIdentity,
    pub(crate) config: ExperimentConfig,
    started: bool,

    // Components, disjoint so handlers can borrow them alongside collaborators
    pub(crate) scheduler: SendScheduler,
    pub(crate) parent: ParentTracker,
    pub(crate) interceptor: Option<PacketInterceptor>,
    pub(crate) stats: Option<StatsReporter>,
    pub(crate) sink: Option<SinkReceiver>,

    // Inbound datagrams for the async driver
    pub(crate) inbound: DatagramChannel,
}

impl<T, Rt, R, Clk, S> Node<T, Rt, R, Clk, S>
where
    T: Transport,
    Rt: Routing,
    R: Random,
    Clk: Clock,
    S: TelemetrySink,
{
    /// Create a node whose identity is read from the transport's link address.
    ///
    /// Components are installed according to the resolved role: the sink
    /// only on the anchor, the interceptor and stats reporter only on the
    /// configured attacker.
    pub fn new(
        transport: T,
        routing: Rt,
        random: R,
        clock: Clk,
        sink: S,
        config: ExperimentConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let identity = NodeIdentity::from_link_addr(&transport.local_addr(), &config);
        let intercepting = identity.is_intercepting();

        Ok(Self {
            transport,
            routing,
            random,
            clock,
            telemetry: Telemetry::new(identity.id(), sink),
            identity,
            config,
            started: false,
            scheduler: SendScheduler::new(),
            parent: ParentTracker::new(),
            interceptor: intercepting.then(|| PacketInterceptor::new(&config)),
            stats: intercepting.then(StatsReporter::new),
            sink: identity.is_root().then(SinkReceiver::new),
            inbound: DatagramChannel::new(),
        })
    }

    /// Run role-specific startup and arm the timers.
    ///
    /// Idempotent: only the first call has an effect.
    pub fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        let now = self.clock.now();

        if self.identity.is_root() {
            self.routing.start_as_anchor();
            self.telemetry.emit(now, TelemetryEvent::Root);
        }
        if self.interceptor.is_some() {
            self.telemetry.emit(
                now,
                TelemetryEvent::AttackStart {
                    rate: self.config.attack_rate.as_f64(),
                },
            );
        }

        // The first send waits the bare interval, later ones add jitter.
        self.scheduler.arm(now + self.config.send_interval);
        self.parent.arm(now + self.config.parent_poll_period);
        if let Some(stats) = self.stats.as_mut() {
            stats.arm(now + self.config.stats_period);
        }
    }

    /// Process one event to completion.
    ///
    /// Only the packet hooks can return [`Verdict::Drop`]; every other
    /// event yields [`Verdict::Pass`].
    pub fn dispatch(&mut self, event: NodeEvent<'_>) -> Verdict {
        let now = self.clock.now();
        match event {
            NodeEvent::TimerFired(kind) => {
                self.handle_timer(kind, now);
                Verdict::Pass
            }
            NodeEvent::PacketIn(packet) => self.handle_packet_in(packet, now),
            NodeEvent::PacketOut(packet) => self.handle_packet_out(packet, now),
            NodeEvent::DatagramReceived(payload) => {
                self.handle_datagram(payload, now);
                Verdict::Pass
            }
        }
    }

    fn handle_timer(&mut self, kind: TimerKind, now: Timestamp) {
        match kind {
            TimerKind::ParentPoll => self.handle_parent_poll(now),
            TimerKind::Send => self.handle_send_timer(now),
            TimerKind::Stats => self.handle_stats_timer(now),
        }
    }

    /// Fire every timer whose deadline is at or before the current time.
    ///
    /// Returns the number of timers fired.
    pub fn fire_due_timers(&mut self) -> usize {
        let now = self.clock.now();
        let mut fired = 0;
        for kind in TimerKind::ALL {
            if matches!(self.deadline(kind), Some(deadline) if deadline <= now) {
                self.dispatch(NodeEvent::TimerFired(kind));
                fired += 1;
            }
        }
        fired
    }

    /// Current deadline of a timer, `None` when the timer is not armed.
    pub fn deadline(&self, kind: TimerKind) -> Option<Timestamp> {
        match kind {
            TimerKind::ParentPoll => self.parent.deadline(),
            TimerKind::Send => self.scheduler.deadline(),
            TimerKind::Stats => self.stats.as_ref().and_then(|s| s.deadline()),
        }
    }

    /// Earliest armed deadline.
    pub fn next_wake(&self) -> Option<Timestamp> {
        TimerKind::ALL.iter().filter_map(|&k| self.deadline(k)).min()
    }

    // Accessors

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Attack counters. All zero on nodes that do not intercept.
    pub fn counters(&self) -> AttackCounters {
        self.interceptor
            .as_ref()
            .map(|i| *i.counters())
            .unwrap_or_default()
    }

    pub fn parent_state(&self) -> ParentState {
        *self.parent.state()
    }

    /// Sequence number of the last constructed data packet, 0 before the first.
    pub fn seq(&self) -> u32 {
        self.scheduler.seq()
    }

    /// Data packets decoded by the sink. Always 0 off the anchor.
    pub fn delivered(&self) -> u32 {
        self.sink.as_ref().map_or(0, |s| s.delivered())
    }

    /// Channel for inbound datagrams, drained by [`run`](Node::run).
    pub fn inbound(&self) -> &DatagramChannel {
        &self.inbound
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn routing(&self) -> &Rt {
        &self.routing
    }

    pub fn routing_mut(&mut self) -> &mut Rt {
        &mut self.routing
    }

    pub fn clock(&self) -> &Clk {
        &self.clock
    }

    pub fn telemetry_sink(&self) -> &S {
        self.telemetry.sink()
    }

    pub fn telemetry_sink_mut(&mut self) -> &mut S {
        self.telemetry.sink_mut()
    }
}

impl<T, Rt, R, Clk, S> PacketHooks for Node<T, Rt, R, Clk, S>
where
    T: Transport,
    Rt: Routing,
    R: Random,
    Clk: Clock,
    S: TelemetrySink,
{
    fn on_packet_in(&mut self, packet: &PacketInfo) -> Verdict {
        self.dispatch(NodeEvent::PacketIn(packet))
    }

    fn on_packet_out(&mut self, packet: &PacketInfo) -> Verdict {
        self.dispatch(NodeEvent::PacketOut(packet))
    }
}
