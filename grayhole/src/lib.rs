#![forbid(unsafe_code)]
//! grayhole - node-behavior engine for selective-forwarding experiments
//!
//! Models one node of a tree-shaped mesh during an attack experiment. Every
//! node resolves a static [`Role`] from its identifier:
//!
//! - **Root** anchors the routing tree and measures end-to-end delay of the
//!   data packets it sinks.
//! - **Attacker** sits on the tree and drops a configurable fraction of the
//!   application traffic it relays.
//! - **Sender** originates periodic, jittered data packets toward the root.
//!
//! Every observable step is written as a structured [`TelemetryRecord`] so
//! delivery ratio, delay, attack exposure and routing stability can be
//! reconstructed offline.
//!
//! The routing protocol, the network stack, the clock and the random source
//! are collaborators behind the traits in [`traits`]. The crate is `no_std`
//! and requires `alloc`.
//!
//! # Example
//!
//! ```
//! use grayhole::traits::test_impls::{MockClock, MockRandom, MockRouting, MockTransport};
//! use grayhole::{ExperimentConfig, Node, NodeEvent, Role, TimerKind, VecSink};
//!
//! let mut node = Node::new(
//!     MockTransport::new(2),
//!     MockRouting::joined_to(1),
//!     MockRandom::new(),
//!     MockClock::new(),
//!     VecSink::new(),
//!     ExperimentConfig::DEFAULT,
//! )
//! .unwrap();
//! node.start();
//! assert_eq!(node.identity().role(), Role::Sender);
//!
//! // First send fires after the bare interval.
//! let deadline = node.deadline(TimerKind::Send).unwrap();
//! node.clock().set(deadline);
//! node.dispatch(NodeEvent::TimerFired(TimerKind::Send));
//!
//! assert_eq!(node.seq(), 1);
//! assert_eq!(node.transport().sent.len(), 1);
//! ```
//!
//! # Module Structure
//!
//! - [`types`] - Identity, roles, packet metadata, counters
//! - [`config`] - Experiment constants and the drop threshold
//! - [`wire`] - DataPacket wire format
//! - [`traits`] - Clock, Random, Routing, Transport, PacketHooks
//! - [`telemetry`] - Observation records and sinks
//! - [`node`] - Main Node struct and event dispatch
//! - [`scheduler`] - Periodic data packets
//! - [`parent`] - Parent churn tracking
//! - [`intercept`] - Selective-forwarding interceptor
//! - [`sink`] - Delay measurement at the root
//! - [`stats`] - Periodic attack statistics
//! - [`driver`] - Async run loop
//! - [`time`] - Timestamp and Duration types

#![no_std]

// Mock collaborators replay fixed randomness and must never ship.
#[cfg(all(feature = "test-support", not(test), not(debug_assertions)))]
compile_error!(
    "The `test-support` feature must not be enabled in release builds. \
     It includes deterministic mock collaborators intended only for tests."
);

extern crate alloc;

pub mod config;
pub mod driver;
pub mod intercept;
pub mod node;
pub mod parent;
pub mod scheduler;
pub mod sink;
pub mod stats;
pub mod telemetry;
pub mod time;
pub mod traits;
pub mod types;
pub mod wire;

// Re-export main types at crate root
pub use config::{AttackRate, ConfigError, ExperimentConfig, DROP_MODULUS};
pub use node::{Node, NodeEvent};
pub use telemetry::{
    EventKind, Telemetry, TelemetryEvent, TelemetryRecord, TelemetrySink, UnknownEventKind,
    VecSink,
};
pub use time::{Duration, Timestamp};
pub use traits::{Clock, DatagramChannel, PacketHooks, Random, Routing, Transport};
pub use types::{
    AttackCounters, LinkAddr, NodeId, NodeIdentity, PacketInfo, ParentState, Protocol, Rank,
    Role, SendError, TimerKind, Verdict, LINKADDR_SIZE,
};
pub use wire::{DataPacket, Decode, DecodeError, Encode, DATA_PACKET_SIZE};

#[cfg(test)]
mod tests {
    use alloc::vec::Vec;

    use super::*;
    use crate::traits::test_impls::{MockClock, MockRandom, MockRouting, MockTransport};

    type TestNode = Node<MockTransport, MockRouting, MockRandom, MockClock, VecSink>;

    fn node(id: NodeId, config: ExperimentConfig) -> TestNode {
        Node::new(
            MockTransport::new(id),
            MockRouting::joined_to(config.root_id),
            MockRandom::new(),
            MockClock::new(),
            VecSink::new(),
            config,
        )
        .unwrap()
    }

    fn kinds(node: &TestNode) -> Vec<EventKind> {
        node.telemetry_sink().records().iter().map(|r| r.kind()).collect()
    }

    #[test]
    fn test_root_startup() {
        let mut root = node(1, ExperimentConfig::DEFAULT);
        root.start();

        assert_eq!(root.identity().role(), Role::Root);
        assert!(root.routing().anchor_started);
        assert_eq!(kinds(&root), [EventKind::Root]);
        assert_eq!(root.deadline(TimerKind::Stats), None);
    }

    #[test]
    fn test_attacker_startup() {
        let config =
            ExperimentConfig::DEFAULT.with_attack_rate(AttackRate::new(0.25).unwrap());
        let mut attacker = node(6, config);
        attacker.start();

        assert_eq!(attacker.identity().role(), Role::Attacker);
        assert!(!attacker.routing().anchor_started);
        let records = attacker.telemetry_sink().records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].event, TelemetryEvent::AttackStart { rate: 0.25 });
        assert_eq!(
            attacker.deadline(TimerKind::Stats),
            Some(Timestamp::from_secs(300))
        );
    }

    #[test]
    fn test_root_and_attacker_coincide() {
        let config = ExperimentConfig::DEFAULT.with_attacker_id(1);
        let mut node = node(1, config);
        node.start();

        assert_eq!(node.identity().role(), Role::Root);
        assert_eq!(kinds(&node), [EventKind::Root, EventKind::AttackStart]);

        // Interceptor is installed despite the root role.
        let relayed = PacketInfo {
            protocol: Protocol::Udp,
            src: LinkAddr::from_node_id(3),
            dst: LinkAddr::from_node_id(4),
            dst_port: 3000,
        };
        node.on_packet_in(&relayed);
        assert_eq!(node.counters().received, 1);
    }

    #[test]
    fn test_start_is_idempotent() {
        let mut root = node(1, ExperimentConfig::DEFAULT);
        root.start();
        root.clock().set(Timestamp::from_secs(5));
        root.start();
        assert_eq!(kinds(&root), [EventKind::Root]);
        assert_eq!(
            root.deadline(TimerKind::ParentPoll),
            Some(Timestamp::from_secs(10))
        );
    }

    #[test]
    fn test_timers_unarmed_before_start() {
        let sender = node(2, ExperimentConfig::DEFAULT);
        assert_eq!(sender.next_wake(), None);
        assert!(!sender.is_started());
    }

    #[test]
    fn test_next_wake_is_earliest_deadline() {
        let mut sender = node(2, ExperimentConfig::DEFAULT);
        sender.start();
        assert_eq!(sender.next_wake(), Some(Timestamp::from_secs(10)));

        sender.clock().set(Timestamp::from_secs(30));
        // Parent poll (10 s) and send (30 s) are both due.
        assert_eq!(sender.fire_due_timers(), 2);
        assert_eq!(sender.seq(), 1);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = ExperimentConfig::DEFAULT.with_parent_poll_period(Duration::ZERO);
        let result = Node::new(
            MockTransport::new(2),
            MockRouting::new(),
            MockRandom::new(),
            MockClock::new(),
            VecSink::new(),
            config,
        );
        assert!(matches!(result, Err(ConfigError::ZeroPollPeriod)));
    }
}
