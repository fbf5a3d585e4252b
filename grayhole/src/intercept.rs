//! Selective-forwarding adversary.
//!
//! Installed only on the configured attacker. It sits on both packet hooks
//! and only looks at *matching* packets: UDP toward the configured data
//! port. Everything else passes untouched on either path.
//!
//! - Inbound: every matching packet is counted as `received` and recorded.
//!   No drop decision is made here.
//! - Outbound: a matching packet that is being relayed (neither its source
//!   nor its destination is a local address) goes through an independent
//!   Bernoulli trial. A uniform draw in `[0, DROP_MODULUS)` strictly below
//!   the rate threshold drops it; anything else forwards it.
//!
//! Over many packets the realized drop fraction converges to the configured
//! rate, quantized to `1 / DROP_MODULUS`.

use crate::config::{ExperimentConfig, DROP_MODULUS};
use crate::node::Node;
use crate::telemetry::{TelemetryEvent, TelemetrySink};
use crate::time::Timestamp;
use crate::traits::{Clock, Random, Routing, Transport};
use crate::types::{AttackCounters, PacketInfo, Protocol, Verdict};

/// Outcome of the outbound classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundDecision {
    /// Not matching or not relayed: no counter, no record.
    Ignored,
    Forward,
    Drop,
}

impl OutboundDecision {
    pub const fn verdict(self) -> Verdict {
        match self {
            OutboundDecision::Drop => Verdict::Drop,
            OutboundDecision::Ignored | OutboundDecision::Forward => Verdict::Pass,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PacketInterceptor {
    data_port: u16,
    threshold: u16,
    counters: AttackCounters,
}

impl PacketInterceptor {
    pub fn new(config: &ExperimentConfig) -> Self {
        Self {
            data_port: config.data_port,
            threshold: config.attack_rate.threshold(),
            counters: AttackCounters::new(),
        }
    }

    pub fn counters(&self) -> &AttackCounters {
        &self.counters
    }

    pub fn threshold(&self) -> u16 {
        self.threshold
    }

    /// Whether the packet is application traffic toward the data port.
    pub fn matches(&self, packet: &PacketInfo) -> bool {
        packet.protocol == Protocol::Udp && packet.dst_port == self.data_port
    }

    /// Inbound path. Returns `true` when the packet was counted.
    pub fn observe_inbound(&mut self, packet: &PacketInfo) -> bool {
        if !self.matches(packet) {
            return false;
        }
        self.counters.received = self.counters.received.saturating_add(1);
        true
    }

    /// Outbound path for a packet whose relay status is already known.
    pub fn decide_outbound<R: Random>(
        &mut self,
        packet: &PacketInfo,
        relayed: bool,
        random: &mut R,
    ) -> OutboundDecision {
        if !relayed || !self.matches(packet) {
            return OutboundDecision::Ignored;
        }
        let draw = random.gen_range(0, u64::from(DROP_MODULUS));
        if draw < u64::from(self.threshold) {
            self.counters.dropped = self.counters.dropped.saturating_add(1);
            OutboundDecision::Drop
        } else {
            self.counters.forwarded = self.counters.forwarded.saturating_add(1);
            OutboundDecision::Forward
        }
    }
}

impl<T, Rt, R, Clk, S> Node<T, Rt, R, Clk, S>
where
    T: Transport,
    Rt: Routing,
    R: Random,
    Clk: Clock,
    S: TelemetrySink,
{
    pub(crate) fn handle_packet_in(&mut self, packet: &PacketInfo, now: Timestamp) -> Verdict {
        if let Some(interceptor) = self.interceptor.as_mut() {
            if interceptor.observe_inbound(packet) {
                self.telemetry.emit(now, TelemetryEvent::DataRx);
            }
        }
        Verdict::Pass
    }

    pub(crate) fn handle_packet_out(&mut self, packet: &PacketInfo, now: Timestamp) -> Verdict {
        let Some(interceptor) = self.interceptor.as_mut() else {
            return Verdict::Pass;
        };
        let relayed =
            !self.transport.is_local_addr(&packet.src) && !self.transport.is_local_addr(&packet.dst);
        let decision = interceptor.decide_outbound(packet, relayed, &mut self.random);
        match decision {
            OutboundDecision::Drop => self.telemetry.emit(now, TelemetryEvent::DataDrop),
            OutboundDecision::Forward => self.telemetry.emit(now, TelemetryEvent::DataFwd),
            OutboundDecision::Ignored => {}
        }
        decision.verdict()
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec::Vec;

    use super::*;
    use crate::config::AttackRate;
    use crate::node::NodeEvent;
    use crate::telemetry::{EventKind, VecSink};
    use crate::traits::test_impls::{
        MockClock, MockRandom, MockRouting, MockTransport, ScriptedRandom,
    };
    use crate::traits::PacketHooks;
    use crate::types::LinkAddr;

    const ATTACKER: u16 = 6;

    type TestNode<R> = Node<MockTransport, MockRouting, R, MockClock, VecSink>;

    fn attacker<R: Random>(rate: f64, random: R) -> TestNode<R> {
        let config =
            ExperimentConfig::DEFAULT.with_attack_rate(AttackRate::new(rate).unwrap());
        let mut node = Node::new(
            MockTransport::new(ATTACKER),
            MockRouting::joined_to(1),
            random,
            MockClock::new(),
            VecSink::new(),
            config,
        )
        .unwrap();
        node.start();
        node
    }

    fn udp(src: u16, dst: u16, port: u16) -> PacketInfo {
        PacketInfo {
            protocol: Protocol::Udp,
            src: LinkAddr::from_node_id(src),
            dst: LinkAddr::from_node_id(dst),
            dst_port: port,
        }
    }

    fn relayed() -> PacketInfo {
        udp(9, 1, 3000)
    }

    #[test]
    fn test_rate_zero_never_drops() {
        let mut node = attacker(0.0, MockRandom::new());
        for _ in 0..500 {
            assert_eq!(node.on_packet_out(&relayed()), Verdict::Pass);
        }
        let counters = node.counters();
        assert_eq!(counters.dropped, 0);
        assert_eq!(counters.forwarded, 500);
    }

    #[test]
    fn test_rate_one_always_drops() {
        let mut node = attacker(1.0, MockRandom::new());
        for _ in 0..500 {
            assert_eq!(node.on_packet_out(&relayed()), Verdict::Drop);
        }
        let counters = node.counters();
        assert_eq!(counters.dropped, 500);
        assert_eq!(counters.forwarded, 0);
        assert_eq!(node.telemetry_sink().count(EventKind::DataDrop), 500);
    }

    #[test]
    fn test_threshold_boundary() {
        // Rate 0.3: draws 0..=299 drop, 300 and above forward.
        let mut node = attacker(0.3, ScriptedRandom::new(alloc::vec![299, 300, 0, 999]));
        let verdicts: Vec<Verdict> = (0..4).map(|_| node.on_packet_out(&relayed())).collect();
        assert_eq!(
            verdicts,
            [Verdict::Drop, Verdict::Pass, Verdict::Drop, Verdict::Pass]
        );
    }

    #[test]
    fn test_rate_point_three_over_thousand_packets() {
        let mut node = attacker(0.3, MockRandom::with_seed(42));
        let verdicts: Vec<Verdict> = (0..1000).map(|_| node.on_packet_out(&relayed())).collect();

        let dropped = verdicts.iter().filter(|v| v.is_drop()).count() as u32;
        let counters = node.counters();
        assert_eq!(counters.dropped, dropped);
        assert_eq!(counters.forwarded, 1000 - dropped);
        assert!((240..=360).contains(&dropped), "dropped {dropped}");

        // Records follow the verdicts one to one, in order.
        let kinds: Vec<EventKind> = node
            .telemetry_sink()
            .records()
            .iter()
            .map(|r| r.kind())
            .filter(|k| matches!(k, EventKind::DataDrop | EventKind::DataFwd))
            .collect();
        let expected: Vec<EventKind> = verdicts
            .iter()
            .map(|v| if v.is_drop() { EventKind::DataDrop } else { EventKind::DataFwd })
            .collect();
        assert_eq!(kinds, expected);
    }

    #[test]
    fn test_inbound_counts_without_dropping() {
        let mut node = attacker(1.0, MockRandom::new());
        assert_eq!(node.on_packet_in(&relayed()), Verdict::Pass);
        // Addressed to the attacker itself: still observed inbound.
        assert_eq!(node.on_packet_in(&udp(2, ATTACKER, 3000)), Verdict::Pass);

        let counters = node.counters();
        assert_eq!(counters.received, 2);
        assert_eq!(counters.relayed(), 0);
        assert_eq!(node.telemetry_sink().count(EventKind::DataRx), 2);
    }

    #[test]
    fn test_local_traffic_not_relayed() {
        let mut node = attacker(1.0, MockRandom::new());
        // Addressed to the attacker.
        assert_eq!(node.on_packet_out(&udp(2, ATTACKER, 3000)), Verdict::Pass);
        // Originated by the attacker.
        assert_eq!(node.on_packet_out(&udp(ATTACKER, 1, 3000)), Verdict::Pass);

        assert_eq!(node.counters(), AttackCounters::new());
        assert_eq!(node.telemetry_sink().count(EventKind::DataDrop), 0);
    }

    #[test]
    fn test_non_matching_traffic_untouched() {
        let mut node = attacker(1.0, MockRandom::new());
        let before = node.telemetry_sink().records().len();

        let mut tcp = relayed();
        tcp.protocol = Protocol::Tcp;
        let mut icmp = relayed();
        icmp.protocol = Protocol::Icmp6;
        let other_port = udp(9, 1, 5683);

        for packet in [tcp, icmp, other_port] {
            assert_eq!(node.on_packet_in(&packet), Verdict::Pass);
            assert_eq!(node.on_packet_out(&packet), Verdict::Pass);
        }

        assert_eq!(node.counters(), AttackCounters::new());
        assert_eq!(node.telemetry_sink().records().len(), before);
    }

    #[test]
    fn test_sender_has_no_interceptor() {
        let mut node = Node::new(
            MockTransport::new(3),
            MockRouting::joined_to(1),
            MockRandom::new(),
            MockClock::new(),
            VecSink::new(),
            ExperimentConfig::DEFAULT.with_attack_rate(AttackRate::ALWAYS),
        )
        .unwrap();
        node.start();
        assert_eq!(
            node.dispatch(NodeEvent::PacketOut(&relayed())),
            Verdict::Pass
        );
        assert_eq!(node.dispatch(NodeEvent::PacketIn(&relayed())), Verdict::Pass);
        assert!(node.telemetry_sink().records().is_empty());
    }
}
