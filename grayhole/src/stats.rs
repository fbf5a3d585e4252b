//! Periodic attack statistics.

use crate::node::Node;
use crate::telemetry::{TelemetryEvent, TelemetrySink};
use crate::time::Timestamp;
use crate::traits::{Clock, Random, Routing, Transport};
use crate::types::AttackCounters;

#[derive(Debug, Clone, Default)]
pub struct StatsReporter {
    deadline: Option<Timestamp>,
}

impl StatsReporter {
    pub const fn new() -> Self {
        Self { deadline: None }
    }

    pub fn deadline(&self) -> Option<Timestamp> {
        self.deadline
    }

    pub fn arm(&mut self, at: Timestamp) {
        self.deadline = Some(at);
    }

    /// Snapshot record of the counters at this instant.
    pub fn snapshot(counters: &AttackCounters) -> TelemetryEvent {
        TelemetryEvent::AttackStats {
            recv: counters.received,
            fwd: counters.forwarded,
            drop: counters.dropped,
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
    pub(crate) fn handle_stats_timer(&mut self, now: Timestamp) {
        let counters = self.counters();
        let Some(stats) = self.stats.as_mut() else {
            return;
        };
        stats.arm(now + self.config.stats_period);
        self.telemetry.emit(now, StatsReporter::snapshot(&counters));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExperimentConfig;
    use crate::node::NodeEvent;
    use crate::telemetry::{EventKind, VecSink};
    use crate::traits::test_impls::{MockClock, MockRandom, MockRouting, MockTransport};
    use crate::traits::PacketHooks;
    use crate::types::{LinkAddr, PacketInfo, Protocol, TimerKind};

    fn node(id: u16) -> Node<MockTransport, MockRouting, MockRandom, MockClock, VecSink> {
        let mut node = Node::new(
            MockTransport::new(id),
            MockRouting::joined_to(1),
            MockRandom::new(),
            MockClock::new(),
            VecSink::new(),
            ExperimentConfig::DEFAULT,
        )
        .unwrap();
        node.start();
        node
    }

    #[test]
    fn test_stats_snapshot_every_period() {
        let mut attacker = node(6);
        let relayed = PacketInfo {
            protocol: Protocol::Udp,
            src: LinkAddr::from_node_id(4),
            dst: LinkAddr::from_node_id(1),
            dst_port: 3000,
        };
        attacker.on_packet_in(&relayed);
        attacker.on_packet_out(&relayed);

        assert_eq!(
            attacker.deadline(TimerKind::Stats),
            Some(Timestamp::from_secs(300))
        );
        attacker.clock().set(Timestamp::from_secs(300));
        attacker.dispatch(NodeEvent::TimerFired(TimerKind::Stats));

        let stats: alloc::vec::Vec<_> = attacker
            .telemetry_sink()
            .of_kind(EventKind::AttackStats)
            .collect();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].ts, Timestamp::from_secs(300));
        assert_eq!(
            stats[0].event,
            TelemetryEvent::AttackStats {
                recv: 1,
                fwd: 1,
                drop: 0
            }
        );
        assert_eq!(
            attacker.deadline(TimerKind::Stats),
            Some(Timestamp::from_secs(600))
        );
    }

    #[test]
    fn test_stats_timer_absent_off_attacker() {
        let mut sender = node(2);
        assert_eq!(sender.deadline(TimerKind::Stats), None);
        sender.dispatch(NodeEvent::TimerFired(TimerKind::Stats));
        assert_eq!(sender.telemetry_sink().count(EventKind::AttackStats), 0);
    }
}
