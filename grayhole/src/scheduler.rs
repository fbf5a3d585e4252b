//! Periodic data packet origination.
//!
//! Every node runs the send timer. On firing it builds a [`DataPacket`] and
//! hands it to the transport toward the anchor, provided the node is not the
//! anchor itself and the routing view reports a joined tree with a known
//! anchor address. Otherwise the tick is skipped. The timer is rearmed in
//! both cases.
//!
//! Rearm delay is `send_interval + jitter`, with the jitter drawn uniformly
//! from `[0, send_jitter]` (inclusive, millisecond granularity) on every
//! firing, so nodes sharing a base interval drift apart instead of
//! transmitting in lockstep.

use crate::node::Node;
use crate::telemetry::{TelemetryEvent, TelemetrySink};
use crate::time::{Duration, Timestamp};
use crate::traits::{Clock, Random, Routing, Transport};
use crate::wire::DataPacket;

/// Sequence counter and deadline of the send timer.
#[derive(Debug, Clone, Default)]
pub struct SendScheduler {
    seq: u32,
    deadline: Option<Timestamp>,
}

impl SendScheduler {
    pub const fn new() -> Self {
        Self {
            seq: 0,
            deadline: None,
        }
    }

    /// Sequence number carried by the last constructed packet.
    pub fn seq(&self) -> u32 {
        self.seq
    }

    pub fn deadline(&self) -> Option<Timestamp> {
        self.deadline
    }

    pub fn arm(&mut self, at: Timestamp) {
        self.deadline = Some(at);
    }

    /// Claim the sequence number for a new packet.
    pub fn next_seq(&mut self) -> u32 {
        self.seq = self.seq.wrapping_add(1);
        self.seq
    }
}

/// Base interval plus a fresh jitter in `[0, jitter]`.
pub fn jittered_delay<R: Random>(interval: Duration, jitter: Duration, random: &mut R) -> Duration {
    let bound = jitter.as_millis().saturating_add(1);
    interval + Duration::from_millis(random.gen_range(0, bound))
}

impl<T, Rt, R, Clk, S> Node<T, Rt, R, Clk, S>
where
    T: Transport,
    Rt: Routing,
    R: Random,
    Clk: Clock,
    S: TelemetrySink,
{
    /// Handle the send timer.
    pub(crate) fn handle_send_timer(&mut self, now: Timestamp) {
        if !self.identity.is_root() && self.routing.has_joined() {
            if let Some(anchor) = self.routing.anchor_address() {
                let seq = self.scheduler.next_seq();
                let packet = DataPacket {
                    seq,
                    send_time_ms: now.wire_millis(),
                    src_id: self.identity.id(),
                };
                // One attempt per tick; a refused datagram is simply lost.
                let _ = self
                    .transport
                    .send_datagram(&packet.to_bytes(), anchor, self.config.data_port);
                self.telemetry.emit(
                    now,
                    TelemetryEvent::DataTx {
                        seq,
                        dst: anchor.node_id(),
                    },
                );
            }
        }

        let delay = jittered_delay(
            self.config.send_interval,
            self.config.send_jitter,
            &mut self.random,
        );
        self.scheduler.arm(now + delay);
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec;

    use super::*;
    use crate::config::ExperimentConfig;
    use crate::node::NodeEvent;
    use crate::telemetry::{EventKind, VecSink};
    use crate::traits::test_impls::{
        MockClock, MockRandom, MockRouting, MockTransport, ScriptedRandom,
    };
    use crate::types::{LinkAddr, SendError, TimerKind};

    type TestNode<R> = Node<MockTransport, MockRouting, R, MockClock, VecSink>;

    fn sender<R: Random>(id: u16, routing: MockRouting, random: R) -> TestNode<R> {
        let mut node = Node::new(
            MockTransport::new(id),
            routing,
            random,
            MockClock::new(),
            VecSink::new(),
            ExperimentConfig::DEFAULT,
        )
        .unwrap();
        node.start();
        node
    }

    fn fire_send<R: Random>(node: &mut TestNode<R>) {
        let deadline = node.deadline(TimerKind::Send).unwrap();
        node.clock().set(deadline);
        node.dispatch(NodeEvent::TimerFired(TimerKind::Send));
    }

    #[test]
    fn test_first_send_has_no_jitter() {
        let node = sender(2, MockRouting::joined_to(1), MockRandom::new());
        assert_eq!(node.deadline(TimerKind::Send), Some(Timestamp::from_secs(30)));
    }

    #[test]
    fn test_sequence_starts_at_one_and_increments() {
        let mut node = sender(2, MockRouting::joined_to(1), MockRandom::new());
        for _ in 0..3 {
            fire_send(&mut node);
        }

        let sent = node.transport_mut().take_sent();
        let seqs: alloc::vec::Vec<u32> = sent
            .iter()
            .map(|d| DataPacket::from_bytes(&d.payload).unwrap().seq)
            .collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert!(sent
            .iter()
            .all(|d| d.dst == LinkAddr::from_node_id(1) && d.port == 3000));

        let tx: alloc::vec::Vec<_> = node.telemetry_sink().of_kind(EventKind::DataTx).collect();
        assert_eq!(tx.len(), 3);
        assert_eq!(tx[2].event, TelemetryEvent::DataTx { seq: 3, dst: 1 });
    }

    #[test]
    fn test_packet_carries_send_time_and_source() {
        let mut node = sender(4, MockRouting::joined_to(1), MockRandom::new());
        fire_send(&mut node);

        let sent = node.transport_mut().take_sent();
        let packet = DataPacket::from_bytes(&sent[0].payload).unwrap();
        assert_eq!(packet.send_time_ms, 30_000);
        assert_eq!(packet.src_id, 4);
    }

    #[test]
    fn test_skips_when_not_joined_but_rearms() {
        let mut node = sender(2, MockRouting::new(), MockRandom::new());
        fire_send(&mut node);

        assert!(node.transport().sent.is_empty());
        assert_eq!(node.seq(), 0);
        assert_eq!(node.telemetry_sink().count(EventKind::DataTx), 0);
        assert!(node.deadline(TimerKind::Send).unwrap() > Timestamp::from_secs(30));
    }

    #[test]
    fn test_skips_without_anchor_address() {
        let mut routing = MockRouting::joined_to(1);
        routing.anchor = None;
        let mut node = sender(2, routing, MockRandom::new());
        fire_send(&mut node);
        assert_eq!(node.seq(), 0);
        assert!(node.transport().sent.is_empty());
    }

    #[test]
    fn test_root_never_sends() {
        let mut node = sender(1, MockRouting::joined_to(1), MockRandom::new());
        fire_send(&mut node);
        fire_send(&mut node);
        assert_eq!(node.seq(), 0);
        assert!(node.transport().sent.is_empty());
        // Timer keeps running on the anchor.
        assert!(node.deadline(TimerKind::Send).is_some());
    }

    #[test]
    fn test_transport_failure_not_retried() {
        let mut node = sender(2, MockRouting::joined_to(1), MockRandom::new());
        node.transport_mut().fail_with = Some(SendError::QueueFull);
        fire_send(&mut node);
        fire_send(&mut node);

        // One attempt per tick, the sequence still advances.
        assert_eq!(node.transport().sent.len(), 2);
        assert_eq!(node.seq(), 2);
        assert_eq!(node.telemetry_sink().count(EventKind::DataTx), 2);
    }

    #[test]
    fn test_jitter_bounds_inclusive() {
        let interval = Duration::from_secs(30);
        let jitter = Duration::from_secs(5);

        let mut low = ScriptedRandom::new(vec![0]);
        assert_eq!(jittered_delay(interval, jitter, &mut low), interval);

        // 5000 is the last value of the 5001-wide range.
        let mut high = ScriptedRandom::new(vec![5000]);
        assert_eq!(
            jittered_delay(interval, jitter, &mut high),
            Duration::from_secs(35)
        );

        let mut zero = MockRandom::new();
        assert_eq!(jittered_delay(interval, Duration::ZERO, &mut zero), interval);
    }

    #[test]
    fn test_rearm_uses_fresh_jitter() {
        let mut node = sender(2, MockRouting::joined_to(1), ScriptedRandom::new(vec![100, 2500]));
        fire_send(&mut node);
        assert_eq!(
            node.deadline(TimerKind::Send),
            Some(Timestamp::from_millis(30_000 + 30_000 + 100))
        );
        fire_send(&mut node);
        assert_eq!(
            node.deadline(TimerKind::Send),
            Some(Timestamp::from_millis(60_100 + 30_000 + 2500))
        );
    }
}
