//! Delivery measurement at the anchor.

use crate::node::Node;
use crate::telemetry::{TelemetryEvent, TelemetrySink};
use crate::time::Timestamp;
use crate::traits::{Clock, Random, Routing, Transport};
use crate::wire::DataPacket;

/// End-to-end delay between a sender's wire timestamp and the local clock.
///
/// Both values are 32-bit millisecond readings, so the difference is taken
/// modulo 2^32 and stays correct across a single clock wrap.
pub fn delay_ms(now_wire: u32, send_time_ms: u32) -> u32 {
    now_wire.wrapping_sub(send_time_ms)
}

#[derive(Debug, Clone, Default)]
pub struct SinkReceiver {
    delivered: u32,
}

impl SinkReceiver {
    pub const fn new() -> Self {
        Self { delivered: 0 }
    }

    /// Packets decoded so far.
    pub fn delivered(&self) -> u32 {
        self.delivered
    }

    /// Decode a received payload and compute its delay.
    ///
    /// Undersized payloads yield `None` and leave no trace.
    pub fn receive(&mut self, payload: &[u8], now: Timestamp) -> Option<(DataPacket, u32)> {
        let packet = DataPacket::from_bytes(payload).ok()?;
        self.delivered = self.delivered.saturating_add(1);
        Some((packet, delay_ms(now.wire_millis(), packet.send_time_ms)))
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
    pub(crate) fn handle_datagram(&mut self, payload: &[u8], now: Timestamp) {
        let Some(sink) = self.sink.as_mut() else {
            return;
        };
        if let Some((packet, delay)) = sink.receive(payload, now) {
            let (seq, src) = (packet.seq, packet.src_id);
            self.telemetry.emit(now, TelemetryEvent::RootRx { seq, src });
            self.telemetry.emit(
                now,
                TelemetryEvent::Delay {
                    seq,
                    src,
                    delay_ms: delay,
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExperimentConfig;
    use crate::node::NodeEvent;
    use crate::telemetry::{EventKind, VecSink};
    use crate::traits::test_impls::{MockClock, MockRandom, MockRouting, MockTransport};

    type TestNode = Node<MockTransport, MockRouting, MockRandom, MockClock, VecSink>;

    fn node(id: u16) -> TestNode {
        let mut node = Node::new(
            MockTransport::new(id),
            MockRouting::new(),
            MockRandom::new(),
            MockClock::new(),
            VecSink::new(),
            ExperimentConfig::DEFAULT,
        )
        .unwrap();
        node.start();
        node
    }

    fn packet(seq: u32, send_time_ms: u32, src_id: u16) -> [u8; 10] {
        DataPacket {
            seq,
            send_time_ms,
            src_id,
        }
        .to_bytes()
    }

    #[test]
    fn test_delay_is_exact() {
        let mut root = node(1);
        root.clock().set(Timestamp::from_millis(40_250));
        root.dispatch(NodeEvent::DatagramReceived(&packet(7, 40_000, 3)));

        let records = root.telemetry_sink().records();
        let n = records.len();
        assert_eq!(records[n - 2].event, TelemetryEvent::RootRx { seq: 7, src: 3 });
        assert_eq!(
            records[n - 1].event,
            TelemetryEvent::Delay {
                seq: 7,
                src: 3,
                delay_ms: 250
            }
        );
        assert_eq!(root.delivered(), 1);
    }

    #[test]
    fn test_short_payload_ignored() {
        let mut root = node(1);
        let before = root.telemetry_sink().records().len();
        root.dispatch(NodeEvent::DatagramReceived(&[]));
        root.dispatch(NodeEvent::DatagramReceived(&packet(1, 0, 2)[..9]));

        assert_eq!(root.telemetry_sink().records().len(), before);
        assert_eq!(root.delivered(), 0);
    }

    #[test]
    fn test_non_root_ignores_datagrams() {
        let mut sender = node(2);
        sender.dispatch(NodeEvent::DatagramReceived(&packet(1, 0, 3)));
        assert_eq!(sender.telemetry_sink().count(EventKind::RootRx), 0);
    }

    #[test]
    fn test_delay_across_clock_wrap() {
        assert_eq!(delay_ms(5, u32::MAX - 4), 10);
        assert_eq!(delay_ms(1000, 1000), 0);
    }
}
