//! Async run loop for embedded targets.
//!
//! On hardware the node is driven by a single task: the radio receive path
//! pushes datagrams addressed to the data port into [`Node::inbound`], and
//! the task alternates between those and the timer deadlines. Packet hooks
//! are not routed through here: the network stack calls them synchronously
//! via [`PacketHooks`](crate::PacketHooks).
//!
//! ```text
//! spawn(async move {
//!     node.run().await;
//! });
//!
//! // radio RX path
//! node.inbound().try_send(payload.to_vec());
//! ```

use crate::node::{Node, NodeEvent};
use crate::telemetry::TelemetrySink;
use crate::time::Duration;
use crate::traits::{Clock, Random, Routing, Transport};

/// Idle wake-up when no timer is armed.
const IDLE_WAKE: Duration = Duration::from_secs(60);

impl<T, Rt, R, Clk, S> Node<T, Rt, R, Clk, S>
where
    T: Transport,
    Rt: Routing,
    R: Random,
    Clk: Clock,
    S: TelemetrySink,
{
    /// Start the node and process events forever.
    pub async fn run(&mut self) -> ! {
        self.start();
        loop {
            self.run_once().await;
        }
    }

    /// Wait for the next inbound datagram or timer deadline and handle it.
    pub async fn run_once(&mut self) {
        use embassy_futures::select::{select, Either};

        let wake = self
            .next_wake()
            .unwrap_or_else(|| self.clock.now() + IDLE_WAKE);

        let result = select(self.inbound.receive(), self.clock.sleep_until(wake)).await;

        match result {
            Either::First(payload) => {
                self.dispatch(NodeEvent::DatagramReceived(&payload));
            }
            Either::Second(()) => {
                self.fire_due_timers();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use embassy_futures::block_on;

    use crate::config::ExperimentConfig;
    use crate::node::Node;
    use crate::telemetry::{EventKind, VecSink};
    use crate::time::Timestamp;
    use crate::traits::test_impls::{MockClock, MockRandom, MockRouting, MockTransport};
    use crate::types::TimerKind;
    use crate::wire::DataPacket;

    fn root() -> Node<MockTransport, MockRouting, MockRandom, MockClock, VecSink> {
        let mut node = Node::new(
            MockTransport::new(1),
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

    #[test]
    fn test_run_once_prefers_inbound_datagram() {
        let mut node = root();
        let payload = DataPacket {
            seq: 1,
            send_time_ms: 0,
            src_id: 2,
        }
        .to_bytes();
        assert!(node.inbound().try_send(payload.to_vec()).is_ok());

        block_on(node.run_once());

        assert_eq!(node.telemetry_sink().count(EventKind::RootRx), 1);
        assert_eq!(node.telemetry_sink().count(EventKind::Delay), 1);
    }

    #[test]
    fn test_run_once_fires_due_timers() {
        let mut node = root();
        node.clock().set(Timestamp::from_secs(10));

        block_on(node.run_once());

        // Parent poll came due and was rearmed; the send timer was not due yet.
        assert_eq!(
            node.deadline(TimerKind::ParentPoll),
            Some(Timestamp::from_secs(20))
        );
        assert_eq!(
            node.deadline(TimerKind::Send),
            Some(Timestamp::from_secs(30))
        );
        assert_eq!(node.telemetry_sink().count(EventKind::Root), 1);
    }
}
