//! Collaborator traits for time, randomness, routing and transport.
//!
//! The engine owns none of these concerns. These traits let the same node
//! logic run on:
//! - Real hardware (embassy timers, an RPL stack, a UDP socket)
//! - The deterministic simulator in `graysim`
//! - The mocks in [`test_impls`] for unit tests

use alloc::vec::Vec;
use core::future::Future;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;

use crate::time::Timestamp;
use crate::types::{LinkAddr, NodeId, PacketInfo, Rank, SendError, Verdict};

/// Queue size for inbound datagram channels.
pub(crate) const DATAGRAM_QUEUE_SIZE: usize = 8;

/// Mutex type used for channels.
pub(crate) type ChannelMutex = CriticalSectionRawMutex;

/// Inbound application datagram channel, filled by the transport receive path.
pub type DatagramChannel = Channel<ChannelMutex, Vec<u8>, DATAGRAM_QUEUE_SIZE>;

/// Time source trait for real or simulated time.
///
/// # Example (testing with MockClock)
///
/// ```
/// use grayhole::traits::test_impls::MockClock;
/// use grayhole::{Clock, Duration, Timestamp};
///
/// let clock = MockClock::new();
/// assert_eq!(clock.now(), Timestamp::ZERO);
///
/// clock.advance(Duration::from_secs(10));
/// assert_eq!(clock.now(), Timestamp::from_secs(10));
/// ```
///
/// # Example (embedded with embassy)
///
/// ```text
/// struct EmbassyClock;
///
/// impl Clock for EmbassyClock {
///     type SleepFuture<'a> = embassy_time::Timer;
///
///     fn now(&self) -> Timestamp {
///         Timestamp::from_millis(embassy_time::Instant::now().as_millis())
///     }
///
///     fn sleep_until(&self, time: Timestamp) -> Self::SleepFuture<'_> {
///         embassy_time::Timer::at(embassy_time::Instant::from_millis(time.as_millis()))
///     }
/// }
/// ```
pub trait Clock {
    /// Future type returned by sleep_until.
    type SleepFuture<'a>: Future<Output = ()>
    where
        Self: 'a;

    /// Monotonic milliseconds since start.
    fn now(&self) -> Timestamp;

    /// Sleep until the given timestamp.
    fn sleep_until(&self, time: Timestamp) -> Self::SleepFuture<'_>;
}

/// Uniform random integer source.
///
/// Used for send jitter and the per-packet drop draw.
pub trait Random {
    /// Generate a random u64 in the range [min, max).
    fn gen_range(&mut self, min: u64, max: u64) -> u64;
}

/// View of the routing-tree protocol running underneath the node.
pub trait Routing {
    /// Whether the node currently belongs to a tree.
    fn has_joined(&self) -> bool;

    /// Address of the tree anchor, if known.
    fn anchor_address(&self) -> Option<LinkAddr>;

    /// Start a new tree with this node as the anchor.
    fn start_as_anchor(&mut self);

    /// Identity and rank of the current preferred parent.
    ///
    /// The anchor itself, or a node that has not selected a parent yet,
    /// reports `None`.
    fn preferred_parent(&self) -> Option<(NodeId, Rank)>;
}

/// Datagram transport toward other nodes.
pub trait Transport {
    /// This node's own link-layer address.
    fn local_addr(&self) -> LinkAddr;

    /// Whether `addr` is one of this node's own addresses.
    fn is_local_addr(&self, addr: &LinkAddr) -> bool {
        *addr == self.local_addr()
    }

    /// Request delivery of `payload` to `dst` on UDP port `port`.
    ///
    /// The outcome is known synchronously. Failures are final.
    fn send_datagram(&mut self, payload: &[u8], dst: LinkAddr, port: u16) -> Result<(), SendError>;
}

/// Hooks on the local packet-processing pipeline.
///
/// The substrate calls these by reference once per packet on each path,
/// synchronously, before it continues processing. Implemented by
/// [`Node`](crate::Node).
pub trait PacketHooks {
    /// A packet entered the local node.
    fn on_packet_in(&mut self, packet: &PacketInfo) -> Verdict;

    /// A packet is about to leave the local node.
    fn on_packet_out(&mut self, packet: &PacketInfo) -> Verdict;
}

#[cfg(any(test, feature = "test-support"))]
pub mod test_impls {
    //! Mock implementations of traits for unit testing and doc tests.
    //!
    //! Available when running tests or with the `test-support` feature enabled.

    use alloc::vec::Vec;
    use core::cell::Cell;
    use core::future::{ready, Ready};

    use super::*;
    use crate::time::Duration;

    /// Mock clock for testing (synchronous, time advances manually).
    pub struct MockClock {
        current: Cell<Timestamp>,
    }

    impl Default for MockClock {
        fn default() -> Self {
            Self {
                current: Cell::new(Timestamp::ZERO),
            }
        }
    }

    impl MockClock {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn at(time: Timestamp) -> Self {
            Self {
                current: Cell::new(time),
            }
        }

        pub fn set(&self, time: Timestamp) {
            self.current.set(time);
        }

        pub fn advance(&self, duration: Duration) {
            self.current.set(self.current.get() + duration);
        }
    }

    impl Clock for MockClock {
        type SleepFuture<'a> = Ready<()>;

        fn now(&self) -> Timestamp {
            self.current.get()
        }

        fn sleep_until(&self, _time: Timestamp) -> Self::SleepFuture<'_> {
            // Test code advances time manually.
            ready(())
        }
    }

    /// Mock random for testing (deterministic LCG).
    pub struct MockRandom {
        pub state: u64,
    }

    impl Default for MockRandom {
        fn default() -> Self {
            Self { state: 12345 }
        }
    }

    impl MockRandom {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_seed(seed: u64) -> Self {
            Self { state: seed }
        }
    }

    impl Random for MockRandom {
        fn gen_range(&mut self, min: u64, max: u64) -> u64 {
            self.state = self.state.wrapping_mul(6364136223846793005).wrapping_add(1);
            let range = max.saturating_sub(min);
            if range == 0 {
                return min;
            }
            // Low LCG bits cycle with short periods.
            min + ((self.state >> 33) % range)
        }
    }

    /// Replays a fixed list of raw draws, cycling when exhausted.
    ///
    /// Each draw is reduced into the requested range, so `[0, 999]` draws
    /// map one-to-one onto the drop decision.
    pub struct ScriptedRandom {
        values: Vec<u64>,
        next: usize,
    }

    impl ScriptedRandom {
        pub fn new(values: Vec<u64>) -> Self {
            Self { values, next: 0 }
        }

        /// Number of draws taken so far.
        pub fn draws(&self) -> usize {
            self.next
        }
    }

    impl Random for ScriptedRandom {
        fn gen_range(&mut self, min: u64, max: u64) -> u64 {
            let range = max.saturating_sub(min);
            if range == 0 || self.values.is_empty() {
                self.next += 1;
                return min;
            }
            let raw = self.values[self.next % self.values.len()];
            self.next += 1;
            min + raw % range
        }
    }

    /// Mock routing view with directly settable state.
    #[derive(Debug, Default)]
    pub struct MockRouting {
        pub joined: bool,
        pub anchor: Option<LinkAddr>,
        pub parent: Option<(NodeId, Rank)>,
        pub anchor_started: bool,
    }

    impl MockRouting {
        pub fn new() -> Self {
            Self::default()
        }

        /// A node that has joined a tree anchored at `anchor`.
        pub fn joined_to(anchor: NodeId) -> Self {
            Self {
                joined: true,
                anchor: Some(LinkAddr::from_node_id(anchor)),
                parent: None,
                anchor_started: false,
            }
        }
    }

    impl Routing for MockRouting {
        fn has_joined(&self) -> bool {
            self.joined
        }

        fn anchor_address(&self) -> Option<LinkAddr> {
            self.anchor
        }

        fn start_as_anchor(&mut self) {
            self.anchor_started = true;
            self.joined = true;
        }

        fn preferred_parent(&self) -> Option<(NodeId, Rank)> {
            self.parent
        }
    }

    /// A datagram captured by [`MockTransport`].
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct SentDatagram {
        pub payload: Vec<u8>,
        pub dst: LinkAddr,
        pub port: u16,
    }

    /// Mock transport recording every send request.
    pub struct MockTransport {
        local: LinkAddr,
        pub sent: Vec<SentDatagram>,
        /// When set, every send fails with this error (after being recorded).
        pub fail_with: Option<SendError>,
    }

    impl MockTransport {
        pub fn new(id: NodeId) -> Self {
            Self {
                local: LinkAddr::from_node_id(id),
                sent: Vec::new(),
                fail_with: None,
            }
        }

        pub fn take_sent(&mut self) -> Vec<SentDatagram> {
            core::mem::take(&mut self.sent)
        }
    }

    impl Transport for MockTransport {
        fn local_addr(&self) -> LinkAddr {
            self.local
        }

        fn send_datagram(
            &mut self,
            payload: &[u8],
            dst: LinkAddr,
            port: u16,
        ) -> Result<(), SendError> {
            self.sent.push(SentDatagram {
                payload: payload.to_vec(),
                dst,
                port,
            });
            match self.fail_with {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use alloc::vec;

        #[test]
        fn test_scripted_random_cycles() {
            let mut rng = ScriptedRandom::new(vec![5, 1500]);
            assert_eq!(rng.gen_range(0, 1000), 5);
            assert_eq!(rng.gen_range(0, 1000), 500);
            assert_eq!(rng.gen_range(10, 20), 15);
            assert_eq!(rng.draws(), 3);
        }

        #[test]
        fn test_mock_random_in_range() {
            let mut rng = MockRandom::with_seed(7);
            for _ in 0..1000 {
                let v = rng.gen_range(100, 110);
                assert!((100..110).contains(&v));
            }
            assert_eq!(rng.gen_range(3, 3), 3);
        }

        #[test]
        fn test_mock_transport_records_failed_sends() {
            let mut transport = MockTransport::new(2);
            transport.fail_with = Some(SendError::NoRoute);
            let result = transport.send_datagram(&[1, 2], LinkAddr::from_node_id(1), 3000);
            assert_eq!(result, Err(SendError::NoRoute));
            assert_eq!(transport.take_sent().len(), 1);
            assert!(transport.is_local_addr(&LinkAddr::from_node_id(2)));
        }
    }
}
