//! Preferred-parent change detection.
//!
//! Polled on a fixed period. Churn counts changes between two distinct
//! defined parents only: the first parent a node ever reports is not churn,
//! and neither is a poll that reports no parent at all.

use crate::node::Node;
use crate::telemetry::{TelemetryEvent, TelemetrySink};
use crate::time::Timestamp;
use crate::traits::{Clock, Random, Routing, Transport};
use crate::types::{NodeId, ParentState, Rank};

#[derive(Debug, Clone, Default)]
pub struct ParentTracker {
    state: ParentState,
    deadline: Option<Timestamp>,
}

impl ParentTracker {
    pub const fn new() -> Self {
        Self {
            state: ParentState {
                current_parent: None,
                rank: 0,
                churn: 0,
            },
            deadline: None,
        }
    }

    pub fn state(&self) -> &ParentState {
        &self.state
    }

    pub fn deadline(&self) -> Option<Timestamp> {
        self.deadline
    }

    pub fn arm(&mut self, at: Timestamp) {
        self.deadline = Some(at);
    }

    /// Record the currently reported parent.
    ///
    /// Returns `true` when it differs from the stored one, i.e. when a
    /// PARENT record is due.
    pub fn observe(&mut self, parent: NodeId, rank: Rank) -> bool {
        match self.state.current_parent {
            Some(current) if current == parent => return false,
            Some(_) => self.state.churn = self.state.churn.saturating_add(1),
            None => {}
        }
        self.state.current_parent = Some(parent);
        self.state.rank = rank;
        true
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
    /// Handle the parent poll timer.
    pub(crate) fn handle_parent_poll(&mut self, now: Timestamp) {
        if self.routing.has_joined() {
            if let Some((parent, rank)) = self.routing.preferred_parent() {
                if self.parent.observe(parent, rank) {
                    self.telemetry
                        .emit(now, TelemetryEvent::Parent { parent, rank });
                }
            }
        }
        self.parent.arm(now + self.config.parent_poll_period);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExperimentConfig;
    use crate::node::NodeEvent;
    use crate::telemetry::{EventKind, VecSink};
    use crate::traits::test_impls::{MockClock, MockRandom, MockRouting, MockTransport};
    use crate::types::TimerKind;

    type TestNode = Node<MockTransport, MockRouting, MockRandom, MockClock, VecSink>;

    fn node(routing: MockRouting) -> TestNode {
        let mut node = Node::new(
            MockTransport::new(3),
            routing,
            MockRandom::new(),
            MockClock::new(),
            VecSink::new(),
            ExperimentConfig::DEFAULT,
        )
        .unwrap();
        node.start();
        node
    }

    fn poll(node: &mut TestNode) {
        let deadline = node.deadline(TimerKind::ParentPoll).unwrap();
        node.clock().set(deadline);
        node.dispatch(NodeEvent::TimerFired(TimerKind::ParentPoll));
    }

    #[test]
    fn test_first_parent_is_not_churn() {
        let mut tracker = ParentTracker::new();
        assert!(tracker.observe(2, 512));
        assert_eq!(tracker.state().churn, 0);
        assert_eq!(tracker.state().current_parent, Some(2));
    }

    #[test]
    fn test_unset_a_b_counts_once() {
        let mut tracker = ParentTracker::new();
        tracker.observe(2, 512);
        assert!(!tracker.observe(2, 768));
        assert!(tracker.observe(5, 768));
        assert_eq!(tracker.state().churn, 1);
        assert!(tracker.observe(2, 512));
        assert_eq!(tracker.state().churn, 2);
    }

    #[test]
    fn test_poll_emits_only_on_change() {
        let mut routing = MockRouting::joined_to(1);
        routing.parent = Some((2, 512));
        let mut node = node(routing);

        poll(&mut node);
        poll(&mut node);
        node.routing_mut().parent = Some((4, 768));
        poll(&mut node);

        let parents: alloc::vec::Vec<_> = node
            .telemetry_sink()
            .of_kind(EventKind::Parent)
            .map(|r| r.event)
            .collect();
        assert_eq!(
            parents,
            [
                TelemetryEvent::Parent { parent: 2, rank: 512 },
                TelemetryEvent::Parent { parent: 4, rank: 768 },
            ]
        );
        assert_eq!(node.parent_state().churn, 1);
        assert_eq!(node.parent_state().rank, 768);
    }

    #[test]
    fn test_missing_parent_is_ignored() {
        let mut routing = MockRouting::joined_to(1);
        routing.parent = Some((2, 512));
        let mut node = node(routing);
        poll(&mut node);

        node.routing_mut().parent = None;
        poll(&mut node);
        node.routing_mut().parent = Some((2, 512));
        poll(&mut node);

        assert_eq!(node.parent_state().churn, 0);
        assert_eq!(node.telemetry_sink().count(EventKind::Parent), 1);
    }

    #[test]
    fn test_not_joined_does_nothing() {
        let mut routing = MockRouting::new();
        routing.parent = Some((2, 512));
        let mut node = node(routing);
        poll(&mut node);

        assert_eq!(node.parent_state().current_parent, None);
        assert_eq!(node.telemetry_sink().count(EventKind::Parent), 0);
        assert_eq!(
            node.deadline(TimerKind::ParentPoll),
            Some(Timestamp::from_secs(20))
        );
    }
}
