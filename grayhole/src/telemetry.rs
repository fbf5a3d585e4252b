//! Structured observation records.
//!
//! Every observable state change of a node is written through a
//! [`TelemetrySink`] as one [`TelemetryRecord`]. The textual form is one line
//! per record:
//!
//! ```text
//! OBS ts=<ms> node=<id> ev=<KIND>[ key=value]*
//! ```
//!
//! The key set of each kind is fixed; analysis tooling parses these lines
//! back, so changing a key or its formatting is a breaking change.

use alloc::vec::Vec;
use core::fmt;
use core::str::FromStr;

use crate::time::Timestamp;
use crate::types::{NodeId, Rank};

/// Line prefix of every record.
pub const RECORD_PREFIX: &str = "OBS";

/// Reason carried by a drop record. Only deliberate drops are recorded.
pub const DROP_REASON_ATTACK: &str = "attack";

/// Trait for receiving telemetry records from a node.
/// Implemented by platforms (UART/log writers) and test harnesses.
pub trait TelemetrySink {
    /// Append one record. Records from one node arrive in emission order.
    fn emit(&mut self, record: TelemetryRecord);
}

impl<S: TelemetrySink + ?Sized> TelemetrySink for &mut S {
    fn emit(&mut self, record: TelemetryRecord) {
        (**self).emit(record)
    }
}

/// Tag identifying the kind of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    Root,
    Parent,
    DataRx,
    DataFwd,
    DataDrop,
    AttackStart,
    RootRx,
    Delay,
    DataTx,
    AttackStats,
}

impl EventKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            EventKind::Root => "ROOT",
            EventKind::Parent => "PARENT",
            EventKind::DataRx => "DATA_RX",
            EventKind::DataFwd => "DATA_FWD",
            EventKind::DataDrop => "DATA_DROP",
            EventKind::AttackStart => "ATTACK_START",
            EventKind::RootRx => "ROOT_RX",
            EventKind::Delay => "DELAY",
            EventKind::DataTx => "DATA_TX",
            EventKind::AttackStats => "ATTACK_STATS",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown event tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownEventKind;

impl fmt::Display for UnknownEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown event kind")
    }
}

impl FromStr for EventKind {
    type Err = UnknownEventKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "ROOT" => EventKind::Root,
            "PARENT" => EventKind::Parent,
            "DATA_RX" => EventKind::DataRx,
            "DATA_FWD" => EventKind::DataFwd,
            "DATA_DROP" => EventKind::DataDrop,
            "ATTACK_START" => EventKind::AttackStart,
            "ROOT_RX" => EventKind::RootRx,
            "DELAY" => EventKind::Delay,
            "DATA_TX" => EventKind::DataTx,
            "ATTACK_STATS" => EventKind::AttackStats,
            _ => return Err(UnknownEventKind),
        })
    }
}

/// Kind-specific payload of a record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TelemetryEvent {
    /// Node started as tree anchor.
    Root,
    /// Preferred parent changed.
    Parent { parent: NodeId, rank: Rank },
    /// Matching packet seen on the attacker's inbound path.
    DataRx,
    /// Relayed matching packet let through.
    DataFwd,
    /// Relayed matching packet discarded.
    DataDrop,
    /// Interceptor installed with the given rate.
    AttackStart { rate: f64 },
    /// Anchor received a data packet.
    RootRx { seq: u32, src: NodeId },
    /// End-to-end delay of a received data packet.
    Delay { seq: u32, src: NodeId, delay_ms: u32 },
    /// Data packet handed to the transport.
    DataTx { seq: u32, dst: NodeId },
    /// Snapshot of the attack counters.
    AttackStats { recv: u32, fwd: u32, drop: u32 },
}

impl TelemetryEvent {
    pub const fn kind(&self) -> EventKind {
        match self {
            TelemetryEvent::Root => EventKind::Root,
            TelemetryEvent::Parent { .. } => EventKind::Parent,
            TelemetryEvent::DataRx => EventKind::DataRx,
            TelemetryEvent::DataFwd => EventKind::DataFwd,
            TelemetryEvent::DataDrop => EventKind::DataDrop,
            TelemetryEvent::AttackStart { .. } => EventKind::AttackStart,
            TelemetryEvent::RootRx { .. } => EventKind::RootRx,
            TelemetryEvent::Delay { .. } => EventKind::Delay,
            TelemetryEvent::DataTx { .. } => EventKind::DataTx,
            TelemetryEvent::AttackStats { .. } => EventKind::AttackStats,
        }
    }
}

/// One observation: when, where, and what.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetryRecord {
    pub ts: Timestamp,
    pub node: NodeId,
    pub event: TelemetryEvent,
}

impl TelemetryRecord {
    pub fn kind(&self) -> EventKind {
        self.event.kind()
    }
}

impl fmt::Display for TelemetryRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ts={} node={} ev={}",
            RECORD_PREFIX,
            self.ts.as_millis(),
            self.node,
            self.event.kind()
        )?;
        match self.event {
            TelemetryEvent::Root
            | TelemetryEvent::DataRx
            | TelemetryEvent::DataFwd => Ok(()),
            TelemetryEvent::Parent { parent, rank } => write!(f, " parent={parent} rank={rank}"),
            TelemetryEvent::DataDrop => write!(f, " reason={DROP_REASON_ATTACK}"),
            TelemetryEvent::AttackStart { rate } => write!(f, " rate={rate:.2}"),
            TelemetryEvent::RootRx { seq, src } => write!(f, " seq={seq} src={src}"),
            TelemetryEvent::Delay { seq, src, delay_ms } => {
                write!(f, " seq={seq} src={src} delay_ms={delay_ms}")
            }
            TelemetryEvent::DataTx { seq, dst } => write!(f, " seq={seq} dst={dst}"),
            TelemetryEvent::AttackStats { recv, fwd, drop } => {
                write!(f, " recv={recv} fwd={fwd} drop={drop}")
            }
        }
    }
}

/// Per-node emitter stamping records with the node id.
pub struct Telemetry<S> {
    node: NodeId,
    sink: S,
}

impl<S: TelemetrySink> Telemetry<S> {
    pub fn new(node: NodeId, sink: S) -> Self {
        Self { node, sink }
    }

    pub fn emit(&mut self, ts: Timestamp, event: TelemetryEvent) {
        self.sink.emit(TelemetryRecord {
            ts,
            node: self.node,
            event,
        });
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }
}

/// Sink collecting records in memory, in emission order.
#[derive(Debug, Default, Clone)]
pub struct VecSink {
    records: Vec<TelemetryRecord>,
}

impl VecSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[TelemetryRecord] {
        &self.records
    }

    /// Records of a single kind, in emission order.
    pub fn of_kind(&self, kind: EventKind) -> impl Iterator<Item = &TelemetryRecord> + '_ {
        self.records.iter().filter(move |r| r.kind() == kind)
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.of_kind(kind).count()
    }

    pub fn take(&mut self) -> Vec<TelemetryRecord> {
        core::mem::take(&mut self.records)
    }
}

impl TelemetrySink for VecSink {
    fn emit(&mut self, record: TelemetryRecord) {
        self.records.push(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    fn line(event: TelemetryEvent) -> alloc::string::String {
        TelemetryRecord {
            ts: Timestamp::from_millis(30_512),
            node: 6,
            event,
        }
        .to_string()
    }

    #[test]
    fn test_record_lines() {
        assert_eq!(line(TelemetryEvent::Root), "OBS ts=30512 node=6 ev=ROOT");
        assert_eq!(
            line(TelemetryEvent::Parent { parent: 3, rank: 512 }),
            "OBS ts=30512 node=6 ev=PARENT parent=3 rank=512"
        );
        assert_eq!(line(TelemetryEvent::DataRx), "OBS ts=30512 node=6 ev=DATA_RX");
        assert_eq!(line(TelemetryEvent::DataFwd), "OBS ts=30512 node=6 ev=DATA_FWD");
        assert_eq!(
            line(TelemetryEvent::DataDrop),
            "OBS ts=30512 node=6 ev=DATA_DROP reason=attack"
        );
        assert_eq!(
            line(TelemetryEvent::AttackStart { rate: 0.3 }),
            "OBS ts=30512 node=6 ev=ATTACK_START rate=0.30"
        );
        assert_eq!(
            line(TelemetryEvent::RootRx { seq: 4, src: 2 }),
            "OBS ts=30512 node=6 ev=ROOT_RX seq=4 src=2"
        );
        assert_eq!(
            line(TelemetryEvent::Delay { seq: 4, src: 2, delay_ms: 87 }),
            "OBS ts=30512 node=6 ev=DELAY seq=4 src=2 delay_ms=87"
        );
        assert_eq!(
            line(TelemetryEvent::DataTx { seq: 1, dst: 1 }),
            "OBS ts=30512 node=6 ev=DATA_TX seq=1 dst=1"
        );
        assert_eq!(
            line(TelemetryEvent::AttackStats { recv: 10, fwd: 7, drop: 3 }),
            "OBS ts=30512 node=6 ev=ATTACK_STATS recv=10 fwd=7 drop=3"
        );
    }

    #[test]
    fn test_event_kind_parse() {
        for kind in [
            EventKind::Root,
            EventKind::Parent,
            EventKind::DataRx,
            EventKind::DataFwd,
            EventKind::DataDrop,
            EventKind::AttackStart,
            EventKind::RootRx,
            EventKind::Delay,
            EventKind::DataTx,
            EventKind::AttackStats,
        ] {
            assert_eq!(kind.as_str().parse::<EventKind>(), Ok(kind));
        }
        assert_eq!("data_tx".parse::<EventKind>(), Err(UnknownEventKind));
    }

    #[test]
    fn test_telemetry_stamps_node() {
        let mut telemetry = Telemetry::new(9, VecSink::new());
        telemetry.emit(Timestamp::from_secs(1), TelemetryEvent::DataFwd);
        telemetry.emit(Timestamp::from_secs(2), TelemetryEvent::DataDrop);

        let records = telemetry.sink().records();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.node == 9));
        assert_eq!(records[1].ts, Timestamp::from_secs(2));
        assert_eq!(telemetry.sink().count(EventKind::DataDrop), 1);
    }
}
