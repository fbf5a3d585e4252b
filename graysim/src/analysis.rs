//! Offline analysis of OBS logs.
//!
//! Reconstructs delivery ratio, delay and jitter per sender, the attacker's
//! exposure per time window, and the routing paths and parent residence
//! times implied by PARENT records. Input is the textual log, so the same analysis runs on a
//! simulator log and on a serial capture from hardware.

use std::collections::{BTreeMap, BTreeSet};
use std::io::BufRead;
use std::str::FromStr;

use grayhole::telemetry::RECORD_PREFIX;
use grayhole::{
    Duration, EventKind, NodeId, TelemetryEvent, TelemetryRecord, Timestamp,
};
use serde::Serialize;

use crate::error::SimResult;

/// Default analysis window.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(600);

/// Upper bound on a reconstructed path, guarding against parent cycles.
const MAX_PATH_LEN: usize = 100;

/// Parse one OBS line.
///
/// Anything before the `OBS ` marker (a timestamp or mote prefix added by
/// a capture tool) is ignored. Returns `None` for lines that are not
/// records or lack a key their kind requires.
pub fn parse_line(line: &str) -> Option<TelemetryRecord> {
    let marker = format!("{RECORD_PREFIX} ");
    let start = line.find(&marker)?;
    let body = &line[start + marker.len()..];

    let fields: BTreeMap<&str, &str> = body
        .split_whitespace()
        .filter_map(|token| token.split_once('='))
        .collect();

    fn get<T: FromStr>(fields: &BTreeMap<&str, &str>, key: &str) -> Option<T> {
        fields.get(key)?.parse().ok()
    }

    let ts = Timestamp::from_millis(get(&fields, "ts")?);
    let node: NodeId = get(&fields, "node")?;
    let kind: EventKind = get(&fields, "ev")?;

    let event = match kind {
        EventKind::Root => TelemetryEvent::Root,
        EventKind::Parent => TelemetryEvent::Parent {
            parent: get(&fields, "parent")?,
            rank: get(&fields, "rank")?,
        },
        EventKind::DataRx => TelemetryEvent::DataRx,
        EventKind::DataFwd => TelemetryEvent::DataFwd,
        EventKind::DataDrop => TelemetryEvent::DataDrop,
        EventKind::AttackStart => TelemetryEvent::AttackStart {
            rate: get(&fields, "rate")?,
        },
        EventKind::RootRx => TelemetryEvent::RootRx {
            seq: get(&fields, "seq")?,
            src: get(&fields, "src")?,
        },
        EventKind::Delay => TelemetryEvent::Delay {
            seq: get(&fields, "seq")?,
            src: get(&fields, "src")?,
            delay_ms: get(&fields, "delay_ms")?,
        },
        EventKind::DataTx => TelemetryEvent::DataTx {
            seq: get(&fields, "seq")?,
            dst: get(&fields, "dst")?,
        },
        EventKind::AttackStats => TelemetryEvent::AttackStats {
            recv: get(&fields, "recv")?,
            fwd: get(&fields, "fwd")?,
            drop: get(&fields, "drop")?,
        },
    };

    Some(TelemetryRecord { ts, node, event })
}

/// Parse every record in a log text, skipping lines that are not records.
pub fn parse_log(text: &str) -> Vec<TelemetryRecord> {
    text.lines().filter_map(parse_line).collect()
}

/// Parse a log from a reader.
///
/// Invalid UTF-8 is replaced rather than rejected, so a corrupted line in a
/// serial capture costs that line only. Read failures are returned.
pub fn parse_reader<R: BufRead>(mut reader: R) -> SimResult<Vec<TelemetryRecord>> {
    let mut records = Vec::new();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        if let Some(record) = parse_line(&String::from_utf8_lossy(&buf)) {
            records.push(record);
        }
    }
    Ok(records)
}

/// Zero-based window index of a timestamp.
fn window_index(ts: Timestamp, window: Duration) -> u64 {
    ts.as_millis() / window.as_millis().max(1)
}

/// Window label as used in reports (`t1` is the first window).
pub fn window_label(index: u64) -> String {
    format!("t{}", index + 1)
}

/// Delivery performance of one node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceReport {
    pub node: NodeId,
    /// DATA_TX records emitted by the node.
    pub tx: u32,
    /// ROOT_RX records naming the node as source.
    pub rx: u32,
    /// DATA_DROP records emitted by the node.
    pub drops: u32,
    /// `rx / tx`, 0 when nothing was sent.
    pub pdr: f64,
    pub mean_delay_ms: f64,
    /// Population standard deviation of the delays.
    pub jitter_ms: f64,
    /// Changes between distinct reported parents.
    pub parent_churn: u32,
    /// Rate announced in ATTACK_START, 0 for other nodes.
    pub attack_rate: f64,
}

/// Attacker activity in one window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExposureRow {
    pub window: String,
    pub attacker: Option<NodeId>,
    pub recv: u32,
    pub fwd: u32,
    pub drop: u32,
    /// ROOT_RX records over the whole log.
    pub root_rx_total: u32,
    /// `recv / root_rx_total`, 0 when the root received nothing.
    pub exposure: f64,
}

/// Path from a node to the root as known at the end of a window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PathRow {
    pub window: String,
    pub node: NodeId,
    /// Hops joined by `>`, e.g. `4>6>1`.
    pub path: String,
}

/// Structural metrics of the routing paths in one window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StructureRow {
    pub window: String,
    /// Mean hop count of the window's paths.
    pub avg_path_length: f64,
    /// Number of distinct paths.
    pub path_diversity: usize,
    /// Fraction of paths that traverse the attacker.
    pub attack_exposure: f64,
}

/// Time a node spent attached to one parent, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParentInterval {
    pub node: NodeId,
    pub parent: NodeId,
    pub t_start: u64,
    /// Next parent change, or the last timestamp of the log.
    pub t_end: u64,
    pub duration: u64,
}

/// Share of a node's observed lifetime spent under one parent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParentShare {
    pub node: NodeId,
    pub parent: NodeId,
    pub pi: f64,
}

/// Aggregate figures over all senders.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Totals {
    pub tx: u32,
    pub rx: u32,
    pub pdr: f64,
    pub mean_delay_ms: f64,
    pub dropped: u32,
}

/// Everything derived from one log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub window_ms: u64,
    pub root: Option<NodeId>,
    pub attacker: Option<NodeId>,
    pub attack_rate: Option<f64>,
    pub totals: Totals,
    pub performance: Vec<PerformanceReport>,
    pub exposure: Vec<ExposureRow>,
    pub paths: Vec<PathRow>,
    pub structure: Vec<StructureRow>,
    pub parent_intervals: Vec<ParentInterval>,
    pub parent_shares: Vec<ParentShare>,
    /// Every `(node, parent)` pair observed in a PARENT record.
    pub neighbors: Vec<(NodeId, NodeId)>,
}

impl Summary {
    pub fn to_json(&self) -> SimResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

fn ratio(num: u32, den: u32) -> f64 {
    if den == 0 {
        0.0
    } else {
        f64::from(num) / f64::from(den)
    }
}

/// Mean and population standard deviation.
fn mean_and_jitter(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

/// Follow parent pointers from `node` to the first node without one.
fn construct_path(node: NodeId, parents: &BTreeMap<NodeId, NodeId>) -> Vec<NodeId> {
    let mut path = vec![node];
    let mut visited = BTreeSet::new();
    let mut current = node;
    while let Some(&parent) = parents.get(&current) {
        if !visited.insert(current) || path.len() > MAX_PATH_LEN {
            break;
        }
        path.push(parent);
        current = parent;
    }
    path
}

fn format_path(path: &[NodeId]) -> String {
    path.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(">")
}

#[derive(Default)]
struct NodeTally {
    tx: u32,
    rx: u32,
    drops: u32,
    delays: Vec<f64>,
    churn: u32,
    last_parent: Option<NodeId>,
}

#[derive(Default)]
struct WindowTally {
    recv: u32,
    fwd: u32,
    drop: u32,
    /// Parents reported during the window.
    parents: BTreeMap<NodeId, NodeId>,
}

/// Analyze a record stream with the given window length.
pub fn analyze(records: &[TelemetryRecord], window: Duration) -> Summary {
    let mut nodes: BTreeMap<NodeId, NodeTally> = BTreeMap::new();
    let mut windows: BTreeMap<u64, WindowTally> = BTreeMap::new();
    let mut root = None;
    let mut attacker = None;
    let mut attack_rates: BTreeMap<NodeId, f64> = BTreeMap::new();
    let mut root_rx_total = 0u32;
    let mut parent_changes: BTreeMap<NodeId, Vec<(u64, NodeId)>> = BTreeMap::new();
    let mut end_ms = 0u64;

    for record in records {
        let w = window_index(record.ts, window);
        windows.entry(w).or_default();
        end_ms = end_ms.max(record.ts.as_millis());
        match record.event {
            TelemetryEvent::Root => root = Some(record.node),
            TelemetryEvent::Parent { parent, .. } => {
                let tally = nodes.entry(record.node).or_default();
                if tally.last_parent.is_some_and(|last| last != parent) {
                    tally.churn += 1;
                }
                tally.last_parent = Some(parent);
                windows.entry(w).or_default().parents.insert(record.node, parent);
                parent_changes
                    .entry(record.node)
                    .or_default()
                    .push((record.ts.as_millis(), parent));
            }
            TelemetryEvent::DataTx { .. } => nodes.entry(record.node).or_default().tx += 1,
            TelemetryEvent::RootRx { src, .. } => {
                nodes.entry(src).or_default().rx += 1;
                root_rx_total += 1;
            }
            TelemetryEvent::Delay { src, delay_ms, .. } => {
                nodes.entry(src).or_default().delays.push(f64::from(delay_ms));
            }
            TelemetryEvent::DataRx => windows.entry(w).or_default().recv += 1,
            TelemetryEvent::DataFwd => windows.entry(w).or_default().fwd += 1,
            TelemetryEvent::DataDrop => {
                windows.entry(w).or_default().drop += 1;
                nodes.entry(record.node).or_default().drops += 1;
            }
            TelemetryEvent::AttackStart { rate } => {
                attack_rates.insert(record.node, rate);
                attacker = Some(record.node);
            }
            TelemetryEvent::AttackStats { .. } => {}
        }
    }

    let performance: Vec<PerformanceReport> = nodes
        .iter()
        .filter(|(_, t)| t.tx > 0 || t.rx > 0 || t.drops > 0)
        .map(|(&node, t)| {
            let (mean_delay_ms, jitter_ms) = mean_and_jitter(&t.delays);
            PerformanceReport {
                node,
                tx: t.tx,
                rx: t.rx,
                drops: t.drops,
                pdr: ratio(t.rx, t.tx),
                mean_delay_ms,
                jitter_ms,
                parent_churn: t.churn,
                attack_rate: attack_rates.get(&node).copied().unwrap_or(0.0),
            }
        })
        .collect();

    let exposure = windows
        .iter()
        .filter(|(_, t)| t.recv > 0 || t.fwd > 0 || t.drop > 0)
        .map(|(&w, t)| ExposureRow {
            window: window_label(w),
            attacker,
            recv: t.recv,
            fwd: t.fwd,
            drop: t.drop,
            root_rx_total,
            exposure: ratio(t.recv, root_rx_total),
        })
        .collect();

    // PARENT records mark changes only, so each window starts from the
    // parents known at the end of the previous one. Windows without any
    // record produce no rows.
    let mut paths = Vec::new();
    let mut structure = Vec::new();
    let mut known: BTreeMap<NodeId, NodeId> = BTreeMap::new();
    for (&w, tally) in &windows {
        known.extend(tally.parents.iter().map(|(&n, &p)| (n, p)));
        if known.is_empty() {
            continue;
        }
        let label = window_label(w);
        let window_paths: Vec<Vec<NodeId>> = known
            .keys()
            .map(|&node| construct_path(node, &known))
            .collect();
        for path in &window_paths {
            paths.push(PathRow {
                window: label.clone(),
                node: path[0],
                path: format_path(path),
            });
        }
        structure.push(structure_row(label, &window_paths, attacker));
    }

    let total_tx: u32 = performance.iter().map(|p| p.tx).sum();
    let total_rx: u32 = performance.iter().map(|p| p.rx).sum();
    let all_delays: Vec<f64> = nodes.values().flat_map(|t| t.delays.iter().copied()).collect();
    let dropped = windows.values().map(|t| t.drop).sum();
    let parent_intervals = parent_intervals(parent_changes, end_ms);
    let (parent_shares, neighbors) = parent_shares(&parent_intervals);

    Summary {
        window_ms: window.as_millis(),
        root,
        attacker,
        attack_rate: attacker.and_then(|a| attack_rates.get(&a).copied()),
        totals: Totals {
            tx: total_tx,
            rx: total_rx,
            pdr: ratio(total_rx, total_tx),
            mean_delay_ms: mean_and_jitter(&all_delays).0,
            dropped,
        },
        performance,
        exposure,
        paths,
        structure,
        parent_intervals,
        parent_shares,
        neighbors,
    }
}

/// Residence intervals per node, repeated reports of the same parent merged.
fn parent_intervals(
    changes: BTreeMap<NodeId, Vec<(u64, NodeId)>>,
    end_ms: u64,
) -> Vec<ParentInterval> {
    let mut intervals = Vec::new();
    for (node, mut reports) in changes {
        reports.sort_by_key(|&(ts, _)| ts);
        reports.dedup_by(|later, earlier| later.1 == earlier.1);
        for (i, &(t_start, parent)) in reports.iter().enumerate() {
            let t_end = reports.get(i + 1).map_or(end_ms, |&(ts, _)| ts);
            intervals.push(ParentInterval {
                node,
                parent,
                t_start,
                t_end,
                duration: t_end - t_start,
            });
        }
    }
    intervals
}

/// Per-parent share of each node's total residence time. Nodes whose
/// intervals sum to zero have no shares.
fn parent_shares(intervals: &[ParentInterval]) -> (Vec<ParentShare>, Vec<(NodeId, NodeId)>) {
    let mut per_node: BTreeMap<NodeId, BTreeMap<NodeId, u64>> = BTreeMap::new();
    for interval in intervals {
        *per_node
            .entry(interval.node)
            .or_default()
            .entry(interval.parent)
            .or_default() += interval.duration;
    }

    let mut shares = Vec::new();
    let mut neighbors = Vec::new();
    for (node, by_parent) in per_node {
        let total: u64 = by_parent.values().sum();
        if total == 0 {
            continue;
        }
        for (parent, duration) in by_parent {
            neighbors.push((node, parent));
            shares.push(ParentShare {
                node,
                parent,
                pi: duration as f64 / total as f64,
            });
        }
    }
    (shares, neighbors)
}

fn structure_row(window: String, paths: &[Vec<NodeId>], attacker: Option<NodeId>) -> StructureRow {
    let hops: Vec<f64> = paths.iter().map(|p| p.len().saturating_sub(1) as f64).collect();
    let distinct: BTreeSet<&Vec<NodeId>> = paths.iter().collect();
    let exposed = attacker.map_or(0, |a| paths.iter().filter(|p| p.contains(&a)).count());
    StructureRow {
        window,
        avg_path_length: mean_and_jitter(&hops).0,
        path_diversity: distinct.len(),
        attack_exposure: if paths.is_empty() {
            0.0
        } else {
            exposed as f64 / paths.len() as f64
        },
    }
}
