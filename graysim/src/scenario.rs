//! Scenario builder, TOML scenario files and the experiment matrix.

use std::path::Path;

use grayhole::{AttackRate, Duration, ExperimentConfig, NodeId, Timestamp};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::analysis::{analyze, DEFAULT_WINDOW};
use crate::error::{SimError, SimResult};
use crate::event::ScenarioAction;
use crate::metrics::SimulationResult;
use crate::sim::Simulator;
use crate::topology::{Link, Topology};

/// Type of topology to generate.
#[derive(Debug, Clone)]
enum TopologyType {
    FullyConnected,
    Chain,
    Star,
    RandomGeometric { radius: f64 },
    Custom(Topology),
}

/// Builder for simulation scenarios.
pub struct ScenarioBuilder {
    node_ids: Vec<NodeId>,
    seed: u64,
    /// Must be chosen explicitly before `build`.
    topology_type: Option<TopologyType>,
    loss_rate: f64,
    delay: Option<Duration>,
    config: ExperimentConfig,
    actions: Vec<(Timestamp, ScenarioAction)>,
    snapshot_interval: Option<Duration>,
}

impl ScenarioBuilder {
    /// Scenario with nodes `1..=num_nodes`.
    pub fn new(num_nodes: u16) -> Self {
        Self::with_node_ids((1..=num_nodes).collect())
    }

    /// Scenario with an explicit set of node ids.
    pub fn with_node_ids(node_ids: Vec<NodeId>) -> Self {
        Self {
            node_ids,
            seed: 42,
            topology_type: None,
            loss_rate: 0.0,
            delay: None,
            config: ExperimentConfig::DEFAULT,
            actions: Vec::new(),
            snapshot_interval: None,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_config(mut self, config: ExperimentConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_attack_rate(mut self, rate: AttackRate) -> Self {
        self.config = self.config.with_attack_rate(rate);
        self
    }

    pub fn topology(mut self, topo: Topology) -> Self {
        self.topology_type = Some(TopologyType::Custom(topo));
        self
    }

    pub fn fully_connected(mut self) -> Self {
        self.topology_type = Some(TopologyType::FullyConnected);
        self
    }

    /// Nodes linked in id order.
    pub fn chain_topology(mut self) -> Self {
        self.topology_type = Some(TopologyType::Chain);
        self
    }

    /// First node id is the hub.
    pub fn star_topology(mut self) -> Self {
        self.topology_type = Some(TopologyType::Star);
        self
    }

    /// Seeded placement in the unit square, linked within `radius`.
    pub fn random_geometric(mut self, radius: f64) -> Self {
        self.topology_type = Some(TopologyType::RandomGeometric { radius });
        self
    }

    pub fn with_loss_rate(mut self, rate: f64) -> Self {
        self.loss_rate = rate.clamp(0.0, 1.0);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_snapshot_interval(mut self, interval: Duration) -> Self {
        self.snapshot_interval = Some(interval);
        self
    }

    pub fn at(mut self, time: Timestamp, action: ScenarioAction) -> Self {
        self.actions.push((time, action));
        self
    }

    pub fn partition_at(self, time: Timestamp, groups: Vec<Vec<NodeId>>) -> Self {
        self.at(time, ScenarioAction::Partition { groups })
    }

    pub fn heal_at(self, time: Timestamp) -> Self {
        self.at(time, ScenarioAction::HealPartition)
    }

    pub fn disable_link_at(self, time: Timestamp, from: NodeId, to: NodeId) -> Self {
        self.at(time, ScenarioAction::DisableLink { from, to })
    }

    pub fn enable_link_at(self, time: Timestamp, from: NodeId, to: NodeId) -> Self {
        self.at(time, ScenarioAction::EnableLink { from, to })
    }

    pub fn snapshot_at(self, time: Timestamp) -> Self {
        self.at(time, ScenarioAction::TakeSnapshot)
    }

    /// Build the simulator with every node started.
    pub fn build(self) -> SimResult<(Simulator, Vec<NodeId>)> {
        self.config.validate()?;
        let ids = &self.node_ids;

        let mut topo = match self.topology_type {
            Some(TopologyType::FullyConnected) => Topology::fully_connected(ids),
            Some(TopologyType::Chain) => Topology::chain(ids),
            Some(TopologyType::Star) => Topology::star(ids),
            Some(TopologyType::RandomGeometric { radius }) => {
                Topology::random_geometric(ids, self.seed, radius)
            }
            Some(TopologyType::Custom(t)) => t,
            None => {
                return Err(SimError::Scenario(
                    "topology must be specified before build".into(),
                ))
            }
        };
        if self.loss_rate > 0.0 {
            topo.set_global_loss_rate(self.loss_rate);
        }
        if let Some(delay) = self.delay {
            topo.set_global_delay(delay);
        }

        let mut sim = Simulator::new(self.seed, self.config).with_topology(topo);
        if let Some(interval) = self.snapshot_interval {
            sim = sim.with_snapshot_interval(interval);
        }

        let mut node_ids = Vec::with_capacity(self.node_ids.len());
        for &id in &self.node_ids {
            node_ids.push(sim.add_node(id)?);
        }
        for (time, action) in self.actions {
            sim.schedule_action(time, action);
        }
        Ok((sim, node_ids))
    }

    pub fn run_for(self, duration: Duration) -> SimResult<SimulationResult> {
        let (mut sim, _) = self.build()?;
        Ok(sim.run_for(duration))
    }

    pub fn run_until(self, time: Timestamp) -> SimResult<SimulationResult> {
        let (mut sim, _) = self.build()?;
        Ok(sim.run_until(time))
    }
}

/// Node set of a scenario file: either `count` (ids `1..=count`) or `ids`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodesSpec {
    #[serde(default)]
    pub count: Option<u16>,
    #[serde(default)]
    pub ids: Option<Vec<NodeId>>,
}

impl NodesSpec {
    fn resolve(&self) -> SimResult<Vec<NodeId>> {
        match (&self.ids, self.count) {
            (Some(ids), None) => Ok(ids.clone()),
            (None, Some(count)) => Ok((1..=count).collect()),
            _ => Err(SimError::Scenario(
                "[nodes] needs exactly one of `count` or `ids`".into(),
            )),
        }
    }
}

/// Shape of the topology in a scenario file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TopologySpec {
    FullyConnected,
    Chain,
    Star,
    RandomGeometric { radius: f64 },
    /// Explicit undirected link list.
    Explicit { links: Vec<(NodeId, NodeId)> },
}

/// Properties applied to every link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkSpec {
    #[serde(default)]
    pub loss_rate: f64,
    #[serde(default = "LinkSpec::default_delay_ms")]
    pub delay_ms: u64,
}

impl LinkSpec {
    fn default_delay_ms() -> u64 {
        Link::default().delay.as_millis()
    }
}

impl Default for LinkSpec {
    fn default() -> Self {
        Self {
            loss_rate: 0.0,
            delay_ms: Self::default_delay_ms(),
        }
    }
}

/// Experiment constants. Omitted keys keep the engine defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExperimentSpec {
    pub root_id: Option<NodeId>,
    pub attacker_id: Option<NodeId>,
    pub attack_rate: Option<f64>,
    pub send_interval_ms: Option<u64>,
    pub send_jitter_ms: Option<u64>,
    pub data_port: Option<u16>,
    pub stats_period_ms: Option<u64>,
    pub parent_poll_period_ms: Option<u64>,
}

impl ExperimentSpec {
    pub fn to_config(&self) -> SimResult<ExperimentConfig> {
        let mut config = ExperimentConfig::DEFAULT;
        if let Some(id) = self.root_id {
            config = config.with_root_id(id);
        }
        if let Some(id) = self.attacker_id {
            config = config.with_attacker_id(id);
        }
        if let Some(rate) = self.attack_rate {
            config = config.with_attack_rate(AttackRate::new(rate)?);
        }
        if let Some(ms) = self.send_interval_ms {
            config = config.with_send_interval(Duration::from_millis(ms));
        }
        if let Some(ms) = self.send_jitter_ms {
            config = config.with_send_jitter(Duration::from_millis(ms));
        }
        if let Some(port) = self.data_port {
            config = config.with_data_port(port);
        }
        if let Some(ms) = self.stats_period_ms {
            config = config.with_stats_period(Duration::from_millis(ms));
        }
        if let Some(ms) = self.parent_poll_period_ms {
            config = config.with_parent_poll_period(Duration::from_millis(ms));
        }
        config.validate()?;
        Ok(config)
    }
}

/// A scheduled topology change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ActionSpec {
    Partition { groups: Vec<Vec<NodeId>> },
    Heal,
    DisableLink { from: NodeId, to: NodeId },
    EnableLink { from: NodeId, to: NodeId },
    SetLossRate { from: NodeId, to: NodeId, rate: f64 },
    Snapshot,
}

impl From<ActionSpec> for ScenarioAction {
    fn from(spec: ActionSpec) -> Self {
        match spec {
            ActionSpec::Partition { groups } => ScenarioAction::Partition { groups },
            ActionSpec::Heal => ScenarioAction::HealPartition,
            ActionSpec::DisableLink { from, to } => ScenarioAction::DisableLink { from, to },
            ActionSpec::EnableLink { from, to } => ScenarioAction::EnableLink { from, to },
            ActionSpec::SetLossRate { from, to, rate } => {
                ScenarioAction::SetLossRate { from, to, rate }
            }
            ActionSpec::Snapshot => ScenarioAction::TakeSnapshot,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedAction {
    pub at_secs: u64,
    #[serde(flatten)]
    pub action: ActionSpec,
}

/// A complete experiment described in TOML.
///
/// ```toml
/// seed = 7
/// duration_secs = 3600
///
/// [nodes]
/// count = 8
///
/// [topology]
/// kind = "random_geometric"
/// radius = 0.4
///
/// [links]
/// loss_rate = 0.05
///
/// [experiment]
/// attacker_id = 4
/// attack_rate = 0.3
///
/// [[actions]]
/// at_secs = 1200
/// action = "disable_link"
/// from = 4
/// to = 1
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioFile {
    #[serde(default = "ScenarioFile::default_seed")]
    pub seed: u64,
    pub duration_secs: u64,
    #[serde(default)]
    pub snapshot_interval_secs: Option<u64>,
    pub nodes: NodesSpec,
    pub topology: TopologySpec,
    #[serde(default)]
    pub links: LinkSpec,
    #[serde(default)]
    pub experiment: ExperimentSpec,
    #[serde(default)]
    pub actions: Vec<TimedAction>,
}

impl ScenarioFile {
    fn default_seed() -> u64 {
        42
    }

    pub fn from_toml_str(text: &str) -> SimResult<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> SimResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }

    /// Translate into a builder, validating ids and experiment constants.
    pub fn builder(&self) -> SimResult<ScenarioBuilder> {
        let ids = self.nodes.resolve()?;
        let config = self.experiment.to_config()?;
        if !ids.contains(&config.root_id) {
            return Err(SimError::Scenario(format!(
                "root {} is not among the nodes",
                config.root_id
            )));
        }

        let mut builder = ScenarioBuilder::with_node_ids(ids.clone())
            .with_seed(self.seed)
            .with_config(config)
            .with_loss_rate(self.links.loss_rate)
            .with_delay(Duration::from_millis(self.links.delay_ms));

        builder = match &self.topology {
            TopologySpec::FullyConnected => builder.fully_connected(),
            TopologySpec::Chain => builder.chain_topology(),
            TopologySpec::Star => builder.star_topology(),
            TopologySpec::RandomGeometric { radius } => builder.random_geometric(*radius),
            TopologySpec::Explicit { links } => {
                let mut topo = Topology::new();
                for &(a, b) in links {
                    if !ids.contains(&a) || !ids.contains(&b) {
                        return Err(SimError::Scenario(format!(
                            "link {a}-{b} names an unknown node"
                        )));
                    }
                    topo.add_link(a, b, Link::default());
                }
                builder.topology(topo)
            }
        };

        if let Some(secs) = self.snapshot_interval_secs {
            builder = builder.with_snapshot_interval(Duration::from_secs(secs));
        }
        for timed in &self.actions {
            builder = builder.at(Timestamp::from_secs(timed.at_secs), timed.action.clone().into());
        }
        Ok(builder)
    }

    pub fn run(&self) -> SimResult<SimulationResult> {
        self.builder()?.run_for(self.duration())
    }
}

/// One run of the experiment matrix.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatrixRow {
    pub attack_rate: f64,
    pub seed: u64,
    pub tx: u32,
    pub rx: u32,
    pub pdr: f64,
    pub mean_delay_ms: f64,
    /// DATA_DROP records over the run.
    pub dropped: u32,
    /// Mean fraction of routing paths through the attacker.
    pub path_exposure: f64,
}

/// Run `base` once per attack rate and seed.
///
/// Rows come out rate-major, in the order given.
pub fn run_matrix(base: &ScenarioFile, rates: &[f64], seeds: &[u64]) -> SimResult<Vec<MatrixRow>> {
    let mut rows = Vec::with_capacity(rates.len() * seeds.len());
    for &rate in rates {
        for &seed in seeds {
            let mut scenario = base.clone();
            scenario.seed = seed;
            scenario.experiment.attack_rate = Some(rate);

            let result = scenario.run()?;
            let summary = analyze(&result.log, DEFAULT_WINDOW);
            let path_exposure = if summary.structure.is_empty() {
                0.0
            } else {
                summary.structure.iter().map(|s| s.attack_exposure).sum::<f64>()
                    / summary.structure.len() as f64
            };
            info!(rate, seed, pdr = summary.totals.pdr, "matrix run finished");

            rows.push(MatrixRow {
                attack_rate: rate,
                seed,
                tx: summary.totals.tx,
                rx: summary.totals.rx,
                pdr: summary.totals.pdr,
                mean_delay_ms: summary.totals.mean_delay_ms,
                dropped: summary.totals.dropped,
                path_exposure,
            });
        }
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENARIO: &str = r#"
seed = 3
duration_secs = 900

[nodes]
count = 4

[topology]
kind = "explicit"
links = [[1, 4], [4, 2], [4, 3]]

[experiment]
attacker_id = 4
attack_rate = 0.5
send_interval_ms = 20000

[[actions]]
at_secs = 600
action = "set_loss_rate"
from = 1
to = 4
rate = 0.2

[[actions]]
at_secs = 700
action = "snapshot"
"#;

    #[test]
    fn test_builder_requires_topology() {
        assert!(matches!(
            ScenarioBuilder::new(3).build(),
            Err(SimError::Scenario(_))
        ));
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        let config = ExperimentConfig::DEFAULT.with_send_interval(Duration::ZERO);
        let result = ScenarioBuilder::new(3).chain_topology().with_config(config).build();
        assert!(matches!(result, Err(SimError::Config(_))));
    }

    #[test]
    fn test_builder_applies_link_defaults() {
        let (sim, ids) = ScenarioBuilder::new(3)
            .chain_topology()
            .with_loss_rate(0.1)
            .with_delay(Duration::from_millis(25))
            .build()
            .unwrap();
        assert_eq!(ids, vec![1, 2, 3]);
        let link = sim.topology().get_link(2, 3).unwrap();
        assert_eq!(link.loss_rate, 0.1);
        assert_eq!(link.delay, Duration::from_millis(25));
    }

    #[test]
    fn test_parse_scenario_file() {
        let file = ScenarioFile::from_toml_str(SCENARIO).unwrap();
        assert_eq!(file.seed, 3);
        assert_eq!(file.links, LinkSpec::default());
        assert_eq!(
            file.topology,
            TopologySpec::Explicit {
                links: vec![(1, 4), (4, 2), (4, 3)]
            }
        );
        assert_eq!(file.actions.len(), 2);
        assert_eq!(
            ScenarioAction::from(file.actions[0].action.clone()),
            ScenarioAction::SetLossRate {
                from: 1,
                to: 4,
                rate: 0.2
            }
        );

        let config = file.experiment.to_config().unwrap();
        assert_eq!(config.attacker_id, 4);
        assert_eq!(config.attack_rate.threshold(), 500);
        assert_eq!(config.send_interval, Duration::from_secs(20));
        assert_eq!(config.root_id, 1);
    }

    #[test]
    fn test_scenario_rejects_bad_rate() {
        let text = SCENARIO.replace("attack_rate = 0.5", "attack_rate = 1.5");
        let file = ScenarioFile::from_toml_str(&text).unwrap();
        assert!(matches!(file.builder(), Err(SimError::Config(_))));
    }

    #[test]
    fn test_scenario_rejects_unknown_link_node() {
        let text = SCENARIO.replace("[4, 3]", "[4, 9]");
        let file = ScenarioFile::from_toml_str(&text).unwrap();
        assert!(matches!(file.builder(), Err(SimError::Scenario(_))));
    }

    #[test]
    fn test_malformed_toml() {
        assert!(matches!(
            ScenarioFile::from_toml_str("seed = "),
            Err(SimError::Toml(_))
        ));
    }

    #[test]
    fn test_scenario_runs() {
        let file = ScenarioFile::from_toml_str(SCENARIO).unwrap();
        let result = file.run().unwrap();
        assert_eq!(result.end_time, Timestamp::from_secs(900));
        // Interval-free run: the scheduled snapshot and the final one.
        assert_eq!(result.metrics.snapshots.len(), 2);
        assert!(result.log.iter().any(|r| r.node == 4));
    }

    #[test]
    fn test_matrix_rows_are_rate_major() {
        let file = ScenarioFile::from_toml_str(SCENARIO).unwrap();
        let rows = run_matrix(&file, &[0.0, 1.0], &[1, 2]).unwrap();
        let keys: Vec<(f64, u64)> = rows.iter().map(|r| (r.attack_rate, r.seed)).collect();
        assert_eq!(keys, vec![(0.0, 1), (0.0, 2), (1.0, 1), (1.0, 2)]);

        // Every sender routes through node 4.
        assert_eq!(rows[0].dropped, 0);
        assert!(rows[2].dropped > 0);
        assert!(rows[2].pdr < rows[0].pdr);
        assert_eq!(rows[0].path_exposure, 1.0);
    }
}
