//! graysim - discrete event substrate and log analysis for grayhole experiments.
//!
//! Runs a whole mesh of `grayhole` nodes in one process, deterministically,
//! and turns the resulting OBS log into delivery, delay and exposure
//! figures.
//!
//! # Features
//!
//! - **Discrete event simulation**: no real-time delays, `(time, seq)` ordering
//! - **Hop-by-hop forwarding**: every relay runs its packet hooks, so the
//!   attacker sees exactly the traffic routed through it
//! - **Routing tree**: shortest-hop tree from the root, recomputed after
//!   every topology change
//! - **Scenarios**: builder API and TOML files with scheduled partitions,
//!   link failures and loss changes
//! - **Analysis**: PDR, delay, jitter, churn, attack exposure, routing
//!   paths and parent residence times from any OBS log
//!
//! # Example
//!
//! ```
//! use graysim::{analyze, ScenarioBuilder, DEFAULT_WINDOW};
//! use grayhole::{AttackRate, Duration};
//!
//! let result = ScenarioBuilder::new(6)
//!     .chain_topology()
//!     .with_attack_rate(AttackRate::new(0.5).unwrap())
//!     .run_for(Duration::from_secs(1800))
//!     .unwrap();
//!
//! let summary = analyze(&result.log, DEFAULT_WINDOW);
//! assert_eq!(summary.root, Some(1));
//! assert_eq!(summary.attacker, Some(6));
//! ```
//!
//! # Architecture
//!
//! The simulator pops the earliest event, advances time and calls the
//! node handlers directly (`dispatch`, the packet hooks) instead of the
//! async run loop. After each handler it drains the node's telemetry into
//! the global log and routes any datagram the node handed to its transport.

pub mod analysis;
pub mod error;
pub mod event;
pub mod metrics;
pub mod node;
pub mod scenario;
pub mod sim;
pub mod topology;

pub use analysis::{
    analyze, parse_line, parse_log, ExposureRow, ParentInterval, ParentShare, PathRow,
    PerformanceReport, StructureRow, Summary, DEFAULT_WINDOW,
};
pub use error::{SimError, SimResult};
pub use event::{Event, ScenarioAction, ScheduledEvent};
pub use metrics::{PacketCounters, SimMetrics, SimulationResult, TreeSnapshot};
pub use node::SimNode;
pub use scenario::{run_matrix, MatrixRow, ScenarioBuilder, ScenarioFile};
pub use sim::Simulator;
pub use topology::{Link, RoutingTree, Topology};
