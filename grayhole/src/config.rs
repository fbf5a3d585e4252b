//! Experiment configuration.
//!
//! Every value is a plain scalar fixed before the node is constructed. A
//! running [`Node`](crate::Node) only ever reads its copy; there is no
//! reconfiguration path.
//!
//! # Example
//!
//! ```
//! use grayhole::{AttackRate, Duration, ExperimentConfig};
//!
//! let config = ExperimentConfig::DEFAULT
//!     .with_attacker_id(4)
//!     .with_attack_rate(AttackRate::new(0.3).unwrap())
//!     .with_send_interval(Duration::from_secs(10));
//!
//! assert!(config.validate().is_ok());
//! assert_eq!(config.attack_rate.threshold(), 300);
//! ```

use core::fmt;

use crate::time::Duration;
use crate::types::NodeId;

/// Size of the integer range the per-packet drop draw is taken from.
///
/// A draw is uniform in `[0, DROP_MODULUS - 1]`, so rates are effectively
/// quantized to steps of `1 / DROP_MODULUS`.
pub const DROP_MODULUS: u16 = 1000;

/// Errors from configuration validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// Attack rate is NaN or outside `[0.0, 1.0]`.
    AttackRateOutOfRange,
    /// Base send interval is zero.
    ZeroSendInterval,
    /// Parent poll period is zero.
    ZeroPollPeriod,
    /// Statistics period is zero.
    ZeroStatsPeriod,
    /// Data port is zero.
    ZeroDataPort,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::AttackRateOutOfRange => write!(f, "attack rate must be within [0.0, 1.0]"),
            ConfigError::ZeroSendInterval => write!(f, "send interval must be non-zero"),
            ConfigError::ZeroPollPeriod => write!(f, "parent poll period must be non-zero"),
            ConfigError::ZeroStatsPeriod => write!(f, "stats period must be non-zero"),
            ConfigError::ZeroDataPort => write!(f, "data port must be non-zero"),
        }
    }
}

/// Probability that the attacker drops a matching relayed packet.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default)]
pub struct AttackRate(f64);

impl AttackRate {
    /// Never drop.
    pub const ZERO: AttackRate = AttackRate(0.0);

    /// Drop every matching relayed packet.
    pub const ALWAYS: AttackRate = AttackRate(1.0);

    pub fn new(rate: f64) -> Result<Self, ConfigError> {
        if rate.is_nan() || !(0.0..=1.0).contains(&rate) {
            return Err(ConfigError::AttackRateOutOfRange);
        }
        Ok(AttackRate(rate))
    }

    pub const fn as_f64(self) -> f64 {
        self.0
    }

    /// Drop threshold: a draw in `[0, DROP_MODULUS)` strictly below it drops.
    ///
    /// Computed as `round(rate * DROP_MODULUS)` with halves rounded up, so a
    /// rate of `0.0005` becomes 1 in 1000 and `0.0004` becomes never.
    pub fn threshold(self) -> u16 {
        let scaled = self.0 * f64::from(DROP_MODULUS) + 0.5;
        (scaled as u16).min(DROP_MODULUS)
    }
}

/// Scalars fixed for the lifetime of an experiment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExperimentConfig {
    /// Identifier of the anchor.
    pub root_id: NodeId,
    /// Identifier of the adversary.
    pub attacker_id: NodeId,
    /// Per-packet drop probability at the adversary.
    pub attack_rate: AttackRate,
    /// Base delay between two sends.
    pub send_interval: Duration,
    /// Inclusive upper bound of the random delay added to `send_interval`.
    pub send_jitter: Duration,
    /// UDP port application traffic is addressed to.
    pub data_port: u16,
    /// Period of the attack statistics report.
    pub stats_period: Duration,
    /// Period of the preferred-parent poll.
    pub parent_poll_period: Duration,
}

impl ExperimentConfig {
    /// Values used by the reference experiments.
    pub const DEFAULT: ExperimentConfig = ExperimentConfig {
        root_id: 1,
        attacker_id: 6,
        attack_rate: AttackRate::ZERO,
        send_interval: Duration::from_secs(30),
        send_jitter: Duration::from_secs(5),
        data_port: 3000,
        stats_period: Duration::from_secs(300),
        parent_poll_period: Duration::from_secs(10),
    };

    pub const fn with_root_id(mut self, id: NodeId) -> Self {
        self.root_id = id;
        self
    }

    pub const fn with_attacker_id(mut self, id: NodeId) -> Self {
        self.attacker_id = id;
        self
    }

    pub const fn with_attack_rate(mut self, rate: AttackRate) -> Self {
        self.attack_rate = rate;
        self
    }

    pub const fn with_send_interval(mut self, interval: Duration) -> Self {
        self.send_interval = interval;
        self
    }

    pub const fn with_send_jitter(mut self, jitter: Duration) -> Self {
        self.send_jitter = jitter;
        self
    }

    pub const fn with_data_port(mut self, port: u16) -> Self {
        self.data_port = port;
        self
    }

    pub const fn with_stats_period(mut self, period: Duration) -> Self {
        self.stats_period = period;
        self
    }

    pub const fn with_parent_poll_period(mut self, period: Duration) -> Self {
        self.parent_poll_period = period;
        self
    }

    /// Check the invariants a node relies on.
    ///
    /// Zero periods would rearm a timer at the instant it fired and stall
    /// the event loop.
    pub fn validate(&self) -> Result<(), ConfigError> {
        AttackRate::new(self.attack_rate.as_f64())?;
        if self.send_interval.is_zero() {
            return Err(ConfigError::ZeroSendInterval);
        }
        if self.parent_poll_period.is_zero() {
            return Err(ConfigError::ZeroPollPeriod);
        }
        if self.stats_period.is_zero() {
            return Err(ConfigError::ZeroStatsPeriod);
        }
        if self.data_port == 0 {
            return Err(ConfigError::ZeroDataPort);
        }
        Ok(())
    }
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}
