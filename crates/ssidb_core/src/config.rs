//! Node configuration.

use std::fmt;
use std::time::Duration;

/// How transactions are validated at prepare time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ValidationMode {
    /// Snapshot validation: abort when a read key was overwritten.
    Plain,
    /// Serializable snapshot isolation with dependency-edge tracking.
    #[default]
    Ssi,
}

impl fmt::Display for ValidationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plain => f.write_str("plain"),
            Self::Ssi => f.write_str("ssi"),
        }
    }
}

/// How prepares are ordered across participants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum OrderingMode {
    /// Classic two-phase commit with vote exchange.
    #[default]
    TwoPhase,
    /// Prepares delivered through a total-order sequencer.
    TotalOrder,
}

impl fmt::Display for OrderingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TwoPhase => f.write_str("two-phase"),
            Self::TotalOrder => f.write_str("total-order"),
        }
    }
}

/// Configuration for a node.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Validation strategy.
    pub validation_mode: ValidationMode,

    /// Prepare ordering strategy.
    pub ordering_mode: OrderingMode,

    /// Number of key shards in the data container.
    pub concurrency_level: usize,

    /// Pause between background garbage collection rounds.
    pub gc_interval: Duration,

    /// Whether statistics counters are updated.
    pub stats_enabled: bool,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            validation_mode: ValidationMode::Ssi,
            ordering_mode: OrderingMode::TwoPhase,
            concurrency_level: 16,
            gc_interval: Duration::from_secs(30),
            stats_enabled: true,
        }
    }
}

impl CoreConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the validation strategy.
    #[must_use]
    pub const fn validation_mode(mut self, mode: ValidationMode) -> Self {
        self.validation_mode = mode;
        self
    }

    /// Sets the prepare ordering strategy.
    #[must_use]
    pub const fn ordering_mode(mut self, mode: OrderingMode) -> Self {
        self.ordering_mode = mode;
        self
    }

    /// Sets the number of container shards. Zero is raised to one.
    #[must_use]
    pub const fn concurrency_level(mut self, level: usize) -> Self {
        self.concurrency_level = if level == 0 { 1 } else { level };
        self
    }

    /// Sets the pause between background garbage collection rounds.
    #[must_use]
    pub const fn gc_interval(mut self, interval: Duration) -> Self {
        self.gc_interval = interval;
        self
    }

    /// Sets whether statistics are collected.
    #[must_use]
    pub const fn stats_enabled(mut self, value: bool) -> Self {
        self.stats_enabled = value;
        self
    }

    /// Returns true when validation tracks dependency edges.
    pub fn is_ssi(&self) -> bool {
        self.validation_mode == ValidationMode::Ssi
    }

    /// Returns true when prepares go through the total-order sequencer.
    pub fn is_total_order(&self) -> bool {
        self.ordering_mode == OrderingMode::TotalOrder
    }
}
