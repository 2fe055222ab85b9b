//! Core configuration with documented tunables
//!
//! All magic numbers are collected here with explanations of their purpose
//! and how they interact with each other. Values load from TOML with every
//! field optional; omitted fields take the defaults below.

use crate::conflict::ResolutionStrategy;
use crate::core::error::{NexusError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration for the integration core
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    // === CADENCES (milliseconds) ===
    /// Decision-producer tick interval
    ///
    /// How often eligible decision producers are invoked. Producers are the
    /// expensive subsystems; this cadence is the main cost driver together
    /// with `calls_per_settlement`.
    pub decision_tick_interval_ms: u64,

    /// Cross-system sync cycle interval
    ///
    /// One full collect -> transform -> detect -> resolve -> apply pass.
    /// Queued decision records wait at most this long before integration.
    pub sync_interval_ms: u64,

    /// Settlement ("quarter") interval
    ///
    /// The budget ledger accumulates over one settlement period and resets
    /// at each settlement tick.
    pub settlement_interval_ms: u64,

    /// Health check interval
    pub health_check_interval_ms: u64,

    /// Simulated-time advance interval
    pub time_advance_interval_ms: u64,

    // === SIMULATED TIME ===
    /// Game days advanced per real second
    pub game_time_scale: f64,

    // === BUDGET ===
    /// Maximum decision-producer invocations per settlement period
    ///
    /// Admission is denied (not errored) once the counter reaches this
    /// limit; the counter resets at every settlement tick.
    pub calls_per_settlement: u32,

    // === PRODUCER EXECUTION ===
    /// Bound on concurrently running decision-producer invocations
    pub max_concurrent_producer_calls: usize,

    /// Per-invocation timeout for decision producers
    ///
    /// A timeout counts as a failure for the health monitor and the call's
    /// output is discarded.
    pub producer_timeout_ms: u64,

    // === CONFLICT RESOLUTION ===
    /// Strategy applied to every conflict this deployment resolves
    ///
    /// Unknown strategy names in TOML fall back to `weighted`.
    pub resolution_strategy: ResolutionStrategy,

    /// Decision-producer share in weighted resolution
    pub decision_weight: f64,

    /// Deterministic-system share in weighted resolution
    ///
    /// Must sum to 1.0 with `decision_weight`.
    pub deterministic_weight: f64,

    /// Divergence that maps to severity 1.0
    ///
    /// Severity of a numeric conflict is `|a - b| / severity_scale`,
    /// clamped to [0, 1].
    pub severity_scale: f64,

    /// Capacity of the bounded resolution cache
    pub resolution_cache_capacity: usize,

    /// Seed for the resolver's RNG (weighted pick of non-numeric values)
    ///
    /// Fixed seed keeps resolution reproducible across runs with the same
    /// conflict stream.
    pub resolver_seed: u64,

    // === HEALTH ===
    /// Consecutive failures before a subsystem enters `warning`
    pub warning_failures: u32,

    /// Consecutive failures before `critical` (one recovery attempt, then
    /// excluded from scheduling until a recorded success)
    pub critical_failures: u32,

    /// Consecutive failures before `offline`
    pub offline_failures: u32,

    /// Fraction of subsystems in critical/offline that triggers the
    /// emergency stop at a health-check tick
    pub emergency_threshold: f64,

    // === PREDICTION ===
    /// Forecast horizon in game days
    ///
    /// Forecasts landing beyond the horizon are suppressed.
    pub prediction_horizon_days: f64,

    /// Occurrence timestamps retained per pattern
    pub pattern_history: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            decision_tick_interval_ms: 15_000,
            sync_interval_ms: 30_000,
            settlement_interval_ms: 90_000,
            health_check_interval_ms: 60_000,
            time_advance_interval_ms: 1_000,
            game_time_scale: 1.0,
            calls_per_settlement: 100,
            max_concurrent_producer_calls: 5,
            producer_timeout_ms: 30_000,
            resolution_strategy: ResolutionStrategy::Weighted,
            decision_weight: 0.6,
            deterministic_weight: 0.4,
            severity_scale: 100.0,
            resolution_cache_capacity: 512,
            resolver_seed: 0x4e45_5855_5353_494d,
            warning_failures: 3,
            critical_failures: 5,
            offline_failures: 8,
            emergency_threshold: 0.3,
            prediction_horizon_days: 10.0,
            pattern_history: 32,
        }
    }
}

impl CoreConfig {
    /// Parse a configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: CoreConfig =
            toml::from_str(content).map_err(|e| NexusError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a TOML file
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Check cross-field invariants
    pub fn validate(&self) -> Result<()> {
        if (self.decision_weight + self.deterministic_weight - 1.0).abs() > 1e-9 {
            return Err(NexusError::Config(format!(
                "resolution weights must sum to 1.0 (got {} + {})",
                self.decision_weight, self.deterministic_weight
            )));
        }
        if self.decision_weight < 0.0 || self.deterministic_weight < 0.0 {
            return Err(NexusError::Config("resolution weights must be non-negative".into()));
        }
        if !(self.warning_failures < self.critical_failures
            && self.critical_failures < self.offline_failures)
        {
            return Err(NexusError::Config(format!(
                "health thresholds must be ordered warning < critical < offline (got {}/{}/{})",
                self.warning_failures, self.critical_failures, self.offline_failures
            )));
        }
        if !(0.0..=1.0).contains(&self.emergency_threshold) {
            return Err(NexusError::Config(
                "emergency_threshold must be within [0, 1]".into(),
            ));
        }
        if self.severity_scale <= 0.0 {
            return Err(NexusError::Config("severity_scale must be positive".into()));
        }
        if self.resolution_cache_capacity == 0 {
            return Err(NexusError::Config(
                "resolution_cache_capacity must be at least 1".into(),
            ));
        }
        if self.pattern_history < 3 {
            return Err(NexusError::Config(
                "pattern_history must be at least 3 (forecasts need 3 occurrences)".into(),
            ));
        }
        Ok(())
    }
}
