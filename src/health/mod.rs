//! Per-subsystem health tracking, recovery, and emergency escalation
//!
//! Status escalates monotonically on consecutive failures. De-escalation
//! only ever happens through an explicit recorded success - elapsed time
//! alone never restores a subsystem. A subsystem reaching critical gets
//! exactly one automatic recovery attempt (its `restart()` hook); after
//! that it stays excluded from scheduling until a success is recorded.

use crate::core::config::CoreConfig;
use crate::core::types::now_ms;
use serde::{Deserialize, Serialize};

/// Health status of one subsystem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
    Offline,
}

impl HealthStatus {
    /// Critical and offline subsystems are excluded from scheduling
    pub fn is_excluded(self) -> bool {
        matches!(self, HealthStatus::Critical | HealthStatus::Offline)
    }

    /// Contribution to the aggregate health score
    pub fn score_weight(self) -> f64 {
        match self {
            HealthStatus::Healthy => 1.0,
            HealthStatus::Warning => 0.7,
            HealthStatus::Critical => 0.3,
            HealthStatus::Offline => 0.0,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Warning => "warning",
            HealthStatus::Critical => "critical",
            HealthStatus::Offline => "offline",
        }
    }
}

/// Reliability record kept per subsystem in the registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthRecord {
    pub status: HealthStatus,
    pub consecutive_failures: u32,
    /// Epoch milliseconds of the last recorded success
    pub last_success_ms: Option<u64>,
    /// Set once the single automatic recovery for this episode ran
    pub recovery_attempted: bool,
}

impl HealthRecord {
    pub fn new() -> Self {
        Self {
            status: HealthStatus::Healthy,
            consecutive_failures: 0,
            last_success_ms: None,
            recovery_attempted: false,
        }
    }
}

impl Default for HealthRecord {
    fn default() -> Self {
        Self::new()
    }
}

/// Counts per status across all registered subsystems
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthSummary {
    pub healthy: usize,
    pub warning: usize,
    pub critical: usize,
    pub offline: usize,
}

impl HealthSummary {
    pub fn count(&mut self, status: HealthStatus) {
        match status {
            HealthStatus::Healthy => self.healthy += 1,
            HealthStatus::Warning => self.warning += 1,
            HealthStatus::Critical => self.critical += 1,
            HealthStatus::Offline => self.offline += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.healthy + self.warning + self.critical + self.offline
    }

    pub fn excluded(&self) -> usize {
        self.critical + self.offline
    }

    /// Weighted aggregate score in [0, 1]; 1.0 when nothing is registered
    pub fn score(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 1.0;
        }
        (self.healthy as f64 * HealthStatus::Healthy.score_weight()
            + self.warning as f64 * HealthStatus::Warning.score_weight()
            + self.critical as f64 * HealthStatus::Critical.score_weight()
            + self.offline as f64 * HealthStatus::Offline.score_weight())
            / total as f64
    }
}

/// Drives health record transitions and the emergency threshold
#[derive(Debug)]
pub struct HealthMonitor {
    warning_failures: u32,
    critical_failures: u32,
    offline_failures: u32,
    emergency_threshold: f64,
    emergency_triggered: bool,
}

impl HealthMonitor {
    pub fn new(config: &CoreConfig) -> Self {
        Self {
            warning_failures: config.warning_failures,
            critical_failures: config.critical_failures,
            offline_failures: config.offline_failures,
            emergency_threshold: config.emergency_threshold,
            emergency_triggered: false,
        }
    }

    /// Record a successful invocation; any status returns to healthy
    pub fn record_success(&self, record: &mut HealthRecord) {
        record.status = HealthStatus::Healthy;
        record.consecutive_failures = 0;
        record.last_success_ms = Some(now_ms());
        record.recovery_attempted = false;
    }

    /// Record a failure; returns the status newly entered, if any
    pub fn record_failure(&self, record: &mut HealthRecord) -> Option<HealthStatus> {
        record.consecutive_failures = record.consecutive_failures.saturating_add(1);

        let escalated = if record.consecutive_failures >= self.offline_failures {
            HealthStatus::Offline
        } else if record.consecutive_failures >= self.critical_failures {
            HealthStatus::Critical
        } else if record.consecutive_failures >= self.warning_failures {
            HealthStatus::Warning
        } else {
            return None;
        };

        if escalated == record.status {
            return None;
        }
        record.status = escalated;
        tracing::warn!(
            status = escalated.label(),
            failures = record.consecutive_failures,
            "subsystem health escalated"
        );
        Some(escalated)
    }

    /// Claim the single automatic recovery attempt for this episode
    pub fn claim_recovery_attempt(&self, record: &mut HealthRecord) -> bool {
        if record.recovery_attempted {
            return false;
        }
        record.recovery_attempted = true;
        true
    }

    /// Evaluate the emergency threshold at a health-check tick
    ///
    /// Returns true exactly once per monitor lifetime when the excluded
    /// fraction reaches the threshold.
    pub fn check_emergency(&mut self, summary: &HealthSummary) -> bool {
        let total = summary.total();
        if total == 0 || self.emergency_triggered {
            return false;
        }
        let fraction = summary.excluded() as f64 / total as f64;
        if fraction >= self.emergency_threshold {
            self.emergency_triggered = true;
            tracing::error!(
                excluded = summary.excluded(),
                total,
                "health threshold breached; escalating to emergency stop"
            );
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> HealthMonitor {
        HealthMonitor::new(&CoreConfig::default())
    }

    #[test]
    fn test_escalation_is_monotonic() {
        let m = monitor();
        let mut record = HealthRecord::new();

        // Defaults: warning at 3, critical at 5, offline at 8
        assert_eq!(m.record_failure(&mut record), None);
        assert_eq!(m.record_failure(&mut record), None);
        assert_eq!(m.record_failure(&mut record), Some(HealthStatus::Warning));
        assert_eq!(m.record_failure(&mut record), None);
        assert_eq!(m.record_failure(&mut record), Some(HealthStatus::Critical));
        assert_eq!(m.record_failure(&mut record), None);
        assert_eq!(m.record_failure(&mut record), None);
        assert_eq!(m.record_failure(&mut record), Some(HealthStatus::Offline));
        assert_eq!(m.record_failure(&mut record), None);
        assert_eq!(record.status, HealthStatus::Offline);
    }

    #[test]
    fn test_success_restores_from_critical() {
        let m = monitor();
        let mut record = HealthRecord::new();
        for _ in 0..5 {
            m.record_failure(&mut record);
        }
        assert_eq!(record.status, HealthStatus::Critical);

        m.record_success(&mut record);
        assert_eq!(record.status, HealthStatus::Healthy);
        assert_eq!(record.consecutive_failures, 0);
        assert!(record.last_success_ms.is_some());
        assert!(!record.recovery_attempted);
    }

    #[test]
    fn test_recovery_attempt_claimed_once() {
        let m = monitor();
        let mut record = HealthRecord::new();
        assert!(m.claim_recovery_attempt(&mut record));
        assert!(!m.claim_recovery_attempt(&mut record));

        // A success re-arms the recovery attempt for the next episode
        m.record_success(&mut record);
        assert!(m.claim_recovery_attempt(&mut record));
    }

    #[test]
    fn test_emergency_fires_once_at_threshold() {
        let mut m = monitor();
        // 3 of 10 excluded = 30%, meets the default 0.3 threshold
        let summary = HealthSummary {
            healthy: 7,
            warning: 0,
            critical: 2,
            offline: 1,
        };
        assert!(m.check_emergency(&summary));
        assert!(!m.check_emergency(&summary), "emergency must fire once");
    }

    #[test]
    fn test_emergency_not_fired_below_threshold() {
        let mut m = monitor();
        let summary = HealthSummary {
            healthy: 8,
            warning: 0,
            critical: 2,
            offline: 0,
        };
        assert!(!m.check_emergency(&summary));
    }

    #[test]
    fn test_summary_score_weights() {
        let summary = HealthSummary {
            healthy: 1,
            warning: 1,
            critical: 1,
            offline: 1,
        };
        assert!((summary.score() - 0.5).abs() < 1e-9);
        assert_eq!(HealthSummary::default().score(), 1.0);
    }
}
