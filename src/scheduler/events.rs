//! Structured lifecycle events emitted for external observability
//!
//! Everything the core does at cycle granularity goes out a broadcast
//! channel: hosts subscribe for dashboards, tests subscribe for
//! assertions. Dropping the receiver is fine; sends to an empty channel
//! are ignored.

use crate::budget::Admission;
use crate::core::types::{Cycle, SubsystemId};
use crate::health::HealthSummary;

/// The five periodic task types the scheduler drives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CadenceKind {
    DecisionTick,
    Sync,
    Settlement,
    HealthCheck,
    TimeAdvance,
}

impl CadenceKind {
    pub const ALL: [CadenceKind; 5] = [
        CadenceKind::DecisionTick,
        CadenceKind::Sync,
        CadenceKind::Settlement,
        CadenceKind::HealthCheck,
        CadenceKind::TimeAdvance,
    ];

    pub fn label(self) -> &'static str {
        match self {
            CadenceKind::DecisionTick => "decision-tick",
            CadenceKind::Sync => "cross-system-sync",
            CadenceKind::Settlement => "settlement",
            CadenceKind::HealthCheck => "health-check",
            CadenceKind::TimeAdvance => "time-advance",
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            CadenceKind::DecisionTick => 0,
            CadenceKind::Sync => 1,
            CadenceKind::Settlement => 2,
            CadenceKind::HealthCheck => 3,
            CadenceKind::TimeAdvance => 4,
        }
    }
}

/// One observable lifecycle transition
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    Started {
        timestamp_ms: u64,
    },
    Paused,
    Resumed,
    Stopped {
        cycles: Cycle,
    },
    CycleStarted {
        cycle: Cycle,
    },
    CycleCompleted {
        cycle: Cycle,
        latency_ms: u64,
        decision_changes: usize,
        deterministic_changes: usize,
        conflicts: usize,
        resolutions: usize,
    },
    /// A producer was skipped this tick; carries the distinct reason
    DecisionSkipped {
        subsystem: SubsystemId,
        reason: Admission,
    },
    SettlementClosed {
        quarter: u32,
        calls: u32,
        period_cost: f64,
    },
    HealthChecked {
        summary: HealthSummary,
        score: f64,
    },
    /// An error inside one cadence; other cadences keep running
    ProcessingError {
        cadence: CadenceKind,
        message: String,
    },
    EmergencyStop {
        reason: String,
        timestamp_ms: u64,
    },
}
