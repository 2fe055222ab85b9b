//! Budget ledger / admission control for decision-producer invocations
//!
//! Producers are the expensive subsystems; the ledger caps how many run
//! per settlement period and accumulates their estimated cost. A denial
//! is a normal admission outcome, never an error, and always carries a
//! distinct reason: budget exhaustion or health exclusion.

use crate::health::HealthStatus;

/// Outcome of an admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Granted,
    /// Calls-this-period reached the configured limit
    DeniedBudget,
    /// The subsystem's health record is critical or offline
    DeniedHealth,
}

impl Admission {
    pub fn is_granted(self) -> bool {
        self == Admission::Granted
    }

    pub fn label(self) -> &'static str {
        match self {
            Admission::Granted => "granted",
            Admission::DeniedBudget => "denied-budget",
            Admission::DeniedHealth => "denied-health",
        }
    }
}

/// Per-period call and cost counters
///
/// Invariants: counters are non-negative and `calls_this_period` never
/// exceeds the limit between resets (callers invoke `record_invocation`
/// only after a granted admission).
#[derive(Debug, Clone)]
pub struct BudgetLedger {
    limit: u32,
    calls_this_period: u32,
    period_cost: f64,
    total_cost: f64,
    total_calls: u64,
    periods_closed: u32,
}

impl BudgetLedger {
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            calls_this_period: 0,
            period_cost: 0.0,
            total_cost: 0.0,
            total_calls: 0,
            periods_closed: 0,
        }
    }

    /// Admission check for one subsystem, given its current health
    pub fn admit(&self, health: HealthStatus) -> Admission {
        if health.is_excluded() {
            return Admission::DeniedHealth;
        }
        if self.calls_this_period >= self.limit {
            return Admission::DeniedBudget;
        }
        Admission::Granted
    }

    /// Count one actual invocation; call exactly once per granted tick
    pub fn record_invocation(&mut self, estimated_cost: f64) {
        debug_assert!(
            self.calls_this_period < self.limit,
            "invocation recorded past the period limit"
        );
        self.calls_this_period = self.calls_this_period.min(self.limit - 1) + 1;
        self.period_cost += estimated_cost.max(0.0);
        self.total_cost += estimated_cost.max(0.0);
        self.total_calls += 1;
    }

    /// Zero the per-period counters at a settlement tick
    pub fn reset_period(&mut self) {
        tracing::debug!(
            calls = self.calls_this_period,
            cost = self.period_cost,
            "settlement period closed"
        );
        self.calls_this_period = 0;
        self.period_cost = 0.0;
        self.periods_closed += 1;
    }

    pub fn calls_this_period(&self) -> u32 {
        self.calls_this_period
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn period_cost(&self) -> f64 {
        self.period_cost
    }

    pub fn total_cost(&self) -> f64 {
        self.total_cost
    }

    pub fn total_calls(&self) -> u64 {
        self.total_calls
    }

    pub fn periods_closed(&self) -> u32 {
        self.periods_closed
    }

    /// Fraction of the period budget consumed
    pub fn usage(&self) -> f64 {
        if self.limit == 0 {
            return 1.0;
        }
        self.calls_this_period as f64 / self.limit as f64
    }
}
