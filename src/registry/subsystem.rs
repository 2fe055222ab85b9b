//! Collaborator traits and subsystem registrations
//!
//! The two module kinds are closed traits: every variant implements the
//! full interface and dispatch is always through the trait object, never
//! through optional-method probing. The recovery hook is part of the
//! contract with a "no hook" default.

use crate::core::error::Result;
use crate::core::types::{Authority, ChangeRecord, Cycle, Scope, SimTime, SubsystemId};
use crate::transform::TransformedChange;
use ahash::AHashMap;
use std::sync::{Arc, Mutex};

/// Context handed to every subsystem tick
#[derive(Debug, Clone)]
pub struct TickContext {
    /// Current sync cycle counter
    pub cycle: Cycle,
    /// Settlement periods completed so far
    pub quarter: u32,
    /// Simulated time in game days
    pub sim_time: SimTime,
    /// Wall-clock time at tick start (epoch milliseconds)
    pub timestamp_ms: u64,
    /// Latest `current_output()` snapshot from each deterministic system
    ///
    /// Producers decide against the world these outputs describe.
    pub system_outputs: AHashMap<SubsystemId, serde_json::Value>,
}

/// A heuristic module producing proposed state changes
///
/// Ticks may be slow (external computation); the scheduler runs them on a
/// bounded worker pool with a per-call timeout.
pub trait DecisionProducer: Send {
    /// Produce this tick's proposed changes
    fn tick(&mut self, ctx: &TickContext) -> Result<Vec<ChangeRecord>>;

    /// Receive a change routed to this producer after transformation
    fn apply_integration(&mut self, change: &TransformedChange) -> Result<()>;

    /// Recovery hook invoked once by the health monitor on reaching
    /// critical. Returns `Ok(false)` when the module has no hook.
    fn restart(&mut self) -> Result<bool> {
        Ok(false)
    }
}

/// A numeric simulation module driven by fixed formulas
///
/// Ticks are expected to be fast; they run inline in the sync cycle.
pub trait DeterministicSystem: Send {
    /// Advance the simulation by `dt` game days and report changes
    fn tick(&mut self, ctx: &TickContext, dt: f64) -> Result<Vec<ChangeRecord>>;

    /// Receive a change routed to this system after transformation
    fn apply_integration(&mut self, change: &TransformedChange) -> Result<()>;

    /// Synchronous snapshot of the system's current outputs
    fn current_output(&self) -> serde_json::Value;

    /// Recovery hook; `Ok(false)` when absent
    fn restart(&mut self) -> Result<bool> {
        Ok(false)
    }
}

/// Shared handle to a registered module
///
/// The module lives behind its own mutex so slow producer ticks run
/// without holding the registry lock.
#[derive(Clone)]
pub enum ModuleHandle {
    Producer(Arc<Mutex<Box<dyn DecisionProducer>>>),
    System(Arc<Mutex<Box<dyn DeterministicSystem>>>),
}

impl ModuleHandle {
    pub fn authority(&self) -> Authority {
        match self {
            ModuleHandle::Producer(_) => Authority::Decision,
            ModuleHandle::System(_) => Authority::Deterministic,
        }
    }

    /// Invoke the module's recovery hook
    pub fn restart(&self) -> Result<bool> {
        match self {
            ModuleHandle::Producer(module) => lock_module(module).restart(),
            ModuleHandle::System(module) => lock_module(module).restart(),
        }
    }

    /// Route a transformed change into the module
    pub fn apply_integration(&self, change: &TransformedChange) -> Result<()> {
        match self {
            ModuleHandle::Producer(module) => lock_module(module).apply_integration(change),
            ModuleHandle::System(module) => lock_module(module).apply_integration(change),
        }
    }
}

impl std::fmt::Debug for ModuleHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModuleHandle::Producer(_) => f.write_str("ModuleHandle::Producer"),
            ModuleHandle::System(_) => f.write_str("ModuleHandle::System"),
        }
    }
}

/// Lock a module mutex, recovering the inner value if a previous caller
/// panicked mid-tick (the module may be stale but the core stays usable;
/// health tracking handles the rest).
pub(crate) fn lock_module<T: ?Sized>(
    module: &Mutex<Box<T>>,
) -> std::sync::MutexGuard<'_, Box<T>> {
    module.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Per-subsystem integration settings supplied at registration
#[derive(Debug, Clone)]
pub struct SubsystemConfig {
    pub scope: Scope,
    /// Capability tags for host-side discovery
    pub capabilities: Vec<String>,
    /// Estimated cost per invocation, accumulated by the budget ledger
    pub cost_per_invocation: f64,
}

impl Default for SubsystemConfig {
    fn default() -> Self {
        Self {
            scope: Scope::Shared,
            capabilities: Vec::new(),
            cost_per_invocation: 1.0,
        }
    }
}

impl SubsystemConfig {
    pub fn for_civilization(civ: impl Into<String>) -> Self {
        Self {
            scope: Scope::Civilization(civ.into()),
            ..Self::default()
        }
    }

    pub fn with_capability(mut self, tag: impl Into<String>) -> Self {
        self.capabilities.push(tag.into());
        self
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost_per_invocation = cost;
        self
    }
}

/// One registered subsystem
#[derive(Debug, Clone)]
pub struct SubsystemRegistration {
    pub id: SubsystemId,
    pub authority: Authority,
    pub config: SubsystemConfig,
    pub module: ModuleHandle,
    pub registered_ms: u64,
}
