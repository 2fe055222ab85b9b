//! nexus-sim - hybrid integration and scheduling core
//!
//! The coordination layer of a persistent world simulation backend. Two
//! kinds of subsystems coexist: decision producers (slow, heuristic,
//! expensive to invoke) and deterministic systems (fast, formula-driven).
//! This crate keeps them coherent: a scheduler drives five independent
//! cadences, a transformation engine translates change records between
//! subsystem vocabularies along declarative rules, a conflict resolver
//! settles cross-authority disagreements, a budget ledger gates expensive
//! invocations per settlement period, and a health monitor excludes
//! failing subsystems and escalates to an emergency stop when too many
//! degrade. A prediction engine watches the change stream for recurring
//! patterns.
//!
//! ```no_run
//! use nexus_sim::{CoreConfig, Scheduler};
//!
//! # fn main() -> nexus_sim::Result<()> {
//! let scheduler = Scheduler::new(CoreConfig::default())?;
//! // register producers, systems, and rules, then:
//! scheduler.start()?;
//! # Ok(())
//! # }
//! ```

pub mod budget;
pub mod conflict;
pub mod core;
pub mod health;
pub mod predict;
pub mod registry;
pub mod scheduler;
pub mod transform;

pub use crate::core::config::CoreConfig;
pub use crate::core::error::{NexusError, Result};
pub use crate::core::types::{
    Authority, ChangeKind, ChangeRecord, EntityRef, Scope, SubsystemId,
};
pub use budget::{Admission, BudgetLedger};
pub use conflict::{Conflict, ConflictResolver, Resolution, ResolutionStrategy};
pub use health::{HealthMonitor, HealthRecord, HealthStatus, HealthSummary};
pub use predict::{Forecast, PatternKey, PredictionEngine};
pub use registry::rules::{
    AggregateFormula, CmpOp, Condition, Direction, Effect, IntegrationRule, SourceSelector,
    StepKind, TransformStep,
};
pub use registry::subsystem::{
    DecisionProducer, DeterministicSystem, SubsystemConfig, TickContext,
};
pub use registry::Registry;
pub use scheduler::events::{CadenceKind, LifecycleEvent};
pub use scheduler::{CoreStatus, Scheduler};
pub use transform::{CustomTransform, TransformationEngine, TransformedChange};
