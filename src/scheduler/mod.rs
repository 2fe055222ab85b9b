//! Scheduler - drives the five cadences and owns the sync cycle
//!
//! One scheduler owns all periodic work: decision-producer ticks,
//! cross-system sync, settlement, health checks, and simulated-time
//! advance. Each cadence runs as its own tokio task with an in-flight
//! guard - a firing that arrives while the previous one still runs is
//! skipped, never queued. Errors in one cadence are contained and
//! reported; only the health monitor's threshold breach escalates to the
//! global emergency stop.
//!
//! Within a sync cycle, ordering is strict:
//! collect -> transform -> detect -> resolve -> apply -> predict.
//! Change records never cross cycle boundaries.

pub mod events;

use crate::budget::{Admission, BudgetLedger};
use crate::conflict::{detect_conflicts, Conflict, ConflictResolver, Resolution};
use crate::core::config::CoreConfig;
use crate::core::error::{NexusError, Result};
use crate::core::types::{now_ms, ChangeRecord, Cycle, SimTime, SubsystemId};
use crate::health::{HealthMonitor, HealthStatus, HealthSummary};
use crate::predict::{Forecast, PredictionEngine};
use crate::registry::rules::IntegrationRule;
use crate::registry::subsystem::{
    lock_module, DecisionProducer, DeterministicSystem, ModuleHandle, SubsystemConfig, TickContext,
};
use crate::registry::Registry;
use crate::transform::{CustomTransform, TransformationEngine, TransformedChange};
use ahash::AHashMap;
use events::{CadenceKind, LifecycleEvent};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};

/// Capacity of the lifecycle event channel; slow subscribers lag, they
/// never block the scheduler
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Lock with poison recovery: a panicked holder must not wedge the core,
/// and health tracking covers any subsystem that panicked mid-write.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Counters accumulated across cycles
#[derive(Debug, Default)]
struct Metrics {
    last_cycle_latency_ms: u64,
    decision_records_total: u64,
    deterministic_records_total: u64,
    conflicts_total: u64,
    resolutions_total: u64,
    skipped_budget: u64,
    skipped_health: u64,
}

/// Snapshot of the core for status queries
#[derive(Debug, Clone)]
pub struct CoreStatus {
    pub running: bool,
    pub paused: bool,
    pub emergency: bool,
    pub cycle: Cycle,
    pub quarter: u32,
    pub sim_time: SimTime,
    pub last_cycle_latency_ms: u64,
    /// Decision records queued for the next sync cycle
    pub pending_decision_records: usize,
    pub producer_count: usize,
    pub system_count: usize,
    pub rule_count: usize,
    pub conflicts_total: u64,
    pub resolutions_total: u64,
    /// Conflicts per completed cycle
    pub conflict_rate: f64,
    pub budget_calls: u32,
    pub budget_limit: u32,
    pub budget_usage: f64,
    pub period_cost: f64,
    pub total_cost: f64,
    pub health: HealthSummary,
    pub health_score: f64,
    pub transformation_warnings: u64,
    pub skipped_budget: u64,
    pub skipped_health: u64,
}

/// Shared core state behind one Arc; every cadence task holds a clone
struct CoreShared {
    config: CoreConfig,
    registry: Mutex<Registry>,
    ledger: Mutex<BudgetLedger>,
    monitor: Mutex<HealthMonitor>,
    engine: Mutex<TransformationEngine>,
    resolver: Mutex<ConflictResolver>,
    predictor: Mutex<PredictionEngine>,
    /// Records produced by the decision cadence, drained by the next sync
    pending_decisions: Mutex<Vec<ChangeRecord>>,
    metrics: Mutex<Metrics>,
    running: AtomicBool,
    paused: AtomicBool,
    emergency: AtomicBool,
    /// In-flight guard per cadence, indexed by `CadenceKind::index`
    in_flight: [AtomicBool; 5],
    cycle: AtomicU64,
    quarter: AtomicU32,
    /// f64 bits of the current simulated time in game days
    sim_time_bits: AtomicU64,
    /// f64 bits of the sim time at the previous sync, for dt
    last_sync_sim_bits: AtomicU64,
    producer_permits: Arc<Semaphore>,
    events: broadcast::Sender<LifecycleEvent>,
    /// Wakes cadence tasks parked on their interval so `stop` returns
    /// promptly instead of waiting out the longest cadence
    shutdown: watch::Sender<bool>,
    snapshot: Mutex<Option<serde_json::Value>>,
}

/// Holds a cadence's in-flight flag for the duration of one invocation
///
/// Released on drop, so a cancelled invocation can never leave the flag
/// latched and wedge its cadence.
struct InFlightClaim<'a> {
    flag: &'a AtomicBool,
}

impl Drop for InFlightClaim<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// The integration core's public face
///
/// A library object, not a service: hosts register collaborator modules
/// and rules, then drive it through the control surface.
pub struct Scheduler {
    shared: Arc<CoreShared>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(config: CoreConfig) -> Result<Self> {
        config.validate()?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (shutdown, _) = watch::channel(false);
        let shared = Arc::new(CoreShared {
            ledger: Mutex::new(BudgetLedger::new(config.calls_per_settlement)),
            monitor: Mutex::new(HealthMonitor::new(&config)),
            engine: Mutex::new(TransformationEngine::new()),
            resolver: Mutex::new(ConflictResolver::new(&config)),
            predictor: Mutex::new(PredictionEngine::new(&config)),
            registry: Mutex::new(Registry::new()),
            pending_decisions: Mutex::new(Vec::new()),
            metrics: Mutex::new(Metrics::default()),
            running: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            emergency: AtomicBool::new(false),
            in_flight: Default::default(),
            cycle: AtomicU64::new(0),
            quarter: AtomicU32::new(0),
            sim_time_bits: AtomicU64::new(0f64.to_bits()),
            last_sync_sim_bits: AtomicU64::new(0f64.to_bits()),
            producer_permits: Arc::new(Semaphore::new(config.max_concurrent_producer_calls)),
            events,
            shutdown,
            snapshot: Mutex::new(None),
            config,
        });
        Ok(Self {
            shared,
            tasks: Mutex::new(Vec::new()),
        })
    }

    // === Registration ===

    pub fn register_decision_producer(
        &self,
        id: impl Into<SubsystemId>,
        module: Box<dyn DecisionProducer>,
        config: SubsystemConfig,
    ) -> Result<()> {
        lock(&self.shared.registry).register_producer(id.into(), module, config)
    }

    pub fn register_deterministic_system(
        &self,
        id: impl Into<SubsystemId>,
        module: Box<dyn DeterministicSystem>,
        config: SubsystemConfig,
    ) -> Result<()> {
        lock(&self.shared.registry).register_system(id.into(), module, config)
    }

    pub fn add_integration_rule(&self, rule: IntegrationRule) -> Result<()> {
        lock(&self.shared.registry).add_rule(rule)
    }

    pub fn register_custom_transform(&self, name: impl Into<String>, transform: CustomTransform) {
        lock(&self.shared.engine).register_custom(name, transform);
    }

    /// Destroy every subsystem scoped to a civilization
    pub fn remove_civilization(&self, civ: &str) -> usize {
        lock(&self.shared.registry).remove_civilization(civ)
    }

    // === Control surface ===

    /// Begin all five cadences from a fresh epoch
    pub fn start(&self) -> Result<()> {
        if self.shared.emergency.load(Ordering::SeqCst) {
            return Err(NexusError::EmergencyStopped);
        }
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return Err(NexusError::AlreadyRunning);
        }
        self.shared.paused.store(false, Ordering::SeqCst);
        self.shared.cycle.store(0, Ordering::SeqCst);
        self.shared.quarter.store(0, Ordering::SeqCst);
        self.shared.sim_time_bits.store(0f64.to_bits(), Ordering::SeqCst);
        self.shared.last_sync_sim_bits.store(0f64.to_bits(), Ordering::SeqCst);
        lock(&self.shared.pending_decisions).clear();
        // A fresh epoch never inherits an in-flight claim
        for guard in &self.shared.in_flight {
            guard.store(false, Ordering::SeqCst);
        }

        let mut tasks = lock(&self.tasks);
        for kind in CadenceKind::ALL {
            tasks.push(spawn_cadence(self.shared.clone(), kind));
        }

        tracing::info!("integration core started");
        self.shared.emit(LifecycleEvent::Started {
            timestamp_ms: now_ms(),
        });
        Ok(())
    }

    /// Gate execution before the next cycle boundary; counters keep
    pub fn pause(&self) -> Result<()> {
        if !self.shared.running.load(Ordering::SeqCst) {
            return Err(NexusError::NotRunning);
        }
        self.shared.paused.store(true, Ordering::SeqCst);
        tracing::info!("integration core paused");
        self.shared.emit(LifecycleEvent::Paused);
        Ok(())
    }

    pub fn resume(&self) -> Result<()> {
        if !self.shared.running.load(Ordering::SeqCst) {
            return Err(NexusError::NotRunning);
        }
        self.shared.paused.store(false, Ordering::SeqCst);
        tracing::info!("integration core resumed");
        self.shared.emit(LifecycleEvent::Resumed);
        Ok(())
    }

    /// Halt all cadences after one final flush cycle
    ///
    /// Waits for any invocation already in flight, so an ongoing sync
    /// cycle completes before the flush rather than being cut off.
    pub async fn stop(&self) -> Result<()> {
        if self.shared.emergency.load(Ordering::SeqCst) {
            return Err(NexusError::EmergencyStopped);
        }
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return Err(NexusError::NotRunning);
        }
        let _ = self.shared.shutdown.send(true);
        let tasks: Vec<JoinHandle<()>> = lock(&self.tasks).drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }

        // Final flush: integrate whatever the decision cadence queued
        self.shared.run_cadence(CadenceKind::Sync).await;

        let cycles = self.shared.cycle.load(Ordering::SeqCst);
        tracing::info!(cycles, "integration core stopped");
        self.shared.emit(LifecycleEvent::Stopped { cycles });
        Ok(())
    }

    /// Immediately halt everything and snapshot minimal state
    ///
    /// Fatal for the session: `start` refuses afterwards and external
    /// intervention (a new scheduler) is required to resume.
    pub fn emergency_stop(&self, reason: &str) {
        self.shared.engage_emergency(reason);
        self.abort_tasks();
    }

    /// Run one decision collection pass plus one sync cycle right now
    pub async fn force_sync(&self) -> Result<()> {
        if self.shared.emergency.load(Ordering::SeqCst) {
            return Err(NexusError::EmergencyStopped);
        }
        if !self.shared.running.load(Ordering::SeqCst) {
            return Err(NexusError::NotRunning);
        }
        self.shared.run_cadence(CadenceKind::DecisionTick).await;
        self.shared.run_cadence(CadenceKind::Sync).await;
        Ok(())
    }

    fn abort_tasks(&self) {
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
    }

    // === Queries ===

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.shared.events.subscribe()
    }

    pub fn status(&self) -> CoreStatus {
        self.shared.status()
    }

    /// Current lookahead forecasts from the prediction engine
    pub fn forecasts(&self) -> Vec<Forecast> {
        lock(&self.shared.predictor).forecasts(self.shared.sim_time())
    }

    /// Minimal state snapshot written by the last emergency stop
    pub fn last_snapshot(&self) -> Option<serde_json::Value> {
        lock(&self.shared.snapshot).clone()
    }
}

fn spawn_cadence(shared: Arc<CoreShared>, kind: CadenceKind) -> JoinHandle<()> {
    let interval_ms = match kind {
        CadenceKind::DecisionTick => shared.config.decision_tick_interval_ms,
        CadenceKind::Sync => shared.config.sync_interval_ms,
        CadenceKind::Settlement => shared.config.settlement_interval_ms,
        CadenceKind::HealthCheck => shared.config.health_check_interval_ms,
        CadenceKind::TimeAdvance => shared.config.time_advance_interval_ms,
    };
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms.max(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut shutdown = shared.shutdown.subscribe();
        // The first tick completes immediately; consume it so each
        // cadence first fires one full interval after start
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }
            if !shared.running.load(Ordering::SeqCst) || shared.emergency.load(Ordering::SeqCst) {
                break;
            }
            if shared.paused.load(Ordering::SeqCst) {
                continue;
            }
            shared.run_cadence(kind).await;
        }
    })
}

impl CoreShared {
    fn emit(&self, event: LifecycleEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }

    fn sim_time(&self) -> SimTime {
        f64::from_bits(self.sim_time_bits.load(Ordering::SeqCst))
    }

    fn advance_sim_time(&self, delta_days: f64) {
        let _ = self
            .sim_time_bits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |bits| {
                Some((f64::from_bits(bits) + delta_days).to_bits())
            });
    }

    /// Run one cadence invocation under its in-flight guard
    async fn run_cadence(self: &Arc<Self>, kind: CadenceKind) {
        let flag = &self.in_flight[kind.index()];
        if flag
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!(cadence = kind.label(), "previous invocation still running, skipped");
            return;
        }
        let _claim = InFlightClaim { flag };

        let outcome = match kind {
            CadenceKind::DecisionTick => self.run_decision_tick().await,
            CadenceKind::Sync => self.run_sync_cycle().await,
            CadenceKind::Settlement => self.run_settlement(),
            CadenceKind::HealthCheck => self.run_health_check(),
            CadenceKind::TimeAdvance => {
                self.advance_sim_time(
                    self.config.time_advance_interval_ms as f64 / 1000.0
                        * self.config.game_time_scale,
                );
                Ok(())
            }
        };

        if let Err(e) = outcome {
            tracing::error!(cadence = kind.label(), "processing error: {e}");
            self.emit(LifecycleEvent::ProcessingError {
                cadence: kind,
                message: e.to_string(),
            });
        }
    }

    /// Decision cadence: invoke admitted producers on the worker pool
    /// and queue their records for the next sync cycle
    async fn run_decision_tick(self: &Arc<Self>) -> Result<()> {
        let ctx = self.tick_context();
        let producers = lock(&self.registry).producer_ids();
        let timeout = Duration::from_millis(self.config.producer_timeout_ms);
        let mut ticks: JoinSet<(SubsystemId, Result<Vec<ChangeRecord>>)> = JoinSet::new();

        for id in producers {
            let (admission, cost, module) = {
                let registry = lock(&self.registry);
                let ledger = lock(&self.ledger);
                let status = registry
                    .health_status(&id)
                    .unwrap_or(HealthStatus::Healthy);
                let cost = registry
                    .subsystem(&id)
                    .map(|r| r.config.cost_per_invocation)
                    .unwrap_or(0.0);
                (ledger.admit(status), cost, registry.module(&id))
            };

            if !admission.is_granted() {
                tracing::debug!(subsystem = %id, reason = admission.label(), "producer skipped");
                let mut metrics = lock(&self.metrics);
                match admission {
                    Admission::DeniedBudget => metrics.skipped_budget += 1,
                    Admission::DeniedHealth => metrics.skipped_health += 1,
                    Admission::Granted => {}
                }
                drop(metrics);
                self.emit(LifecycleEvent::DecisionSkipped {
                    subsystem: id,
                    reason: admission,
                });
                continue;
            }
            let Some(ModuleHandle::Producer(module)) = module else {
                continue;
            };

            lock(&self.ledger).record_invocation(cost);
            let permits = self.producer_permits.clone();
            let ctx = ctx.clone();
            ticks.spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                let tick = tokio::task::spawn_blocking(move || lock_module(&module).tick(&ctx));
                match tokio::time::timeout(timeout, tick).await {
                    Ok(Ok(result)) => (id, result),
                    // Panicked producer task
                    Ok(Err(join_error)) => (
                        id.clone(),
                        Err(NexusError::SubsystemFailure {
                            id,
                            message: join_error.to_string(),
                        }),
                    ),
                    // The late call's output is discarded with the handle
                    Err(_) => (id.clone(), Err(NexusError::Timeout(id))),
                }
            });
        }

        while let Some(joined) = ticks.join_next().await {
            let Ok((id, outcome)) = joined else { continue };
            match outcome {
                Ok(records) => {
                    self.note_success(&id);
                    lock(&self.pending_decisions).extend(records);
                }
                Err(e) => {
                    tracing::warn!(subsystem = %id, "producer tick failed: {e}");
                    self.note_failure(&id);
                }
            }
        }
        Ok(())
    }

    /// One full sync cycle:
    /// collect -> transform -> detect -> resolve -> apply -> predict
    async fn run_sync_cycle(self: &Arc<Self>) -> Result<()> {
        let started = Instant::now();
        let cycle = self.cycle.fetch_add(1, Ordering::SeqCst) + 1;
        self.emit(LifecycleEvent::CycleStarted { cycle });

        // Phase 1: collect. Queued decision records plus a fresh tick of
        // every deterministic system.
        let decision_records: Vec<ChangeRecord> = {
            let mut pending = lock(&self.pending_decisions);
            pending.drain(..).collect()
        };
        let ctx = self.tick_context();
        let dt = {
            let now_bits = self.sim_time_bits.load(Ordering::SeqCst);
            let last_bits = self.last_sync_sim_bits.swap(now_bits, Ordering::SeqCst);
            (f64::from_bits(now_bits) - f64::from_bits(last_bits)).max(0.0)
        };

        let systems: Vec<(SubsystemId, ModuleHandle)> = {
            let registry = lock(&self.registry);
            registry
                .system_ids()
                .into_iter()
                .filter_map(|id| registry.module(&id).map(|m| (id, m)))
                .collect()
        };
        let mut deterministic_records = Vec::new();
        for (id, handle) in &systems {
            let ModuleHandle::System(module) = handle else {
                continue;
            };
            match lock_module(module).tick(&ctx, dt) {
                Ok(records) => {
                    self.note_success(id);
                    deterministic_records.extend(records);
                }
                Err(e) => {
                    tracing::warn!(subsystem = %id, "deterministic tick failed: {e}");
                    self.note_failure(id);
                }
            }
        }

        // Phase 2: transform every routed record into its targets'
        // vocabularies
        let mut transformed: Vec<TransformedChange> = Vec::new();
        let mut used_rules: Vec<String> = Vec::new();
        {
            let registry = lock(&self.registry);
            let mut engine = lock(&self.engine);
            for record in decision_records.iter().chain(deterministic_records.iter()) {
                for rule in registry.matching_rules(record) {
                    used_rules.push(rule.id.clone());
                    for target in &rule.targets {
                        transformed.push(engine.transform(record, rule, target));
                    }
                }
            }
        }
        lock(&self.registry).note_rule_usage(&used_rules);

        // Phase 3: detect cross-authority conflicts
        let conflicts: Vec<Conflict> = {
            let registry = lock(&self.registry);
            detect_conflicts(
                &decision_records,
                &deterministic_records,
                &registry,
                self.config.severity_scale,
            )
        };

        // Phase 4: resolve
        let resolutions: Vec<Resolution> = {
            let mut resolver = lock(&self.resolver);
            conflicts.iter().map(|c| resolver.resolve(c)).collect()
        };

        // Phase 5: apply. Conflicting records carry the resolved value.
        for change in &mut transformed {
            let resolved = conflicts.iter().zip(resolutions.iter()).find(|(c, _)| {
                same_record(&c.decision, &change.record)
                    || same_record(&c.deterministic, &change.record)
            });
            if let Some((_, resolution)) = resolved {
                change.value = resolution.value.clone();
            }
        }
        let handles: AHashMap<SubsystemId, ModuleHandle> = {
            let registry = lock(&self.registry);
            transformed
                .iter()
                .filter_map(|c| registry.module(&c.target).map(|m| (c.target.clone(), m)))
                .collect()
        };
        for change in &transformed {
            let Some(handle) = handles.get(&change.target) else {
                tracing::warn!(target = %change.target, rule = change.rule_id, "rule targets unknown subsystem");
                continue;
            };
            if let Err(e) = handle.apply_integration(change) {
                tracing::warn!(target = %change.target, "apply failed: {e}");
                self.note_failure(&change.target);
            }
        }

        // Phase 6: feed the prediction engine
        {
            let mut predictor = lock(&self.predictor);
            predictor.ingest(&decision_records);
            predictor.ingest(&deterministic_records);
        }

        let latency_ms = started.elapsed().as_millis() as u64;
        {
            let mut metrics = lock(&self.metrics);
            metrics.last_cycle_latency_ms = latency_ms;
            metrics.decision_records_total += decision_records.len() as u64;
            metrics.deterministic_records_total += deterministic_records.len() as u64;
            metrics.conflicts_total += conflicts.len() as u64;
            metrics.resolutions_total += resolutions.len() as u64;
        }
        tracing::debug!(
            cycle,
            latency_ms,
            decision = decision_records.len(),
            deterministic = deterministic_records.len(),
            conflicts = conflicts.len(),
            "sync cycle completed"
        );
        self.emit(LifecycleEvent::CycleCompleted {
            cycle,
            latency_ms,
            decision_changes: decision_records.len(),
            deterministic_changes: deterministic_records.len(),
            conflicts: conflicts.len(),
            resolutions: resolutions.len(),
        });
        Ok(())
    }

    /// Settlement tick: close the budget period, advance the quarter
    fn run_settlement(&self) -> Result<()> {
        let quarter = self.quarter.fetch_add(1, Ordering::SeqCst) + 1;
        let (calls, period_cost) = {
            let mut ledger = lock(&self.ledger);
            let closed = (ledger.calls_this_period(), ledger.period_cost());
            ledger.reset_period();
            closed
        };
        tracing::info!(quarter, calls, period_cost, "settlement period closed");
        self.emit(LifecycleEvent::SettlementClosed {
            quarter,
            calls,
            period_cost,
        });
        Ok(())
    }

    /// Health-check tick: summarize, escalate to emergency when the
    /// excluded fraction breaches the threshold
    fn run_health_check(self: &Arc<Self>) -> Result<()> {
        let summary = lock(&self.registry).health_summary();
        let score = summary.score();
        self.emit(LifecycleEvent::HealthChecked { summary, score });

        let breach = lock(&self.monitor).check_emergency(&summary);
        if breach {
            self.engage_emergency("health threshold breached");
        }
        Ok(())
    }

    /// Engage the emergency stop exactly once: halt scheduling and write
    /// a minimal state snapshot. Cadence tasks observe the flag and exit.
    fn engage_emergency(&self, reason: &str) {
        if self.emergency.swap(true, Ordering::SeqCst) {
            return;
        }
        self.running.store(false, Ordering::SeqCst);
        let snapshot = self.build_snapshot(reason);
        *lock(&self.snapshot) = Some(snapshot);
        tracing::error!(reason, "EMERGENCY STOP engaged");
        self.emit(LifecycleEvent::EmergencyStop {
            reason: reason.to_string(),
            timestamp_ms: now_ms(),
        });
    }

    fn build_snapshot(&self, reason: &str) -> serde_json::Value {
        let registry = lock(&self.registry);
        let ledger = lock(&self.ledger);
        let subsystems: Vec<serde_json::Value> = registry
            .registrations()
            .map(|r| {
                let health = registry.health(&r.id);
                serde_json::json!({
                    "id": r.id,
                    "authority": r.authority.label(),
                    "status": health.map(|h| h.status.label()).unwrap_or("unknown"),
                    "consecutive_failures": health.map(|h| h.consecutive_failures).unwrap_or(0),
                })
            })
            .collect();
        serde_json::json!({
            "reason": reason,
            "timestamp_ms": now_ms(),
            "cycle": self.cycle.load(Ordering::SeqCst),
            "quarter": self.quarter.load(Ordering::SeqCst),
            "sim_time": self.sim_time(),
            "rule_count": registry.rule_count(),
            "budget": {
                "calls_this_period": ledger.calls_this_period(),
                "limit": ledger.limit(),
                "total_cost": ledger.total_cost(),
            },
            "subsystems": subsystems,
        })
    }

    /// Context for the current instant, including a fresh output
    /// snapshot from every deterministic system
    fn tick_context(&self) -> TickContext {
        let registry = lock(&self.registry);
        let mut system_outputs = AHashMap::new();
        for id in registry.system_ids() {
            if let Some(ModuleHandle::System(module)) = registry.module(&id) {
                system_outputs.insert(id, lock_module(&module).current_output());
            }
        }
        TickContext {
            cycle: self.cycle.load(Ordering::SeqCst),
            quarter: self.quarter.load(Ordering::SeqCst),
            sim_time: self.sim_time(),
            timestamp_ms: now_ms(),
            system_outputs,
        }
    }

    fn note_success(&self, id: &SubsystemId) {
        let mut registry = lock(&self.registry);
        let monitor = lock(&self.monitor);
        if let Some(record) = registry.health_mut(id) {
            monitor.record_success(record);
        }
    }

    /// Record a failure; a subsystem newly reaching critical gets its
    /// single automatic recovery attempt
    fn note_failure(&self, id: &SubsystemId) {
        let attempt_recovery = {
            let mut registry = lock(&self.registry);
            let monitor = lock(&self.monitor);
            let Some(record) = registry.health_mut(id) else {
                return;
            };
            let newly = monitor.record_failure(record);
            newly == Some(HealthStatus::Critical) && monitor.claim_recovery_attempt(record)
        };
        if attempt_recovery {
            self.attempt_recovery(id);
        }
    }

    fn attempt_recovery(&self, id: &SubsystemId) {
        let Some(module) = lock(&self.registry).module(id) else {
            return;
        };
        tracing::info!(subsystem = %id, "attempting automatic recovery");
        match module.restart() {
            Ok(true) => {
                // The hook ran successfully: that is a recorded success
                self.note_success(id);
                tracing::info!(subsystem = %id, "subsystem restarted");
            }
            Ok(false) => {
                tracing::debug!(subsystem = %id, "no restart hook; subsystem stays excluded");
            }
            Err(e) => {
                tracing::warn!(subsystem = %id, "recovery failed: {e}");
            }
        }
    }

    fn status(&self) -> CoreStatus {
        let registry = lock(&self.registry);
        let ledger = lock(&self.ledger);
        let metrics = lock(&self.metrics);
        let health = registry.health_summary();
        let cycle = self.cycle.load(Ordering::SeqCst);
        CoreStatus {
            running: self.running.load(Ordering::SeqCst),
            paused: self.paused.load(Ordering::SeqCst),
            emergency: self.emergency.load(Ordering::SeqCst),
            cycle,
            quarter: self.quarter.load(Ordering::SeqCst),
            sim_time: self.sim_time(),
            last_cycle_latency_ms: metrics.last_cycle_latency_ms,
            pending_decision_records: lock(&self.pending_decisions).len(),
            producer_count: registry.producer_ids().len(),
            system_count: registry.system_ids().len(),
            rule_count: registry.rule_count(),
            conflicts_total: metrics.conflicts_total,
            resolutions_total: metrics.resolutions_total,
            conflict_rate: if cycle == 0 {
                0.0
            } else {
                metrics.conflicts_total as f64 / cycle as f64
            },
            budget_calls: ledger.calls_this_period(),
            budget_limit: ledger.limit(),
            budget_usage: ledger.usage(),
            period_cost: ledger.period_cost(),
            total_cost: ledger.total_cost(),
            health_score: health.score(),
            health,
            transformation_warnings: lock(&self.engine).warning_count(),
            skipped_budget: metrics.skipped_budget,
            skipped_health: metrics.skipped_health,
        }
    }
}

/// Identity check between a conflict side and a routed record
fn same_record(a: &ChangeRecord, b: &ChangeRecord) -> bool {
    a.source == b.source && a.entity == b.entity && a.kind == b.kind && a.timestamp_ms == b.timestamp_ms
}
