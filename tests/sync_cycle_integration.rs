//! Integration tests for the full sync cycle
//!
//! These tests drive the scheduler end to end through `force_sync`:
//! - Decision records collected from producers, deterministic ticks inline
//! - Rule-routed transformation into target vocabularies
//! - Cross-authority conflict detection and weighted resolution
//! - Resolved values applied to target subsystems
//! - Pattern ingestion feeding forecasts

use nexus_sim::{
    Authority, ChangeKind, ChangeRecord, CoreConfig, DecisionProducer, DeterministicSystem,
    EntityRef, IntegrationRule, Result, Scheduler, SourceSelector, StepKind, SubsystemConfig,
    SubsystemId, TickContext, TransformStep, TransformedChange,
};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Opt-in log output: run with RUST_LOG=nexus_sim=debug to trace cycles
fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Producer that proposes one fixed price change per tick
struct PriceProposer {
    value: f64,
    ticks: Arc<AtomicU64>,
}

impl DecisionProducer for PriceProposer {
    fn tick(&mut self, _ctx: &TickContext) -> Result<Vec<ChangeRecord>> {
        let n = self.ticks.fetch_add(1, Ordering::SeqCst);
        Ok(vec![ChangeRecord::new(
            SubsystemId::from("strategy-ai"),
            Authority::Decision,
            ChangeKind::Decision,
        )
        .with_entity(EntityRef::new("market-1", "market", "price"))
        .with_value(json!(self.value))
        .with_payload(json!({ "confidence": 0.9 }))
        .with_sim_time(n as f64)])
    }

    fn apply_integration(&mut self, _change: &TransformedChange) -> Result<()> {
        Ok(())
    }
}

/// Deterministic system that reports one fixed price and records every
/// change applied to it
struct EconomySystem {
    value: f64,
    applied: Arc<Mutex<Vec<serde_json::Value>>>,
    payloads: Arc<Mutex<Vec<serde_json::Value>>>,
}

impl DeterministicSystem for EconomySystem {
    fn tick(&mut self, _ctx: &TickContext, _dt: f64) -> Result<Vec<ChangeRecord>> {
        Ok(vec![ChangeRecord::new(
            SubsystemId::from("economy"),
            Authority::Deterministic,
            ChangeKind::StateChange,
        )
        .with_entity(EntityRef::new("market-1", "market", "price"))
        .with_value(json!(self.value))])
    }

    fn apply_integration(&mut self, change: &TransformedChange) -> Result<()> {
        self.applied.lock().unwrap().push(change.value.clone());
        self.payloads.lock().unwrap().push(change.payload.clone());
        Ok(())
    }

    fn current_output(&self) -> serde_json::Value {
        json!({ "price": self.value })
    }
}

#[tokio::test]
async fn test_conflicting_proposals_resolve_to_weighted_blend() {
    init_logging();
    let scheduler = Scheduler::new(CoreConfig::default()).expect("default config is valid");
    let applied = Arc::new(Mutex::new(Vec::new()));
    let payloads = Arc::new(Mutex::new(Vec::new()));

    scheduler
        .register_decision_producer(
            "strategy-ai",
            Box::new(PriceProposer {
                value: 50.0,
                ticks: Arc::new(AtomicU64::new(0)),
            }),
            SubsystemConfig::default(),
        )
        .expect("register producer");
    scheduler
        .register_deterministic_system(
            "economy",
            Box::new(EconomySystem {
                value: 70.0,
                applied: applied.clone(),
                payloads: payloads.clone(),
            }),
            SubsystemConfig::default(),
        )
        .expect("register system");
    scheduler
        .add_integration_rule(
            IntegrationRule::new("route-prices").with_target(SubsystemId::from("economy")),
        )
        .expect("add rule");

    scheduler.start().expect("start");
    scheduler.force_sync().await.expect("force sync");

    let status = scheduler.status();
    assert_eq!(
        status.conflicts_total, 1,
        "AI 50 vs deterministic 70 on market-1.price is one conflict"
    );
    assert_eq!(status.resolutions_total, 1);

    // Default weighted strategy: 50 * 0.6 + 70 * 0.4 = 58
    let applied = applied.lock().unwrap();
    assert!(
        !applied.is_empty(),
        "rule routes both records into the economy system"
    );
    for value in applied.iter() {
        let v = value.as_f64().expect("resolved value is numeric");
        assert!(
            (v - 58.0).abs() < 1e-9,
            "conflicting records carry the blended value, got {v}"
        );
    }
}

#[tokio::test]
async fn test_empty_cycle_produces_no_conflicts() {
    let scheduler = Scheduler::new(CoreConfig::default()).expect("default config is valid");
    scheduler.start().expect("start");
    scheduler.force_sync().await.expect("force sync");

    let status = scheduler.status();
    assert_eq!(status.cycle, 1, "the cycle still runs and counts");
    assert_eq!(status.conflicts_total, 0);
    assert_eq!(status.resolutions_total, 0);
    assert_eq!(status.pending_decision_records, 0);
}

#[tokio::test]
async fn test_transformation_steps_reshape_routed_payloads() {
    let scheduler = Scheduler::new(CoreConfig::default()).expect("default config is valid");
    let applied = Arc::new(Mutex::new(Vec::new()));
    let payloads = Arc::new(Mutex::new(Vec::new()));

    struct ResourceProposer;
    impl DecisionProducer for ResourceProposer {
        fn tick(&mut self, _ctx: &TickContext) -> Result<Vec<ChangeRecord>> {
            Ok(vec![ChangeRecord::new(
                SubsystemId::from("planner-ai"),
                Authority::Decision,
                ChangeKind::Decision,
            )
            .with_payload(json!({ "ai": { "resource_priority": 0.25 } }))])
        }
        fn apply_integration(&mut self, _change: &TransformedChange) -> Result<()> {
            Ok(())
        }
    }

    scheduler
        .register_decision_producer("planner-ai", Box::new(ResourceProposer), SubsystemConfig::default())
        .expect("register producer");
    scheduler
        .register_deterministic_system(
            "economy",
            Box::new(EconomySystem {
                value: 0.0,
                applied,
                payloads: payloads.clone(),
            }),
            SubsystemConfig::default(),
        )
        .expect("register system");
    scheduler
        .add_integration_rule(
            IntegrationRule::new("priority-to-allocation")
                .with_source(SourceSelector::authority(Authority::Decision))
                .with_target(SubsystemId::from("economy"))
                .with_step(TransformStep::both(StepKind::Mapping {
                    from: "ai.resource_priority".into(),
                    to: "economy.allocation".into(),
                }))
                .with_step(TransformStep::both(StepKind::Scaling {
                    field: "economy.allocation".into(),
                    source_min: 0.0,
                    source_max: 1.0,
                    target_min: 0.0,
                    target_max: 100.0,
                })),
        )
        .expect("add rule");

    scheduler.start().expect("start");
    scheduler.force_sync().await.expect("force sync");

    let payloads = payloads.lock().unwrap();
    assert_eq!(payloads.len(), 1, "one decision record routed to economy");
    let allocation = payloads[0]
        .pointer("/economy/allocation")
        .and_then(|v| v.as_f64())
        .expect("mapped and scaled field present");
    assert!(
        (allocation - 25.0).abs() < 1e-9,
        "0.25 in [0,1] scales to 25 in [0,100], got {allocation}"
    );
    assert!(
        payloads[0].pointer("/ai/resource_priority").is_none(),
        "mapping moves the source field"
    );
}

#[tokio::test]
async fn test_missing_step_field_warns_and_skips() {
    let scheduler = Scheduler::new(CoreConfig::default()).expect("default config is valid");
    let applied = Arc::new(Mutex::new(Vec::new()));
    let payloads = Arc::new(Mutex::new(Vec::new()));

    struct BareProposer;
    impl DecisionProducer for BareProposer {
        fn tick(&mut self, _ctx: &TickContext) -> Result<Vec<ChangeRecord>> {
            Ok(vec![ChangeRecord::new(
                SubsystemId::from("bare-ai"),
                Authority::Decision,
                ChangeKind::Decision,
            )
            .with_payload(json!({ "present": 1.0 }))])
        }
        fn apply_integration(&mut self, _change: &TransformedChange) -> Result<()> {
            Ok(())
        }
    }

    scheduler
        .register_decision_producer("bare-ai", Box::new(BareProposer), SubsystemConfig::default())
        .expect("register producer");
    scheduler
        .register_deterministic_system(
            "economy",
            Box::new(EconomySystem {
                value: 0.0,
                applied,
                payloads: payloads.clone(),
            }),
            SubsystemConfig::default(),
        )
        .expect("register system");
    scheduler
        .add_integration_rule(
            IntegrationRule::new("refers-to-missing")
                .with_target(SubsystemId::from("economy"))
                .with_step(TransformStep::both(StepKind::Mapping {
                    from: "absent.field".into(),
                    to: "anywhere".into(),
                })),
        )
        .expect("add rule");

    scheduler.start().expect("start");
    scheduler.force_sync().await.expect("force sync");

    let status = scheduler.status();
    assert!(
        status.transformation_warnings >= 1,
        "missing step field must be recorded as a warning"
    );
    // The record still flows through, untouched by the skipped step
    let payloads = payloads.lock().unwrap();
    assert!(
        payloads.iter().any(|p| p.pointer("/present").is_some()),
        "record is delivered despite the skipped step"
    );
}

#[tokio::test]
async fn test_rule_usage_counted_and_forecasts_emerge() {
    let scheduler = Scheduler::new(CoreConfig::default()).expect("default config is valid");
    let applied = Arc::new(Mutex::new(Vec::new()));
    let payloads = Arc::new(Mutex::new(Vec::new()));
    let ticks = Arc::new(AtomicU64::new(0));

    scheduler
        .register_decision_producer(
            "strategy-ai",
            Box::new(PriceProposer {
                value: 50.0,
                ticks: ticks.clone(),
            }),
            SubsystemConfig::default(),
        )
        .expect("register producer");
    scheduler
        .register_deterministic_system(
            "economy",
            Box::new(EconomySystem {
                value: 70.0,
                applied,
                payloads,
            }),
            SubsystemConfig::default(),
        )
        .expect("register system");
    scheduler
        .add_integration_rule(
            IntegrationRule::new("route-prices").with_target(SubsystemId::from("economy")),
        )
        .expect("add rule");

    scheduler.start().expect("start");
    // Three cycles at sim-times 0, 1, 2: enough occurrences for a pattern
    for _ in 0..3 {
        scheduler.force_sync().await.expect("force sync");
    }

    assert_eq!(ticks.load(Ordering::SeqCst), 3, "producer ticked each cycle");
    let forecasts = scheduler.forecasts();
    assert!(
        forecasts
            .iter()
            .any(|f| f.key.entity_type == "market" && f.key.authority == Authority::Decision),
        "recurring decision pattern on market entities yields a forecast"
    );
    for f in &forecasts {
        assert!(f.confidence >= 0.0 && f.confidence <= 1.0);
    }

    let status = scheduler.status();
    assert_eq!(status.cycle, 3);
    assert_eq!(status.rule_count, 1);
}
