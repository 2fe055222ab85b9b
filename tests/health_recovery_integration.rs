//! Integration tests for health escalation, recovery, and emergency stop
//!
//! These tests verify the reliability path through the scheduler:
//! - Consecutive failures escalate a subsystem and exclude it from
//!   admission with a health-specific denial reason
//! - The single automatic recovery attempt invokes the restart hook
//! - The health-check cadence escalates to a global emergency stop when
//!   too many subsystems are excluded, and the emergency is fatal

use nexus_sim::{
    Admission, Authority, ChangeKind, ChangeRecord, CoreConfig, DecisionProducer, LifecycleEvent,
    NexusError, Result, Scheduler, SubsystemConfig, TickContext, TransformedChange,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Config with low failure thresholds so escalation is quick to drive
fn twitchy_config() -> CoreConfig {
    CoreConfig {
        warning_failures: 1,
        critical_failures: 2,
        offline_failures: 3,
        ..CoreConfig::default()
    }
}

/// Producer that always fails; optionally recovers through its hook
struct FlakyProducer {
    restarted: Arc<AtomicBool>,
    recoverable: bool,
    ticks: Arc<AtomicU64>,
}

impl DecisionProducer for FlakyProducer {
    fn tick(&mut self, _ctx: &TickContext) -> Result<Vec<ChangeRecord>> {
        self.ticks.fetch_add(1, Ordering::SeqCst);
        Err(NexusError::SubsystemFailure {
            id: "flaky".into(),
            message: "simulated outage".into(),
        })
    }

    fn apply_integration(&mut self, _change: &TransformedChange) -> Result<()> {
        Ok(())
    }

    fn restart(&mut self) -> Result<bool> {
        self.restarted.store(true, Ordering::SeqCst);
        Ok(self.recoverable)
    }
}

#[tokio::test]
async fn test_failures_escalate_and_exclude_from_admission() {
    let scheduler = Scheduler::new(twitchy_config()).expect("valid config");
    let ticks = Arc::new(AtomicU64::new(0));
    scheduler
        .register_decision_producer(
            "flaky",
            Box::new(FlakyProducer {
                restarted: Arc::new(AtomicBool::new(false)),
                recoverable: false,
                ticks: ticks.clone(),
            }),
            SubsystemConfig::default(),
        )
        .expect("register");

    let mut events = scheduler.subscribe();
    scheduler.start().expect("start");

    // Two failing ticks: warning after the first, critical after the second
    scheduler.force_sync().await.expect("sync");
    scheduler.force_sync().await.expect("sync");
    let status = scheduler.status();
    assert_eq!(status.health.critical, 1, "two failures reach critical");
    assert!((status.health_score - 0.3).abs() < 1e-9);

    // A critical subsystem is excluded: the third tick never runs
    scheduler.force_sync().await.expect("sync");
    assert_eq!(ticks.load(Ordering::SeqCst), 2, "excluded producer must not tick");
    assert_eq!(scheduler.status().skipped_health, 1);

    let mut saw_health_denial = false;
    while let Ok(event) = events.try_recv() {
        if let LifecycleEvent::DecisionSkipped { reason, .. } = event {
            assert_eq!(reason, Admission::DeniedHealth, "denial reason must be health, not budget");
            saw_health_denial = true;
        }
    }
    assert!(saw_health_denial);
}

#[tokio::test]
async fn test_producer_timeout_is_a_recorded_failure() {
    struct StuckProducer;
    impl DecisionProducer for StuckProducer {
        fn tick(&mut self, _ctx: &TickContext) -> Result<Vec<ChangeRecord>> {
            std::thread::sleep(Duration::from_millis(400));
            // Finishes long after the deadline; must never be integrated
            Ok(vec![ChangeRecord::new(
                "stuck".into(),
                Authority::Decision,
                ChangeKind::Decision,
            )])
        }
        fn apply_integration(&mut self, _change: &TransformedChange) -> Result<()> {
            Ok(())
        }
    }

    let config = CoreConfig {
        producer_timeout_ms: 50,
        ..twitchy_config()
    };
    let scheduler = Scheduler::new(config).expect("valid config");
    scheduler
        .register_decision_producer("stuck", Box::new(StuckProducer), SubsystemConfig::default())
        .expect("register");

    scheduler.start().expect("start");
    scheduler.force_sync().await.expect("force sync");

    let status = scheduler.status();
    assert_eq!(
        status.health.warning, 1,
        "a timed-out tick counts as a failure against the health record"
    );
    assert_eq!(
        status.pending_decision_records, 0,
        "output of a timed-out call is discarded"
    );
}

#[tokio::test]
async fn test_restart_hook_recovers_critical_subsystem() {
    let scheduler = Scheduler::new(twitchy_config()).expect("valid config");
    let restarted = Arc::new(AtomicBool::new(false));
    scheduler
        .register_decision_producer(
            "flaky",
            Box::new(FlakyProducer {
                restarted: restarted.clone(),
                recoverable: true,
                ticks: Arc::new(AtomicU64::new(0)),
            }),
            SubsystemConfig::default(),
        )
        .expect("register");

    scheduler.start().expect("start");
    scheduler.force_sync().await.expect("sync");
    scheduler.force_sync().await.expect("sync");

    assert!(
        restarted.load(Ordering::SeqCst),
        "reaching critical must invoke the restart hook once"
    );
    let status = scheduler.status();
    assert_eq!(
        status.health.healthy, 1,
        "a successful restart restores the subsystem to healthy"
    );
}

#[tokio::test]
async fn test_health_cadence_escalates_to_emergency_stop() {
    let config = CoreConfig {
        health_check_interval_ms: 25,
        ..twitchy_config()
    };
    let scheduler = Scheduler::new(config).expect("valid config");
    scheduler
        .register_decision_producer(
            "flaky",
            Box::new(FlakyProducer {
                restarted: Arc::new(AtomicBool::new(false)),
                recoverable: false,
                ticks: Arc::new(AtomicU64::new(0)),
            }),
            SubsystemConfig::default(),
        )
        .expect("register");

    let mut events = scheduler.subscribe();
    scheduler.start().expect("start");
    // Drive the only subsystem to critical: 1 of 1 excluded = 100% >= 30%
    scheduler.force_sync().await.expect("sync");
    scheduler.force_sync().await.expect("sync");

    tokio::time::sleep(Duration::from_millis(200)).await;

    let status = scheduler.status();
    assert!(status.emergency, "health-check cadence must engage the emergency stop");
    assert!(!status.running);

    // Emergency is fatal for the session
    assert!(matches!(scheduler.start(), Err(NexusError::EmergencyStopped)));
    assert!(matches!(
        scheduler.force_sync().await,
        Err(NexusError::EmergencyStopped)
    ));

    let snapshot = scheduler.last_snapshot().expect("emergency writes a snapshot");
    assert_eq!(snapshot["reason"], "health threshold breached");
    assert!(snapshot["subsystems"]
        .as_array()
        .expect("snapshot lists subsystems")
        .iter()
        .any(|s| s["id"] == "flaky"));

    let emergencies = {
        let mut n = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, LifecycleEvent::EmergencyStop { .. }) {
                n += 1;
            }
        }
        n
    };
    assert_eq!(emergencies, 1, "emergency stop must fire exactly once");
}

#[tokio::test]
async fn test_manual_emergency_stop_snapshots_state() {
    let scheduler = Scheduler::new(CoreConfig::default()).expect("valid config");
    scheduler.start().expect("start");
    scheduler.emergency_stop("operator abort");

    let status = scheduler.status();
    assert!(status.emergency);
    assert!(!status.running);
    let snapshot = scheduler.last_snapshot().expect("snapshot written");
    assert_eq!(snapshot["reason"], "operator abort");
    assert!(matches!(scheduler.start(), Err(NexusError::EmergencyStopped)));
}
