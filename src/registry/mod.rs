//! Registry of subsystems, health records, and integration rules
//!
//! One explicit object passed by reference to every component - there are
//! no package-level registries. The scheduler owns it behind a mutex.

pub mod rules;
pub mod subsystem;

use crate::core::error::{NexusError, Result};
use crate::core::types::{now_ms, Authority, ChangeRecord, SubsystemId};
use crate::health::{HealthRecord, HealthStatus, HealthSummary};
use ahash::AHashMap;
use rules::IntegrationRule;
use std::sync::{Arc, Mutex};
use subsystem::{
    DecisionProducer, DeterministicSystem, ModuleHandle, SubsystemConfig, SubsystemRegistration,
};

#[derive(Default)]
pub struct Registry {
    subsystems: AHashMap<SubsystemId, SubsystemRegistration>,
    health: AHashMap<SubsystemId, HealthRecord>,
    /// Append-only; priority orders evaluation
    rules: Vec<IntegrationRule>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_producer(
        &mut self,
        id: SubsystemId,
        module: Box<dyn DecisionProducer>,
        config: SubsystemConfig,
    ) -> Result<()> {
        self.register(
            id,
            Authority::Decision,
            ModuleHandle::Producer(Arc::new(Mutex::new(module))),
            config,
        )
    }

    pub fn register_system(
        &mut self,
        id: SubsystemId,
        module: Box<dyn DeterministicSystem>,
        config: SubsystemConfig,
    ) -> Result<()> {
        self.register(
            id,
            Authority::Deterministic,
            ModuleHandle::System(Arc::new(Mutex::new(module))),
            config,
        )
    }

    fn register(
        &mut self,
        id: SubsystemId,
        authority: Authority,
        module: ModuleHandle,
        config: SubsystemConfig,
    ) -> Result<()> {
        if self.subsystems.contains_key(&id) {
            return Err(NexusError::DuplicateSubsystem(id));
        }
        tracing::info!(subsystem = %id, authority = authority.label(), "subsystem registered");
        self.health.insert(id.clone(), HealthRecord::new());
        self.subsystems.insert(
            id.clone(),
            SubsystemRegistration {
                id,
                authority,
                config,
                module,
                registered_ms: now_ms(),
            },
        );
        Ok(())
    }

    /// Destroy all registrations scoped to one civilization
    pub fn remove_civilization(&mut self, civ: &str) -> usize {
        let doomed: Vec<SubsystemId> = self
            .subsystems
            .values()
            .filter(|r| r.config.scope.civilization() == Some(civ))
            .map(|r| r.id.clone())
            .collect();
        for id in &doomed {
            self.subsystems.remove(id);
            self.health.remove(id);
            tracing::info!(subsystem = %id, civilization = civ, "subsystem destroyed with tenant");
        }
        doomed.len()
    }

    pub fn add_rule(&mut self, rule: IntegrationRule) -> Result<()> {
        if rule.id.is_empty() {
            return Err(NexusError::InvalidRule("rule id must not be empty".into()));
        }
        if self.rules.iter().any(|r| r.id == rule.id) {
            return Err(NexusError::InvalidRule(format!(
                "rule id {} already registered",
                rule.id
            )));
        }
        tracing::info!(rule = rule.id, "integration rule added");
        self.rules.push(rule);
        Ok(())
    }

    pub fn rule(&self, id: &str) -> Option<&IntegrationRule> {
        self.rules.iter().find(|r| r.id == id)
    }

    pub fn rules(&self) -> &[IntegrationRule] {
        &self.rules
    }

    /// Rules matching a record, highest priority first
    pub fn matching_rules(&self, record: &ChangeRecord) -> Vec<&IntegrationRule> {
        let mut matched: Vec<&IntegrationRule> =
            self.rules.iter().filter(|r| r.matches(record)).collect();
        matched.sort_by_key(|r| std::cmp::Reverse(r.priority));
        matched
    }

    /// Bump usage counters for rules that routed a record
    pub fn note_rule_usage(&mut self, rule_ids: &[String]) {
        for rule in &mut self.rules {
            if rule_ids.iter().any(|id| id == &rule.id) {
                rule.usage_count += 1;
            }
        }
    }

    pub fn subsystem(&self, id: &SubsystemId) -> Option<&SubsystemRegistration> {
        self.subsystems.get(id)
    }

    pub fn module(&self, id: &SubsystemId) -> Option<ModuleHandle> {
        self.subsystems.get(id).map(|r| r.module.clone())
    }

    /// Decision-producer ids, sorted for deterministic iteration
    pub fn producer_ids(&self) -> Vec<SubsystemId> {
        self.ids_of(Authority::Decision)
    }

    /// Deterministic-system ids, sorted for deterministic iteration
    pub fn system_ids(&self) -> Vec<SubsystemId> {
        self.ids_of(Authority::Deterministic)
    }

    fn ids_of(&self, authority: Authority) -> Vec<SubsystemId> {
        let mut ids: Vec<SubsystemId> = self
            .subsystems
            .values()
            .filter(|r| r.authority == authority)
            .map(|r| r.id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn registrations(&self) -> impl Iterator<Item = &SubsystemRegistration> {
        self.subsystems.values()
    }

    pub fn health(&self, id: &SubsystemId) -> Option<&HealthRecord> {
        self.health.get(id)
    }

    pub fn health_mut(&mut self, id: &SubsystemId) -> Option<&mut HealthRecord> {
        self.health.get_mut(id)
    }

    pub fn health_status(&self, id: &SubsystemId) -> Option<HealthStatus> {
        self.health.get(id).map(|r| r.status)
    }

    pub fn health_summary(&self) -> HealthSummary {
        let mut summary = HealthSummary::default();
        for record in self.health.values() {
            summary.count(record.status);
        }
        summary
    }

    pub fn subsystem_count(&self) -> usize {
        self.subsystems.len()
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}
