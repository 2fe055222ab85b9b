//! Conflict detection and resolution between authority groups
//!
//! Within one sync cycle, every (decision, deterministic) record pair is
//! checked for overlap: an explicit shared entity+attribute, or rule
//! effects naming the same target field. Same-group records never
//! conflict. Each conflict gets a severity score and one resolution under
//! the configured strategy; outcomes are cached under a coarse key so
//! similar conflicts resolve the same way faster. The cache is a bounded
//! LRU and purely a heuristic accelerator.

use crate::core::config::CoreConfig;
use crate::core::types::{now_ms, ChangeKind, ChangeRecord};
use crate::registry::Registry;
use ahash::AHashMap;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::VecDeque;
use uuid::Uuid;

/// Strategy applied when two authorities disagree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResolutionStrategy {
    /// Blend numeric values by configured weights; weighted random pick
    /// for non-numeric values
    Weighted,
    /// Decision producer wins, confidence 0.8
    DecisionPriority,
    /// Deterministic system wins, confidence 0.9
    DeterministicPriority,
    /// Later timestamp wins, confidence 0.7
    Temporal,
}

impl ResolutionStrategy {
    /// Parse a strategy name; unknown names fall back to `weighted`
    pub fn parse(name: &str) -> Self {
        match name {
            "weighted" => ResolutionStrategy::Weighted,
            "decision-priority" => ResolutionStrategy::DecisionPriority,
            "deterministic-priority" => ResolutionStrategy::DeterministicPriority,
            "temporal" => ResolutionStrategy::Temporal,
            other => {
                tracing::warn!(strategy = other, "unknown resolution strategy, using weighted");
                ResolutionStrategy::Weighted
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ResolutionStrategy::Weighted => "weighted",
            ResolutionStrategy::DecisionPriority => "decision-priority",
            ResolutionStrategy::DeterministicPriority => "deterministic-priority",
            ResolutionStrategy::Temporal => "temporal",
        }
    }
}

impl Serialize for ResolutionStrategy {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ResolutionStrategy {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(ResolutionStrategy::parse(&name))
    }
}

/// Two overlapping records from different authority groups
#[derive(Debug, Clone)]
pub struct Conflict {
    pub id: Uuid,
    pub decision: ChangeRecord,
    pub deterministic: ChangeRecord,
    /// Normalized disagreement magnitude in [0, 1]
    pub severity: f64,
    pub detected_ms: u64,
}

/// Outcome of resolving one conflict
#[derive(Debug, Clone)]
pub struct Resolution {
    pub conflict_id: Uuid,
    pub strategy: ResolutionStrategy,
    pub value: serde_json::Value,
    /// Always within [0, 1]
    pub confidence: f64,
    pub rationale: String,
}

/// Disagreement magnitude between two proposed values
///
/// Numeric pairs divide their absolute difference by the configured scale,
/// clamped to [0, 1]. Non-numeric pairs are 0 when equal, 1 otherwise.
pub fn severity(a: &serde_json::Value, b: &serde_json::Value, scale: f64) -> f64 {
    match (a.as_f64(), b.as_f64()) {
        (Some(a), Some(b)) => ((a - b).abs() / scale).clamp(0.0, 1.0),
        _ => {
            if a == b {
                0.0
            } else {
                1.0
            }
        }
    }
}

/// Find all cross-authority conflicts within one cycle's records
pub fn detect_conflicts(
    decision_records: &[ChangeRecord],
    deterministic_records: &[ChangeRecord],
    registry: &Registry,
    severity_scale: f64,
) -> Vec<Conflict> {
    // Rule-declared effects per record, computed once per side
    let decision_effects: Vec<Vec<(String, String)>> = decision_records
        .iter()
        .map(|r| declared_effects(registry, r))
        .collect();
    let deterministic_effects: Vec<Vec<(String, String)>> = deterministic_records
        .iter()
        .map(|r| declared_effects(registry, r))
        .collect();

    let mut conflicts = Vec::new();
    for (di, decision) in decision_records.iter().enumerate() {
        for (si, deterministic) in deterministic_records.iter().enumerate() {
            let entity_overlap = match (&decision.entity, &deterministic.entity) {
                (Some(a), Some(b)) => a.overlaps(b),
                _ => false,
            };
            let effect_overlap = decision_effects[di].iter().any(|effect| {
                deterministic_effects[si].iter().any(|other| effect == other)
            });

            if entity_overlap || effect_overlap {
                conflicts.push(Conflict {
                    id: Uuid::new_v4(),
                    decision: decision.clone(),
                    deterministic: deterministic.clone(),
                    severity: severity(&decision.value, &deterministic.value, severity_scale),
                    detected_ms: now_ms(),
                });
            }
        }
    }
    conflicts
}

fn declared_effects(registry: &Registry, record: &ChangeRecord) -> Vec<(String, String)> {
    registry
        .matching_rules(record)
        .into_iter()
        .flat_map(|rule| rule.effects.iter())
        .map(|effect| (effect.target.clone(), effect.field.clone()))
        .collect()
}

/// Coarse key for biasing similar future conflicts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct CacheKey {
    decision_kind: ChangeKind,
    deterministic_kind: ChangeKind,
    severity_bucket: u8,
}

impl CacheKey {
    fn of(conflict: &Conflict) -> Self {
        Self {
            decision_kind: conflict.decision.kind,
            deterministic_kind: conflict.deterministic.kind,
            severity_bucket: ((conflict.severity * 10.0) as u8).min(9),
        }
    }
}

/// Bounded LRU of past resolution strategies
struct ResolutionCache {
    capacity: usize,
    entries: AHashMap<CacheKey, ResolutionStrategy>,
    order: VecDeque<CacheKey>,
}

impl ResolutionCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: AHashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn get(&mut self, key: &CacheKey) -> Option<ResolutionStrategy> {
        let strategy = *self.entries.get(key)?;
        self.touch(key);
        Some(strategy)
    }

    fn insert(&mut self, key: CacheKey, strategy: ResolutionStrategy) {
        if self.entries.insert(key, strategy).is_some() {
            self.touch(&key);
            return;
        }
        self.order.push_back(key);
        while self.entries.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.entries.remove(&evicted);
            }
        }
    }

    fn touch(&mut self, key: &CacheKey) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            self.order.remove(pos);
            self.order.push_back(*key);
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Produces one resolution per conflict under the configured strategy
pub struct ConflictResolver {
    strategy: ResolutionStrategy,
    decision_weight: f64,
    deterministic_weight: f64,
    rng: ChaCha8Rng,
    cache: ResolutionCache,
    resolved_total: u64,
    cache_hits: u64,
}

impl ConflictResolver {
    pub fn new(config: &CoreConfig) -> Self {
        Self {
            strategy: config.resolution_strategy,
            decision_weight: config.decision_weight,
            deterministic_weight: config.deterministic_weight,
            rng: ChaCha8Rng::seed_from_u64(config.resolver_seed),
            cache: ResolutionCache::new(config.resolution_cache_capacity),
            resolved_total: 0,
            cache_hits: 0,
        }
    }

    pub fn resolve(&mut self, conflict: &Conflict) -> Resolution {
        let key = CacheKey::of(conflict);
        let strategy = match self.cache.get(&key) {
            Some(cached) => {
                self.cache_hits += 1;
                cached
            }
            None => self.strategy,
        };

        let resolution = self.apply(strategy, conflict);
        self.cache.insert(key, strategy);
        self.resolved_total += 1;
        tracing::debug!(
            conflict = %conflict.id,
            strategy = strategy.as_str(),
            severity = conflict.severity,
            confidence = resolution.confidence,
            "conflict resolved"
        );
        resolution
    }

    fn apply(&mut self, strategy: ResolutionStrategy, conflict: &Conflict) -> Resolution {
        match strategy {
            ResolutionStrategy::Weighted => self.weighted(conflict),
            ResolutionStrategy::DecisionPriority => Resolution {
                conflict_id: conflict.id,
                strategy,
                value: conflict.decision.value.clone(),
                confidence: 0.8,
                rationale: "decision producer takes precedence".into(),
            },
            ResolutionStrategy::DeterministicPriority => Resolution {
                conflict_id: conflict.id,
                strategy,
                value: conflict.deterministic.value.clone(),
                confidence: 0.9,
                rationale: "deterministic calculation takes precedence".into(),
            },
            ResolutionStrategy::Temporal => {
                let decision_newer =
                    conflict.decision.timestamp_ms > conflict.deterministic.timestamp_ms;
                let (value, rationale) = if decision_newer {
                    (
                        conflict.decision.value.clone(),
                        "decision change is more recent",
                    )
                } else {
                    (
                        conflict.deterministic.value.clone(),
                        "deterministic change is more recent",
                    )
                };
                Resolution {
                    conflict_id: conflict.id,
                    strategy,
                    value,
                    confidence: 0.7,
                    rationale: rationale.into(),
                }
            }
        }
    }

    fn weighted(&mut self, conflict: &Conflict) -> Resolution {
        let dw = self.decision_weight;
        let tw = self.deterministic_weight;
        let decision = &conflict.decision.value;
        let deterministic = &conflict.deterministic.value;

        let value = match (decision.as_f64(), deterministic.as_f64()) {
            (Some(a), Some(b)) => serde_json::json!(a * dw + b * tw),
            // Non-numeric values: weighted random selection
            _ => {
                if self.rng.gen::<f64>() < dw {
                    decision.clone()
                } else {
                    deterministic.clone()
                }
            }
        };

        Resolution {
            conflict_id: conflict.id,
            strategy: ResolutionStrategy::Weighted,
            value,
            // Balanced weights give the highest confidence
            confidence: (2.0 * dw.min(tw)).clamp(0.0, 1.0),
            rationale: format!("blended {dw:.2} decision / {tw:.2} deterministic"),
        }
    }

    pub fn resolved_total(&self) -> u64 {
        self.resolved_total
    }

    pub fn cache_hits(&self) -> u64 {
        self.cache_hits
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }
}
