//! Integration rule model: selectors, conditions, transformation steps
//!
//! A rule declares which change records it routes (source selector plus
//! condition predicates), where they go (target subsystems), and how the
//! payload is rewritten on the way (ordered, direction-tagged steps).
//! Rules are append-only: there is no removal or versioning path; the
//! priority field orders evaluation.

use crate::core::types::{Authority, ChangeKind, ChangeRecord, SubsystemId};
use crate::transform::path::lookup_path;
use serde::{Deserialize, Serialize};

/// Direction a transformation step applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Direction {
    DecisionToDeterministic,
    DeterministicToDecision,
    Both,
}

impl Direction {
    /// Whether a step tagged `self` runs for an actual flow direction
    pub fn applies(self, actual: Direction) -> bool {
        self == Direction::Both || self == actual
    }

    /// Flow direction for a record of the given authority
    pub fn of_authority(authority: Authority) -> Direction {
        match authority {
            Authority::Decision => Direction::DecisionToDeterministic,
            Authority::Deterministic => Direction::DeterministicToDecision,
        }
    }
}

/// Comparison operator in a rule condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

/// Field comparison gating a rule
///
/// `field` is a dotted path into the record payload. Ordering operators
/// only match when both sides are numbers; a missing field never matches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub op: CmpOp,
    pub value: serde_json::Value,
}

impl Condition {
    pub fn new(field: impl Into<String>, op: CmpOp, value: serde_json::Value) -> Self {
        Self {
            field: field.into(),
            op,
            value,
        }
    }

    pub fn eval(&self, payload: &serde_json::Value) -> bool {
        let Some(actual) = lookup_path(payload, &self.field) else {
            return false;
        };
        match self.op {
            CmpOp::Eq => actual == &self.value,
            CmpOp::Ne => actual != &self.value,
            CmpOp::Gt | CmpOp::Ge | CmpOp::Lt | CmpOp::Le => {
                let (Some(a), Some(b)) = (actual.as_f64(), self.value.as_f64()) else {
                    return false;
                };
                match self.op {
                    CmpOp::Gt => a > b,
                    CmpOp::Ge => a >= b,
                    CmpOp::Lt => a < b,
                    CmpOp::Le => a <= b,
                    _ => unreachable!(),
                }
            }
        }
    }
}

/// Closed set of aggregation formulas
///
/// Selected by name at rule-registration time; never evaluated code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AggregateFormula {
    Sum,
    Mean,
    Min,
    Max,
    /// Dot product with declared weights; inputs beyond the weight list
    /// contribute nothing
    WeightedSum { weights: Vec<f64> },
}

impl AggregateFormula {
    pub fn apply(&self, inputs: &[f64]) -> f64 {
        match self {
            AggregateFormula::Sum => inputs.iter().sum(),
            AggregateFormula::Mean => {
                if inputs.is_empty() {
                    0.0
                } else {
                    inputs.iter().sum::<f64>() / inputs.len() as f64
                }
            }
            AggregateFormula::Min => inputs.iter().copied().fold(f64::INFINITY, f64::min),
            AggregateFormula::Max => inputs.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            AggregateFormula::WeightedSum { weights } => inputs
                .iter()
                .zip(weights.iter())
                .map(|(v, w)| v * w)
                .sum(),
        }
    }
}

/// What a single transformation step does
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepKind {
    /// Rename: move the value at `from` to `to`
    Mapping { from: String, to: String },
    /// Affine remap of a numeric field from a source range to a target range
    Scaling {
        field: String,
        source_min: f64,
        source_max: f64,
        target_min: f64,
        target_max: f64,
    },
    /// Evaluate a named formula over declared input paths, writing `output`
    Aggregation {
        inputs: Vec<String>,
        output: String,
        formula: AggregateFormula,
    },
    /// A function registered by name at setup time
    Custom { name: String },
}

/// One ordered, direction-tagged step of a rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformStep {
    pub kind: StepKind,
    pub direction: Direction,
}

impl TransformStep {
    pub fn both(kind: StepKind) -> Self {
        Self {
            kind,
            direction: Direction::Both,
        }
    }

    pub fn directed(kind: StepKind, direction: Direction) -> Self {
        Self { kind, direction }
    }
}

/// Which records a rule routes; `None` fields are wildcards
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceSelector {
    pub authority: Option<Authority>,
    pub kind: Option<ChangeKind>,
    pub subsystem: Option<SubsystemId>,
}

impl SourceSelector {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn authority(authority: Authority) -> Self {
        Self {
            authority: Some(authority),
            ..Self::default()
        }
    }

    pub fn subsystem(id: SubsystemId) -> Self {
        Self {
            subsystem: Some(id),
            ..Self::default()
        }
    }

    pub fn with_kind(mut self, kind: ChangeKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn matches(&self, record: &ChangeRecord) -> bool {
        if let Some(authority) = self.authority {
            if authority != record.authority {
                return false;
            }
        }
        if let Some(kind) = self.kind {
            if kind != record.kind {
                return false;
            }
        }
        if let Some(subsystem) = &self.subsystem {
            if subsystem != &record.source {
                return false;
            }
        }
        true
    }
}

/// Direct effect a rule declares on a target field
///
/// Effects feed conflict detection: two records whose rules adjust the
/// same `target`+`field` overlap even without an explicit entity ref.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Effect {
    pub target: String,
    pub field: String,
    pub adjustment: f64,
}

impl Effect {
    pub fn new(target: impl Into<String>, field: impl Into<String>, adjustment: f64) -> Self {
        Self {
            target: target.into(),
            field: field.into(),
            adjustment,
        }
    }
}

/// A declarative routing + transformation rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationRule {
    pub id: String,
    pub source: SourceSelector,
    pub targets: Vec<SubsystemId>,
    pub conditions: Vec<Condition>,
    pub steps: Vec<TransformStep>,
    pub effects: Vec<Effect>,
    /// Higher priority rules are evaluated first
    pub priority: i32,
    /// Matches observed since registration
    #[serde(skip)]
    pub usage_count: u64,
}

impl IntegrationRule {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: SourceSelector::any(),
            targets: Vec::new(),
            conditions: Vec::new(),
            steps: Vec::new(),
            effects: Vec::new(),
            priority: 0,
            usage_count: 0,
        }
    }

    pub fn with_source(mut self, source: SourceSelector) -> Self {
        self.source = source;
        self
    }

    pub fn with_target(mut self, target: SubsystemId) -> Self {
        self.targets.push(target);
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_step(mut self, step: TransformStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Selector plus all conditions must hold
    pub fn matches(&self, record: &ChangeRecord) -> bool {
        self.source.matches(record) && self.conditions.iter().all(|c| c.eval(&record.payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(payload: serde_json::Value) -> ChangeRecord {
        ChangeRecord::new(
            SubsystemId::from("economy-civ-1"),
            Authority::Decision,
            ChangeKind::Decision,
        )
        .with_payload(payload)
    }

    #[test]
    fn test_condition_ops() {
        let payload = json!({ "economy": { "gdp": 42.0 }, "mood": "tense" });

        assert!(Condition::new("economy.gdp", CmpOp::Gt, json!(40)).eval(&payload));
        assert!(Condition::new("economy.gdp", CmpOp::Le, json!(42)).eval(&payload));
        assert!(Condition::new("mood", CmpOp::Eq, json!("tense")).eval(&payload));
        assert!(Condition::new("mood", CmpOp::Ne, json!("calm")).eval(&payload));
        // Ordering against a non-number never matches
        assert!(!Condition::new("mood", CmpOp::Gt, json!(1)).eval(&payload));
        // Missing field never matches
        assert!(!Condition::new("economy.debt", CmpOp::Eq, json!(0)).eval(&payload));
    }

    #[test]
    fn test_selector_wildcards() {
        let r = record(json!({}));

        assert!(SourceSelector::any().matches(&r));
        assert!(SourceSelector::authority(Authority::Decision).matches(&r));
        assert!(!SourceSelector::authority(Authority::Deterministic).matches(&r));
        assert!(SourceSelector::subsystem(SubsystemId::from("economy-civ-1")).matches(&r));
        assert!(!SourceSelector::any()
            .with_kind(ChangeKind::Event)
            .matches(&r));
    }

    #[test]
    fn test_rule_matches_selector_and_conditions() {
        let rule = IntegrationRule::new("gdp-routing")
            .with_source(SourceSelector::authority(Authority::Decision))
            .with_condition(Condition::new("economy.gdp", CmpOp::Gt, json!(10)));

        assert!(rule.matches(&record(json!({ "economy": { "gdp": 42.0 } }))));
        assert!(!rule.matches(&record(json!({ "economy": { "gdp": 5.0 } }))));
        assert!(!rule.matches(&record(json!({}))));
    }

    #[test]
    fn test_aggregate_formulas() {
        let inputs = [2.0, 4.0, 6.0];
        assert_eq!(AggregateFormula::Sum.apply(&inputs), 12.0);
        assert_eq!(AggregateFormula::Mean.apply(&inputs), 4.0);
        assert_eq!(AggregateFormula::Min.apply(&inputs), 2.0);
        assert_eq!(AggregateFormula::Max.apply(&inputs), 6.0);
        assert_eq!(
            AggregateFormula::WeightedSum {
                weights: vec![0.5, 0.25, 0.25]
            }
            .apply(&inputs),
            1.0 + 1.0 + 1.5
        );
        assert_eq!(AggregateFormula::Mean.apply(&[]), 0.0);
    }
}
