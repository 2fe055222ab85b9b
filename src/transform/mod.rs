//! Transformation engine - rewrites change payloads between vocabularies
//!
//! Each matched rule carries ordered steps; a step's output feeds the next.
//! Steps tagged for the wrong flow direction are skipped silently; a step
//! referencing a missing field is skipped with a recorded warning, never a
//! fatal error - the rest of the pipeline continues with what it has.

pub mod path;

use crate::core::error::Result;
use crate::core::types::{ChangeRecord, SubsystemId};
use crate::registry::rules::{Direction, IntegrationRule, StepKind};
use ahash::AHashMap;
use path::{insert_path, lookup_path, take_path};
use std::sync::Arc;

/// A named transformation function registered at setup time
pub type CustomTransform = Arc<dyn Fn(&mut serde_json::Value) -> Result<()> + Send + Sync>;

/// A change record translated into one target subsystem's vocabulary
#[derive(Debug, Clone)]
pub struct TransformedChange {
    /// Rule that routed this change
    pub rule_id: String,
    /// Subsystem the change is addressed to
    pub target: SubsystemId,
    /// Flow direction the steps ran under
    pub direction: Direction,
    /// The original record
    pub record: ChangeRecord,
    /// Payload after all applicable steps
    pub payload: serde_json::Value,
    /// Value to apply; starts as the record's proposed value and is
    /// replaced by the resolution when the record was in a conflict
    pub value: serde_json::Value,
}

/// Applies rule steps to change records
pub struct TransformationEngine {
    customs: AHashMap<String, CustomTransform>,
    warnings: u64,
}

impl TransformationEngine {
    pub fn new() -> Self {
        Self {
            customs: AHashMap::new(),
            warnings: 0,
        }
    }

    /// Register a named custom transform; later registrations replace
    /// earlier ones under the same name
    pub fn register_custom(&mut self, name: impl Into<String>, transform: CustomTransform) {
        self.customs.insert(name.into(), transform);
    }

    pub fn has_custom(&self, name: &str) -> bool {
        self.customs.contains_key(name)
    }

    /// Transformation warnings recorded since construction
    pub fn warning_count(&self) -> u64 {
        self.warnings
    }

    /// Translate `record` for `target` using the rule's steps
    pub fn transform(
        &mut self,
        record: &ChangeRecord,
        rule: &IntegrationRule,
        target: &SubsystemId,
    ) -> TransformedChange {
        let direction = Direction::of_authority(record.authority);
        let mut payload = record.payload.clone();

        for step in &rule.steps {
            if !step.direction.applies(direction) {
                continue;
            }
            self.apply_step(&mut payload, &step.kind, &rule.id);
        }

        TransformedChange {
            rule_id: rule.id.clone(),
            target: target.clone(),
            direction,
            record: record.clone(),
            payload,
            value: record.value.clone(),
        }
    }

    fn apply_step(&mut self, payload: &mut serde_json::Value, kind: &StepKind, rule_id: &str) {
        match kind {
            StepKind::Mapping { from, to } => match take_path(payload, from) {
                Some(value) => {
                    if !insert_path(payload, to, value) {
                        self.warn(rule_id, &format!("mapping target {to} is not addressable"));
                    }
                }
                None => self.warn(rule_id, &format!("mapping source {from} missing")),
            },
            StepKind::Scaling {
                field,
                source_min,
                source_max,
                target_min,
                target_max,
            } => {
                let Some(value) = lookup_path(payload, field).and_then(|v| v.as_f64()) else {
                    self.warn(rule_id, &format!("scaling field {field} missing or non-numeric"));
                    return;
                };
                let span = source_max - source_min;
                if span.abs() < f64::EPSILON {
                    self.warn(rule_id, &format!("scaling field {field} has empty source range"));
                    return;
                }
                let scaled = target_min + (value - source_min) * (target_max - target_min) / span;
                insert_path(payload, field, serde_json::json!(scaled));
            }
            StepKind::Aggregation {
                inputs,
                output,
                formula,
            } => {
                let mut values = Vec::with_capacity(inputs.len());
                for input in inputs {
                    match lookup_path(payload, input).and_then(|v| v.as_f64()) {
                        Some(v) => values.push(v),
                        None => {
                            self.warn(
                                rule_id,
                                &format!("aggregation input {input} missing or non-numeric"),
                            );
                            return;
                        }
                    }
                }
                insert_path(payload, output, serde_json::json!(formula.apply(&values)));
            }
            StepKind::Custom { name } => {
                let Some(transform) = self.customs.get(name).cloned() else {
                    self.warn(rule_id, &format!("custom transform {name} not registered"));
                    return;
                };
                if let Err(e) = transform(payload) {
                    self.warn(rule_id, &format!("custom transform {name} failed: {e}"));
                }
            }
        }
    }

    fn warn(&mut self, rule_id: &str, message: &str) {
        self.warnings += 1;
        tracing::warn!(rule = rule_id, "transformation step skipped: {message}");
    }
}

impl Default for TransformationEngine {
    fn default() -> Self {
        Self::new()
    }
}
