//! Core type definitions used throughout the codebase

use serde::{Deserialize, Serialize};

/// Unique identifier for a registered subsystem
///
/// Host-assigned, typically `<system>-<civilization>` (e.g. `economy-civ-7`)
/// or a bare name for shared/galactic subsystems.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubsystemId(pub String);

impl SubsystemId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SubsystemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubsystemId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Tenant scope of a subsystem
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
    /// Owned by a single civilization; destroyed with the tenant
    Civilization(String),
    /// Shared across all civilizations
    Shared,
    /// Galaxy-level systems spanning civilizations
    Galactic,
}

impl Scope {
    /// Civilization id this subsystem belongs to, if tenant-scoped
    pub fn civilization(&self) -> Option<&str> {
        match self {
            Scope::Civilization(id) => Some(id),
            _ => None,
        }
    }
}

/// Authority group a change record originates from
///
/// Conflicts only ever pair records from the two different groups; records
/// within one group never conflict with each other inside this core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Authority {
    /// Heuristic decision producers (may be slow, budget-gated)
    Decision,
    /// Numeric deterministic systems (fast, formula-driven)
    Deterministic,
}

impl Authority {
    pub fn label(self) -> &'static str {
        match self {
            Authority::Decision => "decision",
            Authority::Deterministic => "deterministic",
        }
    }
}

/// Kind of change record flowing through a sync cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    Decision,
    StateChange,
    Event,
}

impl ChangeKind {
    pub fn label(self) -> &'static str {
        match self {
            ChangeKind::Decision => "decision",
            ChangeKind::StateChange => "state-change",
            ChangeKind::Event => "event",
        }
    }
}

/// Simulated time in game days
pub type SimTime = f64;

/// Monotonic sync cycle counter
pub type Cycle = u64;

/// The entity and attribute a change record targets
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub entity_id: String,
    pub entity_type: String,
    pub attribute: String,
}

impl EntityRef {
    pub fn new(
        entity_id: impl Into<String>,
        entity_type: impl Into<String>,
        attribute: impl Into<String>,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            entity_type: entity_type.into(),
            attribute: attribute.into(),
        }
    }

    /// Whether two references name the same entity and attribute
    pub fn overlaps(&self, other: &EntityRef) -> bool {
        self.entity_id == other.entity_id && self.attribute == other.attribute
    }
}

/// A proposed change produced by one subsystem during one cycle
///
/// Records are transient: produced by a tick, consumed by the sync cycle
/// that drains them, never persisted by this core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub source: SubsystemId,
    pub authority: Authority,
    pub kind: ChangeKind,
    /// Declared target, when the change names one explicitly
    pub entity: Option<EntityRef>,
    /// Proposed value for the target attribute
    pub value: serde_json::Value,
    /// Additional data, opaque to the core except for declared fields
    pub payload: serde_json::Value,
    /// Wall-clock production time (epoch milliseconds)
    pub timestamp_ms: u64,
    /// Simulated-time tag at production
    pub sim_time: SimTime,
}

impl ChangeRecord {
    pub fn new(source: SubsystemId, authority: Authority, kind: ChangeKind) -> Self {
        Self {
            source,
            authority,
            kind,
            entity: None,
            value: serde_json::Value::Null,
            payload: serde_json::Value::Object(serde_json::Map::new()),
            timestamp_ms: now_ms(),
            sim_time: 0.0,
        }
    }

    pub fn with_entity(mut self, entity: EntityRef) -> Self {
        self.entity = Some(entity);
        self
    }

    pub fn with_value(mut self, value: serde_json::Value) -> Self {
        self.value = value;
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_sim_time(mut self, sim_time: SimTime) -> Self {
        self.sim_time = sim_time;
        self
    }

    pub fn with_timestamp(mut self, timestamp_ms: u64) -> Self {
        self.timestamp_ms = timestamp_ms;
        self
    }

    /// Entity type tag used for pattern grouping
    pub fn entity_type(&self) -> &str {
        self.entity
            .as_ref()
            .map(|e| e.entity_type.as_str())
            .unwrap_or("unknown")
    }
}

/// Current wall-clock time as epoch milliseconds
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
