//! Pattern tracking and lookahead forecasts over the change stream
//!
//! Read-only from the cycle's perspective: the engine ingests every
//! record after apply and never influences resolution. Patterns group by
//! (authority, kind, entity type); a pattern with at least three
//! occurrences and a steady interval yields a forecast for its next
//! occurrence inside the configured horizon.

use crate::core::config::CoreConfig;
use crate::core::types::{Authority, ChangeKind, ChangeRecord, SimTime};
use ahash::AHashMap;
use std::collections::VecDeque;

/// Minimum occurrences before a pattern can forecast
const MIN_OCCURRENCES: usize = 3;

/// Occurrence count at which the count factor saturates
const FULL_CONFIDENCE_COUNT: f64 = 10.0;

/// Grouping key for recurring changes
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PatternKey {
    pub authority: Authority,
    pub kind: ChangeKind,
    pub entity_type: String,
}

impl PatternKey {
    fn of(record: &ChangeRecord) -> Self {
        Self {
            authority: record.authority,
            kind: record.kind,
            entity_type: record.entity_type().to_string(),
        }
    }
}

impl std::fmt::Display for PatternKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}_{}_{}",
            self.authority.label(),
            self.kind.label(),
            self.entity_type
        )
    }
}

/// Bounded occurrence history for one pattern
#[derive(Debug, Clone, Default)]
struct Pattern {
    /// Most recent occurrence sim-times, oldest first
    occurrences: VecDeque<SimTime>,
    total_seen: u64,
}

impl Pattern {
    fn push(&mut self, sim_time: SimTime, history: usize) {
        self.occurrences.push_back(sim_time);
        while self.occurrences.len() > history {
            self.occurrences.pop_front();
        }
        self.total_seen += 1;
    }

    fn intervals(&self) -> Vec<f64> {
        self.occurrences
            .iter()
            .zip(self.occurrences.iter().skip(1))
            .map(|(a, b)| b - a)
            .collect()
    }

    fn mean_interval(&self) -> Option<f64> {
        let intervals = self.intervals();
        if intervals.is_empty() {
            return None;
        }
        Some(intervals.iter().sum::<f64>() / intervals.len() as f64)
    }

    /// Confidence from occurrence count and interval regularity, capped at 1
    fn confidence(&self) -> f64 {
        let count_factor = (self.occurrences.len() as f64 / FULL_CONFIDENCE_COUNT).min(1.0);
        let intervals = self.intervals();
        let regularity = match self.mean_interval() {
            Some(mean) if mean > 0.0 && intervals.len() > 1 => {
                let variance = intervals
                    .iter()
                    .map(|i| (i - mean).powi(2))
                    .sum::<f64>()
                    / intervals.len() as f64;
                (1.0 - variance.sqrt() / mean).max(0.0)
            }
            Some(_) => 0.5,
            None => 0.0,
        };
        ((count_factor + regularity) / 2.0).min(1.0)
    }
}

/// A predicted next occurrence of a recurring pattern
#[derive(Debug, Clone)]
pub struct Forecast {
    pub key: PatternKey,
    pub predicted_at: SimTime,
    pub confidence: f64,
}

/// Rolling forecaster over the change stream
pub struct PredictionEngine {
    horizon: f64,
    history: usize,
    patterns: AHashMap<PatternKey, Pattern>,
}

impl PredictionEngine {
    pub fn new(config: &CoreConfig) -> Self {
        Self {
            horizon: config.prediction_horizon_days,
            history: config.pattern_history,
            patterns: AHashMap::new(),
        }
    }

    /// Feed one cycle's records into the pattern tracker
    pub fn ingest(&mut self, records: &[ChangeRecord]) {
        for record in records {
            self.patterns
                .entry(PatternKey::of(record))
                .or_default()
                .push(record.sim_time, self.history);
        }
    }

    /// Forecasts within the horizon, soonest first
    ///
    /// Patterns with fewer than three occurrences produce nothing.
    pub fn forecasts(&self, now: SimTime) -> Vec<Forecast> {
        let mut forecasts: Vec<Forecast> = self
            .patterns
            .iter()
            .filter_map(|(key, pattern)| {
                if pattern.occurrences.len() < MIN_OCCURRENCES {
                    return None;
                }
                let mean = pattern.mean_interval()?;
                if mean <= 0.0 {
                    return None;
                }
                let last = *pattern.occurrences.back()?;
                let predicted_at = last + mean;
                if predicted_at > now + self.horizon {
                    return None;
                }
                Some(Forecast {
                    key: key.clone(),
                    predicted_at,
                    confidence: pattern.confidence(),
                })
            })
            .collect();
        forecasts.sort_by(|a, b| a.predicted_at.total_cmp(&b.predicted_at));
        forecasts
    }

    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }
}
