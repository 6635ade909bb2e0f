#![deny(warnings)]

//! Metric arithmetic for the simulation.
//!
//! This module provides validated utilities for:
//! - Drawing a realized change uniformly from a requested change's uncertainty band
//! - Compounding a percentage change onto a metric value
//! - Folding several advisors' proposals for the same metric into one change
//! - Impact of a snapshot against a baseline (absolute and percentage)

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use sim_core::{AppliedChange, MetricKey, RecommendationSet, WeekSnapshot};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

/// Errors produced by metric arithmetic.
#[derive(Debug, Error, PartialEq)]
pub enum EconError {
    /// Uncertainty must be finite and non-negative.
    #[error("invalid uncertainty range: {0}")]
    InvalidUncertainty(f64),
    /// Requested changes must be finite.
    #[error("non-finite change: {0}")]
    NonFinite(f64),
}

/// Draw a realized change uniformly from `[change - uncertainty, change + uncertainty]`.
///
/// A zero band returns the requested change unchanged.
pub fn apply_uncertainty<R: Rng>(
    rng: &mut R,
    change: f64,
    uncertainty: f64,
) -> Result<AppliedChange, EconError> {
    if !change.is_finite() {
        return Err(EconError::NonFinite(change));
    }
    if !uncertainty.is_finite() || uncertainty < 0.0 {
        return Err(EconError::InvalidUncertainty(uncertainty));
    }
    let (low, high) = (change - uncertainty, change + uncertainty);
    if !(high - low).is_finite() {
        return Err(EconError::InvalidUncertainty(uncertainty));
    }
    let actual = if uncertainty == 0.0 {
        change
    } else {
        rng.gen_range(low..=high)
    };
    Ok(AppliedChange {
        actual,
        uncertainty,
    })
}

/// Seeded source of realized changes.
///
/// Example:
/// let mut a = UncertaintyApplier::seeded(42);
/// let c = a.sample(8.0, 2.0).unwrap();
/// assert!((6.0..=10.0).contains(&c.actual));
#[derive(Clone, Debug)]
pub struct UncertaintyApplier {
    rng: ChaCha8Rng,
}

impl UncertaintyApplier {
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub fn from_entropy() -> Self {
        Self {
            rng: ChaCha8Rng::from_entropy(),
        }
    }

    /// Seeded when a seed is given, entropy otherwise.
    pub fn new(seed: Option<u64>) -> Self {
        seed.map_or_else(Self::from_entropy, Self::seeded)
    }

    pub fn sample(&mut self, change: f64, uncertainty: f64) -> Result<AppliedChange, EconError> {
        apply_uncertainty(&mut self.rng, change, uncertainty)
    }
}

/// New value after a percentage change relative to the pre-update value.
pub fn compound(current: f64, change_pct: f64) -> f64 {
    current * (1.0 + change_pct / 100.0)
}

/// How several advisors' proposals for one metric are combined.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationStrategy {
    /// Pairwise running fold `v = (v + x) / 2` in contribution order. Later
    /// advisors weigh more once three or more propose the same metric.
    #[default]
    RunningAverage,
    /// Arithmetic mean of all proposals.
    Mean,
}

/// Collapse a recommendation set into one change per metric.
pub fn aggregate(
    set: &RecommendationSet,
    strategy: AggregationStrategy,
) -> BTreeMap<MetricKey, f64> {
    let mut folded: BTreeMap<MetricKey, (f64, u32)> = BTreeMap::new();
    for agent in &set.agents {
        for (key, value) in &agent.changes {
            folded
                .entry(key.clone())
                .and_modify(|(acc, n)| {
                    *acc = match strategy {
                        AggregationStrategy::RunningAverage => (*acc + value) / 2.0,
                        AggregationStrategy::Mean => *acc + value,
                    };
                    *n += 1;
                })
                .or_insert((*value, 1));
        }
    }
    let out: BTreeMap<MetricKey, f64> = folded
        .into_iter()
        .map(|(key, (acc, n))| {
            let v = match strategy {
                AggregationStrategy::RunningAverage => acc,
                AggregationStrategy::Mean => acc / f64::from(n),
            };
            (key, v)
        })
        .collect();
    debug!(metrics = out.len(), ?strategy, "aggregated recommendations");
    out
}

/// Change of one metric between two snapshots.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricImpact {
    pub initial: f64,
    #[serde(rename = "final")]
    pub final_value: f64,
    pub absolute_change: f64,
    pub percent_change: f64,
}

impl MetricImpact {
    pub fn between(initial: f64, final_value: f64) -> Self {
        let absolute_change = final_value - initial;
        Self {
            initial,
            final_value,
            absolute_change,
            percent_change: percent_change(initial, absolute_change),
        }
    }
}

/// Percentage change against `initial`.
///
/// A zero baseline yields `±inf` carrying the sign of the change, or `0` when
/// nothing changed.
pub fn percent_change(initial: f64, absolute_change: f64) -> f64 {
    if initial == 0.0 {
        if absolute_change == 0.0 {
            0.0
        } else {
            f64::INFINITY.copysign(absolute_change)
        }
    } else {
        absolute_change / initial * 100.0
    }
}

/// Impact of `current` against `initial` for every metric present in both.
pub fn impact(initial: &WeekSnapshot, current: &WeekSnapshot) -> BTreeMap<MetricKey, MetricImpact> {
    let baseline = initial.values();
    current
        .values()
        .into_iter()
        .filter_map(|(key, value)| {
            baseline
                .get(&key)
                .map(|&start| (key, MetricImpact::between(start, value)))
        })
        .collect()
}

/// Per-update delta: only metrics whose value moved between `before` and `after`.
///
/// Metrics first introduced by `after` are reported against a zero baseline.
pub fn update_delta(
    before: &WeekSnapshot,
    after: &WeekSnapshot,
) -> BTreeMap<MetricKey, MetricImpact> {
    let prior = before.values();
    after
        .values()
        .into_iter()
        .filter_map(|(key, value)| {
            let start = prior.get(&key).copied().unwrap_or(0.0);
            (start != value).then(|| (key, MetricImpact::between(start, value)))
        })
        .collect()
}
