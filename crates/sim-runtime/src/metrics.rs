//! Weekly metric table: validation, noisy application and persistence.

use crate::error::{ConstraintViolation, EngineError};
use persistence::SnapshotStore;
use sim_core::{
    normalize_department, AppliedChanges, ConstraintCatalog, MetricKey, Scope, WeekSnapshot,
};
use sim_econ::{compound, MetricImpact, UncertaintyApplier};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// What an untouched `week` would start from: core values of the latest
/// earlier week, and each department from the latest earlier week holding it.
fn preview(weeks: &BTreeMap<u32, WeekSnapshot>, week: u32) -> WeekSnapshot {
    let mut snap = WeekSnapshot::empty(week);
    if let Some((_, latest)) = weeks.range(..week).next_back() {
        snap.core = latest.core.clone();
    }
    for (_, earlier) in weeks.range(..week) {
        for (department, values) in &earlier.department {
            snap.department.insert(department.clone(), values.clone());
        }
    }
    snap
}

/// Owns the weekly snapshots and the only code path that mutates them.
#[derive(Debug)]
pub struct MetricsManager<S> {
    catalog: ConstraintCatalog,
    weeks: BTreeMap<u32, WeekSnapshot>,
    baseline: WeekSnapshot,
    applier: UncertaintyApplier,
    store: S,
}

impl<S: SnapshotStore> MetricsManager<S> {
    /// Load every stored week; week 1 as loaded becomes the impact baseline.
    pub fn new(
        catalog: ConstraintCatalog,
        store: S,
        applier: UncertaintyApplier,
    ) -> Result<Self, EngineError> {
        let weeks = store.load()?;
        let baseline = weeks
            .get(&1)
            .cloned()
            .unwrap_or_else(|| WeekSnapshot::empty(1));
        debug!(weeks = weeks.len(), "metrics loaded");
        Ok(Self {
            catalog,
            weeks,
            baseline,
            applier,
            store,
        })
    }

    pub fn catalog(&self) -> &ConstraintCatalog {
        &self.catalog
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    #[cfg(test)]
    pub(crate) fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Stored weeks only; previews are never included.
    pub fn weeks(&self) -> &BTreeMap<u32, WeekSnapshot> {
        &self.weeks
    }

    pub fn baseline(&self) -> &WeekSnapshot {
        &self.baseline
    }

    /// The stored snapshot, or an empty one for a week nothing was applied
    /// to yet. Never creates or changes anything.
    pub fn week_snapshot(&self, week: u32) -> WeekSnapshot {
        self.weeks
            .get(&week)
            .cloned()
            .unwrap_or_else(|| WeekSnapshot::empty(week))
    }

    /// The values in force at `week`: the stored week with departments it
    /// never touched carried over from earlier weeks, or what an untouched
    /// week would start from.
    pub fn effective_snapshot(&self, week: u32) -> WeekSnapshot {
        let carried = preview(&self.weeks, week);
        let Some(stored) = self.weeks.get(&week) else {
            return carried;
        };
        let mut snap = stored.clone();
        for (department, values) in carried.department {
            snap.department.entry(department).or_insert(values);
        }
        snap
    }

    /// Resolve wire keys (`"core.revenue"`, `"department.growth_rate"`) for
    /// `department`.
    pub fn resolve(
        &self,
        changes: &BTreeMap<String, f64>,
        department: &str,
    ) -> Result<BTreeMap<MetricKey, f64>, ConstraintViolation> {
        changes
            .iter()
            .map(|(raw, change)| {
                MetricKey::parse(raw, department)
                    .map(|key| (key, *change))
                    .map_err(|_| ConstraintViolation::MalformedKey(raw.clone()))
            })
            .collect()
    }

    /// Check every change against its declared band; stops at the first
    /// offender.
    pub fn check(
        &self,
        changes: &BTreeMap<MetricKey, f64>,
        department: &str,
    ) -> Result<(), ConstraintViolation> {
        let department = normalize_department(department);
        for (key, &change) in changes {
            if key.owner().is_some_and(|owner| owner != department) {
                return Err(ConstraintViolation::ForeignDepartment {
                    metric: key.clone(),
                    department,
                });
            }
            let spec = self
                .catalog
                .spec_for(key)
                .ok_or_else(|| ConstraintViolation::Undeclared(key.clone()))?;
            if !change.is_finite() {
                return Err(ConstraintViolation::NonFinite {
                    metric: key.clone(),
                    change,
                });
            }
            if !spec.admits(change) {
                return Err(ConstraintViolation::OutOfBounds {
                    metric: key.clone(),
                    change,
                    uncertainty: spec.uncertainty_range,
                    min: spec.min_change,
                    max: spec.max_change,
                });
            }
        }
        Ok(())
    }

    /// [`check`](Self::check) as a yes/no answer; the failing metric is logged.
    pub fn validate(&self, changes: &BTreeMap<MetricKey, f64>, department: &str) -> bool {
        match self.check(changes, department) {
            Ok(()) => true,
            Err(violation) => {
                warn!(%department, %violation, "proposed changes rejected");
                false
            }
        }
    }

    /// Apply validated changes to `week` and persist the table.
    ///
    /// Missing earlier weeks are materialised first. A new week is seeded
    /// with core values and the current department; other departments are
    /// carried over on first touch. The store is written before memory, so a
    /// failed write changes nothing.
    pub fn apply_changes(
        &mut self,
        week: u32,
        department: &str,
        changes: &BTreeMap<MetricKey, f64>,
    ) -> Result<AppliedChanges, EngineError> {
        if week == 0 {
            return Err(EngineError::InvalidInput("weeks are numbered from 1".into()));
        }
        let department = normalize_department(department);
        let mut next = self.weeks.clone();
        for earlier in 1..week {
            if !next.contains_key(&earlier) {
                let filled = preview(&next, earlier);
                debug!(week = earlier, "materialising skipped week");
                next.insert(earlier, filled);
            }
        }
        let earlier = preview(&next, week);
        let snap = next.entry(week).or_insert_with(|| {
            let mut seeded = WeekSnapshot::empty(week);
            seeded.core = earlier.core.clone();
            if let Some(values) = earlier.department.get(&department) {
                seeded.department.insert(department.clone(), values.clone());
            }
            seeded
        });

        let mut realized = AppliedChanges::default();
        for (key, &change) in changes {
            let spec = self
                .catalog
                .spec_for(key)
                .ok_or_else(|| ConstraintViolation::Undeclared(key.clone()))?;
            if let Some(owner) = key.owner() {
                if !snap.department.contains_key(owner) {
                    let carried = earlier.department.get(owner).cloned().unwrap_or_default();
                    snap.department.insert(owner.to_string(), carried);
                }
            }
            let applied = self.applier.sample(change, spec.uncertainty_range)?;
            let current = snap.get(key).unwrap_or_else(|| {
                warn!(metric = %key, "declared metric has no value, starting from 0");
                0.0
            });
            let updated = compound(current, applied.actual);
            snap.set(key, updated);
            realized.record(key, applied);
            debug!(
                metric = %key,
                requested = change,
                actual = applied.actual,
                before = current,
                after = updated,
                "metric updated"
            );
        }

        snap.applied_changes = realized.clone();
        self.store.save(&next)?;
        self.weeks = next;
        info!(week, %department, applied = realized.len(), "week metrics updated");
        Ok(realized)
    }

    /// Impact of `week` against the baseline.
    pub fn impact_at(&self, week: u32) -> BTreeMap<MetricKey, MetricImpact> {
        sim_econ::impact(&self.baseline, &self.effective_snapshot(week))
    }

    /// Declared metric keys for `department`, in wire form.
    pub fn allowed_keys(&self, department: &str) -> Vec<String> {
        let allowed = self.catalog.allowed_metrics(department);
        allowed
            .core
            .keys()
            .map(|m| format!("{}.{m}", Scope::Core.as_str()))
            .chain(
                allowed
                    .department
                    .keys()
                    .map(|m| format!("{}.{m}", Scope::Department.as_str())),
            )
            .collect()
    }
}
