//! Declared change bounds per metric.

use crate::{normalize_department, MetricKey, Scope};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

static NO_CONSTRAINTS: BTreeMap<String, ConstraintSpec> = BTreeMap::new();

/// Allowed percentage-change band for one metric.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConstraintSpec {
    /// Lowest allowed change, in percent.
    pub min_change: f64,
    /// Highest allowed change, in percent.
    pub max_change: f64,
    /// Half-width of the noise band around a requested change (>= 0).
    #[serde(default)]
    pub uncertainty_range: f64,
}

impl ConstraintSpec {
    pub fn new(min_change: f64, max_change: f64, uncertainty_range: f64) -> Self {
        Self {
            min_change,
            max_change,
            uncertainty_range,
        }
    }

    /// True when the whole band `[change-u, change+u]` sits inside the bounds.
    /// Both ends are inclusive.
    pub fn admits(&self, change: f64) -> bool {
        change.is_finite()
            && self.min_change <= change - self.uncertainty_range
            && change + self.uncertainty_range <= self.max_change
    }

    fn check(&self, metric: &str) -> Result<(), CatalogError> {
        if !(self.min_change.is_finite()
            && self.max_change.is_finite()
            && self.uncertainty_range.is_finite())
        {
            return Err(CatalogError::NonFinite(metric.to_string()));
        }
        if self.min_change > self.max_change {
            return Err(CatalogError::InvertedBounds {
                metric: metric.to_string(),
                min: self.min_change,
                max: self.max_change,
            });
        }
        if self.uncertainty_range < 0.0 {
            return Err(CatalogError::NegativeUncertainty {
                metric: metric.to_string(),
                value: self.uncertainty_range,
            });
        }
        Ok(())
    }
}

/// Invalid constraint declarations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CatalogError {
    #[error("constraint for {metric}: min_change {min} exceeds max_change {max}")]
    InvertedBounds { metric: String, min: f64, max: f64 },
    #[error("constraint for {metric}: negative uncertainty_range {value}")]
    NegativeUncertainty { metric: String, value: f64 },
    #[error("constraint for {0}: non-finite bound")]
    NonFinite(String),
}

/// Read-only constraint declarations, scoped to core or a department.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConstraintCatalog {
    #[serde(default)]
    core: BTreeMap<String, ConstraintSpec>,
    #[serde(default)]
    department: BTreeMap<String, BTreeMap<String, ConstraintSpec>>,
}

/// Both constraint tables that apply to one department.
#[derive(Clone, Copy, Debug)]
pub struct AllowedMetrics<'a> {
    pub core: &'a BTreeMap<String, ConstraintSpec>,
    pub department: &'a BTreeMap<String, ConstraintSpec>,
}

impl ConstraintCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_core(mut self, metric: &str, spec: ConstraintSpec) -> Self {
        self.core.insert(metric.to_string(), spec);
        self
    }

    pub fn with_department(mut self, department: &str, metric: &str, spec: ConstraintSpec) -> Self {
        self.department
            .entry(normalize_department(department))
            .or_default()
            .insert(metric.to_string(), spec);
        self
    }

    /// Check every declaration and upper-case department names.
    pub fn validated(self) -> Result<Self, CatalogError> {
        for (metric, spec) in &self.core {
            spec.check(&format!("core.{metric}"))?;
        }
        let mut department = BTreeMap::new();
        for (name, specs) in self.department {
            let name = normalize_department(&name);
            for (metric, spec) in &specs {
                spec.check(&format!("department.{name}.{metric}"))?;
            }
            department
                .entry(name)
                .or_insert_with(BTreeMap::new)
                .extend(specs);
        }
        Ok(Self {
            core: self.core,
            department,
        })
    }

    /// Constraint table for a scope. Unknown scope/department pairs yield an
    /// empty table, never an error.
    pub fn constraints(
        &self,
        scope: Scope,
        department: Option<&str>,
    ) -> &BTreeMap<String, ConstraintSpec> {
        match (scope, department) {
            (Scope::Core, _) => &self.core,
            (Scope::Department, Some(dept)) => self
                .department
                .get(&normalize_department(dept))
                .unwrap_or(&NO_CONSTRAINTS),
            (Scope::Department, None) => &NO_CONSTRAINTS,
        }
    }

    pub fn spec_for(&self, key: &MetricKey) -> Option<&ConstraintSpec> {
        self.constraints(key.scope(), key.owner()).get(key.name())
    }

    pub fn allowed_metrics(&self, department: &str) -> AllowedMetrics<'_> {
        AllowedMetrics {
            core: &self.core,
            department: self.constraints(Scope::Department, Some(department)),
        }
    }

    pub fn departments(&self) -> impl Iterator<Item = &str> {
        self.department.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> ConstraintCatalog {
        ConstraintCatalog::new()
            .with_core("revenue", ConstraintSpec::new(-5.0, 15.0, 1.0))
            .with_department("sales", "growth_rate", ConstraintSpec::new(-10.0, 10.0, 2.0))
    }

    #[test]
    fn unknown_scope_pairs_are_empty() {
        let c = catalog();
        assert!(c.constraints(Scope::Department, Some("HR")).is_empty());
        assert!(c.constraints(Scope::Department, None).is_empty());
        assert_eq!(c.constraints(Scope::Department, Some("Sales")).len(), 1);
        assert_eq!(c.constraints(Scope::Core, Some("whatever")).len(), 1);
    }

    #[test]
    fn spec_lookup_by_key() {
        let c = catalog();
        let k = MetricKey::department("SALES", "growth_rate");
        assert_eq!(c.spec_for(&k).unwrap().uncertainty_range, 2.0);
        assert!(c.spec_for(&MetricKey::core("growth_rate")).is_none());
    }

    #[test]
    fn admits_is_inclusive() {
        let s = ConstraintSpec::new(-10.0, 10.0, 2.0);
        assert!(s.admits(8.0));
        assert!(s.admits(-8.0));
        assert!(!s.admits(8.5));
        assert!(!s.admits(-8.01));
        assert!(!s.admits(f64::NAN));
    }

    #[test]
    fn validated_rejects_bad_specs() {
        let bad = ConstraintCatalog::new().with_core("x", ConstraintSpec::new(5.0, 1.0, 0.0));
        assert!(matches!(
            bad.validated(),
            Err(CatalogError::InvertedBounds { .. })
        ));
        let bad = ConstraintCatalog::new().with_core("x", ConstraintSpec::new(-1.0, 1.0, -0.5));
        assert!(matches!(
            bad.validated(),
            Err(CatalogError::NegativeUncertainty { .. })
        ));
    }

    #[test]
    fn validated_normalizes_loaded_departments() {
        let text = r#"{"core": {}, "department": {"sales": {"growth_rate": {"min_change": -1, "max_change": 1}}}}"#;
        let c: ConstraintCatalog = serde_json::from_str(text).unwrap();
        let c = c.validated().unwrap();
        assert_eq!(c.departments().collect::<Vec<_>>(), ["SALES"]);
        let allowed = c.allowed_metrics("Sales");
        assert_eq!(allowed.department["growth_rate"].uncertainty_range, 0.0);
    }
}
