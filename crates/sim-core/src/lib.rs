#![deny(warnings)]

//! Core domain models and invariants for the weekly business simulation.
//!
//! This crate defines the serializable types shared by the engine: metric
//! identities, per-week snapshots, challenges, decisions and the
//! recommendation sets produced by the advisory panel.

pub mod catalog;
pub mod config;

pub use catalog::{AllowedMetrics, CatalogError, ConstraintCatalog, ConstraintSpec};
pub use config::{load_document, ChallengeCatalog, ConfigError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Which half of a snapshot a metric lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Company-wide metrics.
    Core,
    /// Metrics owned by a single department.
    Department,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Core => "core",
            Scope::Department => "department",
        }
    }
}

impl FromStr for Scope {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "core" => Ok(Scope::Core),
            "department" => Ok(Scope::Department),
            other => Err(KeyError::UnknownScope(other.to_string())),
        }
    }
}

/// Errors raised while resolving `"scope.metric"` keys.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("malformed metric key {0:?}: expected \"scope.metric\"")]
    Malformed(String),
    #[error("unknown metric scope {0:?}")]
    UnknownScope(String),
    #[error("department metric {0:?} has no department")]
    MissingDepartment(String),
}

/// Normalise a department name the way catalogs and snapshots store it.
pub fn normalize_department(department: &str) -> String {
    department.trim().to_uppercase()
}

/// Identity of a single metric, resolved once at the boundary.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum MetricKey {
    Core(String),
    Department { department: String, metric: String },
}

impl MetricKey {
    pub fn core(metric: impl Into<String>) -> Self {
        MetricKey::Core(metric.into())
    }

    pub fn department(department: &str, metric: impl Into<String>) -> Self {
        MetricKey::Department {
            department: normalize_department(department),
            metric: metric.into(),
        }
    }

    /// Resolve a wire key such as `"core.revenue"` or `"department.growth_rate"`.
    ///
    /// Department keys take `department` as their owner.
    pub fn parse(raw: &str, department: &str) -> Result<Self, KeyError> {
        let (scope, metric) = raw
            .trim()
            .split_once('.')
            .ok_or_else(|| KeyError::Malformed(raw.to_string()))?;
        let metric = metric.trim();
        if metric.is_empty() || metric.contains('.') {
            return Err(KeyError::Malformed(raw.to_string()));
        }
        match scope.parse::<Scope>()? {
            Scope::Core => Ok(MetricKey::core(metric)),
            Scope::Department => {
                if department.trim().is_empty() {
                    return Err(KeyError::MissingDepartment(raw.to_string()));
                }
                Ok(MetricKey::department(department, metric))
            }
        }
    }

    pub fn scope(&self) -> Scope {
        match self {
            MetricKey::Core(_) => Scope::Core,
            MetricKey::Department { .. } => Scope::Department,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            MetricKey::Core(metric) => metric,
            MetricKey::Department { metric, .. } => metric,
        }
    }

    pub fn owner(&self) -> Option<&str> {
        match self {
            MetricKey::Core(_) => None,
            MetricKey::Department { department, .. } => Some(department),
        }
    }

    /// Key as the advisory panel writes it, without the owning department.
    pub fn wire_key(&self) -> String {
        format!("{}.{}", self.scope().as_str(), self.name())
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricKey::Core(metric) => write!(f, "core.{metric}"),
            MetricKey::Department { department, metric } => {
                write!(f, "department.{department}.{metric}")
            }
        }
    }
}

impl From<MetricKey> for String {
    fn from(key: MetricKey) -> Self {
        key.to_string()
    }
}

impl TryFrom<String> for MetricKey {
    type Error = KeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let parts: Vec<&str> = value.split('.').collect();
        match parts.as_slice() {
            [scope, metric] if !metric.is_empty() => match scope.parse::<Scope>()? {
                Scope::Core => Ok(MetricKey::core(*metric)),
                Scope::Department => Err(KeyError::MissingDepartment(value.clone())),
            },
            [scope, department, metric] if !metric.is_empty() && !department.is_empty() => {
                match scope.parse::<Scope>()? {
                    Scope::Department => Ok(MetricKey::department(department, *metric)),
                    Scope::Core => Err(KeyError::Malformed(value.clone())),
                }
            }
            _ => Err(KeyError::Malformed(value.clone())),
        }
    }
}

/// A realized change: the percentage actually applied and the uncertainty
/// band it was drawn from.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "(f64, f64)", into = "(f64, f64)")]
pub struct AppliedChange {
    pub actual: f64,
    pub uncertainty: f64,
}

impl From<(f64, f64)> for AppliedChange {
    fn from((actual, uncertainty): (f64, f64)) -> Self {
        Self {
            actual,
            uncertainty,
        }
    }
}

impl From<AppliedChange> for (f64, f64) {
    fn from(c: AppliedChange) -> Self {
        (c.actual, c.uncertainty)
    }
}

/// Realized changes of one apply call, split by scope.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AppliedChanges {
    #[serde(default)]
    pub core: BTreeMap<String, AppliedChange>,
    #[serde(default)]
    pub department: BTreeMap<String, AppliedChange>,
}

impl AppliedChanges {
    pub fn record(&mut self, key: &MetricKey, change: AppliedChange) {
        let slot = match key.scope() {
            Scope::Core => &mut self.core,
            Scope::Department => &mut self.department,
        };
        slot.insert(key.name().to_string(), change);
    }

    pub fn is_empty(&self) -> bool {
        self.core.is_empty() && self.department.is_empty()
    }

    pub fn len(&self) -> usize {
        self.core.len() + self.department.len()
    }
}

/// Metric values for one simulated week.
///
/// Written by the metrics manager only; treated as frozen once the clock has
/// moved past its week.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WeekSnapshot {
    #[serde(default)]
    pub week: u32,
    #[serde(default)]
    pub core: BTreeMap<String, f64>,
    #[serde(default)]
    pub department: BTreeMap<String, BTreeMap<String, f64>>,
    #[serde(default, rename = "changes")]
    pub applied_changes: AppliedChanges,
}

impl WeekSnapshot {
    pub fn empty(week: u32) -> Self {
        Self {
            week,
            ..Self::default()
        }
    }

    pub fn get(&self, key: &MetricKey) -> Option<f64> {
        match key {
            MetricKey::Core(metric) => self.core.get(metric).copied(),
            MetricKey::Department { department, metric } => self
                .department
                .get(department)
                .and_then(|values| values.get(metric))
                .copied(),
        }
    }

    pub fn set(&mut self, key: &MetricKey, value: f64) {
        match key {
            MetricKey::Core(metric) => {
                self.core.insert(metric.clone(), value);
            }
            MetricKey::Department { department, metric } => {
                self.department
                    .entry(department.clone())
                    .or_default()
                    .insert(metric.clone(), value);
            }
        }
    }

    pub fn has_department(&self, department: &str) -> bool {
        self.department.contains_key(&normalize_department(department))
    }

    /// Every stored value keyed by its resolved identity.
    pub fn values(&self) -> BTreeMap<MetricKey, f64> {
        let mut out = BTreeMap::new();
        for (metric, value) in &self.core {
            out.insert(MetricKey::core(metric.as_str()), *value);
        }
        for (department, values) in &self.department {
            for (metric, value) in values {
                out.insert(MetricKey::department(department, metric.as_str()), *value);
            }
        }
        out
    }

    /// Upper-case every department key; used right after loading.
    pub fn normalized(mut self) -> Self {
        let department = std::mem::take(&mut self.department);
        for (name, values) in department {
            self.department
                .entry(normalize_department(&name))
                .or_default()
                .extend(values);
        }
        self
    }
}

/// Storage key of a week, e.g. `week3`.
pub fn week_key(week: u32) -> String {
    format!("week{week}")
}

/// Inverse of [`week_key`].
pub fn parse_week_key(key: &str) -> Option<u32> {
    key.strip_prefix("week")?.parse().ok().filter(|w| *w > 0)
}

/// The static scenario for one week.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Challenge {
    #[serde(default)]
    pub week: u32,
    pub department: String,
    pub situation: String,
    #[serde(default)]
    pub available_resources: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub constraints: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub possible_approaches: Vec<String>,
}

/// One message of an advisory discussion.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentMessage {
    pub agent: String,
    pub content: String,
}

impl AgentMessage {
    pub fn new(agent: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            content: content.into(),
        }
    }
}

/// Proposed percentage changes attributed to one advisor.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentRecommendations {
    pub agent: String,
    pub changes: BTreeMap<MetricKey, f64>,
}

/// Recommendations for one decision at one version.
///
/// Agents keep the order in which they first contributed; a later
/// contribution from the same agent replaces its earlier one in place.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RecommendationSet {
    pub version: u32,
    pub agents: Vec<AgentRecommendations>,
}

impl RecommendationSet {
    pub fn new(version: u32) -> Self {
        Self {
            version,
            agents: Vec::new(),
        }
    }

    pub fn insert(&mut self, agent: &str, changes: BTreeMap<MetricKey, f64>) {
        match self.agents.iter_mut().find(|a| a.agent == agent) {
            Some(existing) => existing.changes = changes,
            None => self.agents.push(AgentRecommendations {
                agent: agent.to_string(),
                changes,
            }),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.agents.iter().all(|a| a.changes.is_empty())
    }

    pub fn for_agent(&self, agent: &str) -> Option<&BTreeMap<MetricKey, f64>> {
        self.agents
            .iter()
            .find(|a| a.agent == agent)
            .map(|a| &a.changes)
    }
}

/// Where a decision sits in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStatus {
    PendingAction,
    Accepted,
    Abandoned,
}

/// A user decision for one week, with every recommendation set it received.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub id: String,
    pub week: u32,
    pub department: String,
    pub content: String,
    pub status: DecisionStatus,
    pub recommendation_version: u32,
    pub submitted_at: DateTime<Utc>,
    /// Superseded sets are kept; the last entry is current.
    pub recommendations: Vec<RecommendationSet>,
    #[serde(default)]
    pub realized: Option<AppliedChanges>,
}

impl Decision {
    pub fn id_for_week(week: u32) -> String {
        format!("decision_{week}")
    }

    pub fn is_open(&self) -> bool {
        self.status == DecisionStatus::PendingAction
    }

    pub fn latest(&self) -> Option<&RecommendationSet> {
        self.recommendations.last()
    }
}

/// Session-wide clock. Weeks are 1-based.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationClock {
    pub current_week: u32,
    pub total_weeks: u32,
    pub running: bool,
    pub awaiting_action: bool,
}

impl SimulationClock {
    pub fn new(total_weeks: u32) -> Self {
        Self {
            current_week: 1,
            total_weeks,
            running: false,
            awaiting_action: false,
        }
    }

    pub fn is_last_week(&self) -> bool {
        self.current_week >= self.total_weeks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parse_resolves_scope_and_department() {
        let k = MetricKey::parse("core.revenue", "sales").unwrap();
        assert_eq!(k, MetricKey::Core("revenue".into()));
        let k = MetricKey::parse("department.growth_rate", "sales").unwrap();
        assert_eq!(k.owner(), Some("SALES"));
        assert_eq!(k.name(), "growth_rate");
        assert_eq!(k.wire_key(), "department.growth_rate");
    }

    #[test]
    fn parse_rejects_bad_keys() {
        assert!(matches!(
            MetricKey::parse("revenue", "SALES"),
            Err(KeyError::Malformed(_))
        ));
        assert!(matches!(
            MetricKey::parse("r_and_d.budget", "SALES"),
            Err(KeyError::UnknownScope(_))
        ));
        assert!(matches!(
            MetricKey::parse("department.growth", " "),
            Err(KeyError::MissingDepartment(_))
        ));
        assert!(MetricKey::parse("core.a.b", "SALES").is_err());
    }

    #[test]
    fn metric_key_serializes_as_string() {
        let mut m = BTreeMap::new();
        m.insert(MetricKey::department("Sales", "growth_rate"), 4.0);
        m.insert(MetricKey::core("revenue"), 2.5);
        let s = serde_json::to_string(&m).unwrap();
        assert!(s.contains("\"department.SALES.growth_rate\""));
        let back: BTreeMap<MetricKey, f64> = serde_json::from_str(&s).unwrap();
        assert_eq!(back, m);
    }

    #[test]
    fn snapshot_reads_original_layout() {
        let text = r#"{
            "core": {"revenue": 1000000.0},
            "department": {"sales": {"growth_rate": 5.0}},
            "changes": {"core": {"revenue": [2.5, 1.0]}, "department": {}}
        }"#;
        let snap: WeekSnapshot = serde_json::from_str(text).unwrap();
        let snap = snap.normalized();
        assert_eq!(
            snap.get(&MetricKey::department("SALES", "growth_rate")),
            Some(5.0)
        );
        assert_eq!(snap.applied_changes.core["revenue"].actual, 2.5);
        assert_eq!(snap.values().len(), 2);
    }

    #[test]
    fn recommendation_set_replaces_agent_in_place() {
        let mut set = RecommendationSet::new(1);
        let one = |v| BTreeMap::from([(MetricKey::core("revenue"), v)]);
        set.insert("CEO", one(1.0));
        set.insert("COO", one(2.0));
        set.insert("CEO", one(3.0));
        let order: Vec<&str> = set.agents.iter().map(|a| a.agent.as_str()).collect();
        assert_eq!(order, ["CEO", "COO"]);
        assert_eq!(set.for_agent("CEO").unwrap()[&MetricKey::core("revenue")], 3.0);
    }

    #[test]
    fn week_keys() {
        assert_eq!(week_key(3), "week3");
        assert_eq!(parse_week_key("week12"), Some(12));
        assert_eq!(parse_week_key("week0"), None);
        assert_eq!(parse_week_key("w1"), None);
    }

    proptest! {
        #[test]
        fn set_then_get(name in "[a-z_]{1,12}", dept in "[A-Z]{2,8}", v in -1.0e9f64..1.0e9) {
            let mut snap = WeekSnapshot::empty(1);
            let key = MetricKey::department(&dept, name.as_str());
            snap.set(&key, v);
            prop_assert_eq!(snap.get(&key), Some(v));
            prop_assert!(snap.has_department(&dept.to_lowercase()));
        }
    }
}
