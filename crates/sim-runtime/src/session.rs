//! Session configuration and the service facade front ends talk to.

use crate::error::EngineError;
use crate::lifecycle::{
    ActionOutcome, ActionRequest, AdvanceOutcome, Analysis, DecisionLifecycle, SessionStatus,
    WeekSummary, WeekView,
};
use crate::metrics::MetricsManager;
use persistence::{render_impact_report, write_report, ConversationLog, JsonMetricsStore};
use serde::{Deserialize, Serialize};
use sim_ai::{Advisor, RetryPolicy, RetryingAdvisor};
use sim_core::{load_document, AllowedMetrics, Challenge, ChallengeCatalog, ConfigError, MetricKey};
use sim_econ::{AggregationStrategy, MetricImpact, UncertaintyApplier};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

/// Where a session reads and writes, and how it behaves.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Challenge catalog (`weekly_challenges`).
    pub challenges: PathBuf,
    /// Metrics document: constraint definitions plus weekly snapshots.
    pub metrics: PathBuf,
    #[serde(default)]
    pub conversation_dir: Option<PathBuf>,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub aggregation: AggregationStrategy,
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl SessionConfig {
    /// Load YAML or JSON; relative paths are taken from the file's directory.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config: Self = load_document(path)?;
        if let Some(base) = path.parent() {
            config.rebase(base);
        }
        Ok(config)
    }

    fn rebase(&mut self, base: &Path) {
        let join = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        join(&mut self.challenges);
        join(&mut self.metrics);
        if let Some(dir) = self.conversation_dir.as_mut() {
            join(dir);
        }
    }
}

/// A running session over the file-backed metrics store.
#[derive(Debug)]
pub struct Session<A> {
    config: SessionConfig,
    engine: DecisionLifecycle<RetryingAdvisor<A>, JsonMetricsStore>,
}

impl<A: Advisor + Send> Session<A> {
    /// Load both catalogs and the stored weeks, and wrap `advisor` in the
    /// configured retry policy.
    pub fn open(config: SessionConfig, advisor: A) -> Result<Self, EngineError> {
        let challenges = ChallengeCatalog::load(&config.challenges)?;
        let store = JsonMetricsStore::open(&config.metrics)?;
        let catalog = store.definitions().clone().validated()?;
        let metrics = MetricsManager::new(catalog, store, UncertaintyApplier::new(config.seed))?;
        let mut engine = DecisionLifecycle::new(
            challenges,
            metrics,
            RetryingAdvisor::new(advisor, config.retry),
        )
        .with_aggregation(config.aggregation);
        if let Some(dir) = &config.conversation_dir {
            engine = engine.with_log(ConversationLog::new(dir));
        }
        info!(
            weeks = engine.clock().total_weeks,
            metrics = %config.metrics.display(),
            seeded = config.seed.is_some(),
            "session opened"
        );
        Ok(Self { config, engine })
    }

    /// Discard all in-memory state and reopen from the configuration,
    /// keeping the advisor.
    pub fn reset_session(self) -> Result<Self, EngineError> {
        let Self { config, engine } = self;
        Self::open(config, engine.into_advisor().into_inner())
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn engine(&self) -> &DecisionLifecycle<RetryingAdvisor<A>, JsonMetricsStore> {
        &self.engine
    }

    pub fn start_week(&mut self) -> Result<WeekView, EngineError> {
        self.engine.start_week()
    }

    pub async fn submit_decision(&mut self, text: &str) -> Result<Analysis, EngineError> {
        self.engine.submit(text).await
    }

    pub async fn act_on_decision(
        &mut self,
        decision_id: &str,
        request: ActionRequest,
    ) -> Result<ActionOutcome, EngineError> {
        self.engine.act(decision_id, request).await
    }

    pub fn advance(&mut self) -> Result<AdvanceOutcome, EngineError> {
        self.engine.advance()
    }

    pub fn end_session(&mut self) -> SessionStatus {
        self.engine.end_session()
    }

    pub fn status(&self) -> SessionStatus {
        self.engine.status()
    }

    /// The week's challenge, including its resources and constraints.
    pub fn current_challenge(&self) -> Option<&Challenge> {
        self.engine.current_challenge()
    }

    /// Core and department constraint tables for the current department.
    pub fn allowed_metrics(&self) -> AllowedMetrics<'_> {
        let department = self
            .engine
            .current_challenge()
            .map(|c| c.department.as_str())
            .unwrap_or_default();
        self.engine.metrics().catalog().allowed_metrics(department)
    }

    pub fn impact(&self) -> BTreeMap<MetricKey, MetricImpact> {
        self.engine.impact()
    }

    pub fn weekly_summary(&self) -> Vec<WeekSummary> {
        self.engine.weekly_summary()
    }

    /// Plain-text impact report for the current week.
    pub fn impact_report(&self) -> String {
        render_impact_report(&self.engine.impact(), self.engine.contributions())
    }

    pub fn write_report(&self, path: &Path) -> Result<(), EngineError> {
        write_report(path, &self.impact_report())?;
        info!(path = %path.display(), "impact report written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::LifecycleState;
    use serde_json::json;
    use sim_ai::{Advice, ScriptedAdvisor};
    use std::fs;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "sim-runtime-{tag}-{}-{}",
            std::process::id(),
            chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_fixtures(dir: &Path) {
        let challenges = json!({
            "weekly_challenges": {
                "week1": {"department": "sales", "situation": "Quarter target at risk"},
                "week2": {"department": "HR", "situation": "Attrition is rising"}
            }
        });
        let metrics = json!({
            "metrics_definitions": {
                "core": {"revenue": {"min_change": -10.0, "max_change": 10.0, "uncertainty_range": 0.0}},
                "department": {"sales": {"growth_rate": {"min_change": -10.0, "max_change": 10.0, "uncertainty_range": 2.0}}}
            },
            "weekly_metrics": {
                "week1": {"core": {"revenue": 1000.0}, "department": {"SALES": {"growth_rate": 5.0}}}
            }
        });
        fs::write(dir.join("challenges.json"), challenges.to_string()).unwrap();
        fs::write(dir.join("metrics.json"), metrics.to_string()).unwrap();
        fs::write(
            dir.join("session.yaml"),
            "challenges: challenges.json\nmetrics: metrics.json\nconversation_dir: logs\nseed: 11\naggregation: mean\nretry:\n  max_attempts: 1\n",
        )
        .unwrap();
    }

    fn revenue_advice(v: f64) -> Advice {
        let mut advice = Advice::default();
        advice.propose("CEO", BTreeMap::from([("core.revenue".to_string(), json!(v))]));
        advice
    }

    #[test]
    fn config_paths_are_relative_to_file() {
        let dir = temp_dir("config");
        write_fixtures(&dir);
        let config = SessionConfig::load(&dir.join("session.yaml")).unwrap();
        assert_eq!(config.challenges, dir.join("challenges.json"));
        assert_eq!(config.conversation_dir, Some(dir.join("logs")));
        assert_eq!(config.aggregation, AggregationStrategy::Mean);
        assert_eq!(config.retry.max_attempts, 1);
        assert_eq!(config.retry.max_backoff_ms, RetryPolicy::default().max_backoff_ms);
    }

    #[tokio::test]
    async fn full_session_persists_logs_and_reports() {
        let dir = temp_dir("session");
        write_fixtures(&dir);
        let config = SessionConfig::load(&dir.join("session.yaml")).unwrap();
        let advisor = ScriptedAdvisor::from_advice([revenue_advice(5.0)]);
        let mut session = Session::open(config, advisor).unwrap();

        let view = session.start_week().unwrap();
        assert_eq!(view.challenge.unwrap().department, "SALES");
        assert_eq!(session.allowed_metrics().department.len(), 1);
        assert_eq!(session.current_challenge().unwrap().situation, "Quarter target at risk");
        let analysis = session.submit_decision("Bundle discounts").await.unwrap();
        let outcome = session
            .act_on_decision(&analysis.decision_id, ActionRequest::accept_all())
            .await
            .unwrap();
        assert!(matches!(outcome, ActionOutcome::Accepted { .. }));
        assert_eq!(session.status().current_week, 2);

        let stored = JsonMetricsStore::open(dir.join("metrics.json")).unwrap();
        let weeks = persistence::SnapshotStore::load(&stored).unwrap();
        assert_eq!(weeks[&1].get(&MetricKey::core("revenue")), Some(1050.0));
        assert!(dir.join("logs").join("week1_conversation.txt").exists());

        session.advance().unwrap();
        assert_eq!(session.status().state, LifecycleState::Completed);
        let report = dir.join("out").join("report.txt");
        session.write_report(&report).unwrap();
        let text = fs::read_to_string(report).unwrap();
        assert!(text.contains("decision_1"));
        assert_eq!(session.weekly_summary().len(), 1);
        assert!(session.impact()[&MetricKey::core("revenue")].percent_change > 4.99);

        let session = session.reset_session().unwrap();
        assert_eq!(session.status().state, LifecycleState::Idle);
        assert!(!session.status().running);
        let baseline = session.engine().metrics().baseline();
        assert_eq!(baseline.get(&MetricKey::core("revenue")), Some(1050.0));
    }
}
