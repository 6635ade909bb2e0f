//! The decision state machine layered over [`MetricsManager`].
//!
//! `Idle -> Analyzing -> AwaitingAction -> Advancing -> Idle` per week, ending
//! in `Completed`. The advisory call is the only await point; the state is
//! restored if it fails or the future is dropped.

use crate::error::{ConstraintViolation, EngineError};
use crate::metrics::MetricsManager;
use persistence::{ContributionRow, ConversationLog, SnapshotStore};
use serde::{Deserialize, Serialize};
use sim_ai::{coerce, Advisor, AdvisoryRequest, DroppedKey};
use sim_core::{
    AgentMessage, AppliedChanges, Challenge, ChallengeCatalog, Decision, DecisionStatus,
    MetricKey, RecommendationSet, SimulationClock, WeekSnapshot,
};
use sim_econ::{aggregate, update_delta, AggregationStrategy, MetricImpact};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::{info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Idle,
    Analyzing,
    AwaitingAction,
    Advancing,
    Completed,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Idle => "idle",
            LifecycleState::Analyzing => "analyzing",
            LifecycleState::AwaitingAction => "awaiting_action",
            LifecycleState::Advancing => "advancing",
            LifecycleState::Completed => "completed",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Puts the previous state back unless committed.
struct StateRestore<'a> {
    slot: &'a mut LifecycleState,
    prior: LifecycleState,
    armed: bool,
}

impl<'a> StateRestore<'a> {
    fn enter(slot: &'a mut LifecycleState, during: LifecycleState) -> Self {
        let prior = std::mem::replace(slot, during);
        Self {
            slot,
            prior,
            armed: true,
        }
    }

    fn commit(mut self, next: LifecycleState) {
        *self.slot = next;
        self.armed = false;
    }
}

impl Drop for StateRestore<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!(from = %self.slot, to = %self.prior, "reverting lifecycle state");
            *self.slot = self.prior;
        }
    }
}

/// How the user resolves an open decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    AcceptAll,
    DiscussSpecific,
    RequestNew,
    EndSession,
}

impl FromStr for ActionKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "accept_all" => Ok(ActionKind::AcceptAll),
            "discuss_specific" => Ok(ActionKind::DiscussSpecific),
            "request_new" => Ok(ActionKind::RequestNew),
            "end_session" => Ok(ActionKind::EndSession),
            other => Err(EngineError::InvalidInput(format!("unknown action {other:?}"))),
        }
    }
}

/// An action plus its payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub action: ActionKind,
    #[serde(default)]
    pub specific_recommendations: Vec<String>,
    #[serde(default)]
    pub feedback: Option<String>,
}

impl ActionRequest {
    pub fn new(action: ActionKind) -> Self {
        Self {
            action,
            specific_recommendations: Vec::new(),
            feedback: None,
        }
    }

    pub fn accept_all() -> Self {
        Self::new(ActionKind::AcceptAll)
    }

    pub fn discuss_specific(items: Vec<String>, feedback: impl Into<String>) -> Self {
        Self {
            action: ActionKind::DiscussSpecific,
            specific_recommendations: items,
            feedback: Some(feedback.into()),
        }
    }

    pub fn request_new(feedback: Option<String>) -> Self {
        Self {
            feedback,
            ..Self::new(ActionKind::RequestNew)
        }
    }

    pub fn end_session() -> Self {
        Self::new(ActionKind::EndSession)
    }

    fn feedback(&self) -> Option<&str> {
        self.feedback.as_deref().map(str::trim).filter(|f| !f.is_empty())
    }
}

/// Recommendations received for the open decision.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Analysis {
    pub decision_id: String,
    pub week: u32,
    pub department: String,
    pub version: u32,
    pub recommendations: RecommendationSet,
    pub discussion: Vec<AgentMessage>,
    /// Panel proposals discarded at the boundary.
    pub dropped: Vec<DroppedKey>,
}

/// A week as the user sees it when it begins.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct WeekView {
    pub week: u32,
    pub challenge: Option<Challenge>,
    pub snapshot: WeekSnapshot,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AdvanceOutcome {
    InProgress(WeekView),
    Completed {
        final_week: u32,
        metrics: WeekSnapshot,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ActionOutcome {
    Accepted {
        decision_id: String,
        realized: AppliedChanges,
        advance: AdvanceOutcome,
    },
    Revised(Analysis),
    Ended(SessionStatus),
}

/// Snapshot of the lifecycle for front ends.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SessionStatus {
    pub state: LifecycleState,
    pub current_week: u32,
    pub total_weeks: u32,
    pub running: bool,
    pub department: Option<String>,
    pub awaiting_action: bool,
    pub open_decision_id: Option<String>,
    pub recommendation_version: Option<u32>,
    pub current_challenge: Option<Challenge>,
}

/// One decided week.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct WeekSummary {
    pub week: u32,
    pub department: String,
    pub situation: String,
    pub decision: String,
    pub status: DecisionStatus,
    pub recommendations: Option<RecommendationSet>,
}

/// Single-session engine: one clock, one open decision at most.
#[derive(Debug)]
pub struct DecisionLifecycle<A, S> {
    state: LifecycleState,
    clock: SimulationClock,
    challenges: ChallengeCatalog,
    metrics: MetricsManager<S>,
    advisor: A,
    log: Option<ConversationLog>,
    aggregation: AggregationStrategy,
    decisions: Vec<Decision>,
    open: Option<usize>,
    contributions: Vec<ContributionRow>,
}

impl<A: Advisor, S: SnapshotStore> DecisionLifecycle<A, S> {
    pub fn new(challenges: ChallengeCatalog, metrics: MetricsManager<S>, advisor: A) -> Self {
        let clock = SimulationClock::new(challenges.total_weeks());
        Self {
            state: LifecycleState::Idle,
            clock,
            challenges,
            metrics,
            advisor,
            log: None,
            aggregation: AggregationStrategy::default(),
            decisions: Vec::new(),
            open: None,
            contributions: Vec::new(),
        }
    }

    pub fn with_log(mut self, log: ConversationLog) -> Self {
        self.log = Some(log);
        self
    }

    pub fn with_aggregation(mut self, strategy: AggregationStrategy) -> Self {
        self.aggregation = strategy;
        self
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn clock(&self) -> &SimulationClock {
        &self.clock
    }

    pub fn metrics(&self) -> &MetricsManager<S> {
        &self.metrics
    }

    pub fn advisor(&self) -> &A {
        &self.advisor
    }

    pub fn into_advisor(self) -> A {
        self.advisor
    }

    pub fn current_challenge(&self) -> Option<&Challenge> {
        self.challenges.get(self.clock.current_week)
    }

    fn department(&self) -> String {
        self.current_challenge()
            .map(|c| c.department.clone())
            .unwrap_or_default()
    }

    fn week_view(&self) -> WeekView {
        WeekView {
            week: self.clock.current_week,
            challenge: self.current_challenge().cloned(),
            snapshot: self.metrics.effective_snapshot(self.clock.current_week),
        }
    }

    fn open_decision(&self) -> Option<&Decision> {
        self.open.and_then(|i| self.decisions.get(i))
    }

    /// Start the clock on a fresh session.
    pub fn start_week(&mut self) -> Result<WeekView, EngineError> {
        if self.clock.running || self.state != LifecycleState::Idle {
            return Err(EngineError::InvalidState {
                operation: "start_week",
                expected: "idle, not started",
                actual: self.state,
            });
        }
        if self.clock.total_weeks == 0 {
            return Err(EngineError::InvalidInput("challenge catalog has no weeks".into()));
        }
        self.clock.running = true;
        info!(week = self.clock.current_week, total = self.clock.total_weeks, "session started");
        Ok(self.week_view())
    }

    /// Forward the decision to the panel and open it for action.
    pub async fn submit(&mut self, text: &str) -> Result<Analysis, EngineError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(EngineError::InvalidInput("decision text is empty".into()));
        }
        if !self.clock.running {
            return Err(EngineError::NotRunning);
        }
        if self.state != LifecycleState::Idle {
            return Err(EngineError::InvalidState {
                operation: "submit",
                expected: "idle",
                actual: self.state,
            });
        }
        let week = self.clock.current_week;
        let department = self.department();
        let request = AdvisoryRequest::new(week, &department, text);

        let guard = StateRestore::enter(&mut self.state, LifecycleState::Analyzing);
        let advice = self.advisor.advise(&request).await?;
        let coerced = coerce(&advice, self.metrics.catalog(), &department, 1);
        if let Some(log) = &self.log {
            log.append(week, 1, &advice.discussion)?;
        }

        let decision = Decision {
            id: Decision::id_for_week(week),
            week,
            department: request.department.clone(),
            content: request.decision_text.clone(),
            status: DecisionStatus::PendingAction,
            recommendation_version: 1,
            submitted_at: chrono::Utc::now(),
            recommendations: vec![coerced.set.clone()],
            realized: None,
        };
        let analysis = Analysis {
            decision_id: decision.id.clone(),
            week,
            department: decision.department.clone(),
            version: 1,
            recommendations: coerced.set,
            discussion: advice.discussion,
            dropped: coerced.dropped,
        };
        self.decisions.push(decision);
        self.open = Some(self.decisions.len() - 1);
        self.clock.awaiting_action = true;
        guard.commit(LifecycleState::AwaitingAction);
        info!(week, decision_id = %analysis.decision_id, version = 1, "decision awaiting action");
        Ok(analysis)
    }

    /// Resolve the open decision.
    pub async fn act(
        &mut self,
        decision_id: &str,
        request: ActionRequest,
    ) -> Result<ActionOutcome, EngineError> {
        if !self.clock.running {
            return Err(EngineError::NotRunning);
        }
        let open = self.open_decision().ok_or(EngineError::NoPendingAction)?;
        if open.id != decision_id {
            return Err(EngineError::UnknownDecision {
                expected: open.id.clone(),
                got: decision_id.to_string(),
            });
        }
        if self.state != LifecycleState::AwaitingAction {
            return Err(EngineError::InvalidState {
                operation: "act",
                expected: "awaiting_action",
                actual: self.state,
            });
        }
        match request.action {
            ActionKind::AcceptAll => self.accept_all(),
            ActionKind::DiscussSpecific => {
                if request.specific_recommendations.iter().all(|r| r.trim().is_empty()) {
                    return Err(EngineError::InvalidInput(
                        "discuss_specific needs specific_recommendations".into(),
                    ));
                }
                let Some(feedback) = request.feedback() else {
                    return Err(EngineError::InvalidInput("discuss_specific needs feedback".into()));
                };
                let focus = request
                    .specific_recommendations
                    .iter()
                    .map(|r| r.trim().to_string())
                    .filter(|r| !r.is_empty())
                    .collect();
                let feedback = feedback.to_string();
                self.rerequest(Some(feedback), focus)
                    .await
                    .map(ActionOutcome::Revised)
            }
            ActionKind::RequestNew => {
                let feedback = request.feedback().map(str::to_string);
                self.rerequest(feedback, Vec::new())
                    .await
                    .map(ActionOutcome::Revised)
            }
            ActionKind::EndSession => Ok(ActionOutcome::Ended(self.end_session())),
        }
    }

    fn accept_all(&mut self) -> Result<ActionOutcome, EngineError> {
        let index = self.open.ok_or(EngineError::NoPendingAction)?;
        let decision = &self.decisions[index];
        let week = decision.week;
        let department = decision.department.clone();
        let set = decision.latest().cloned().unwrap_or_default();
        let changes = aggregate(&set, self.aggregation);
        if let Err(violation) = self.metrics.check(&changes, &department) {
            warn!(week, %violation, "aggregate rejected, decision stays open");
            return Err(violation.into());
        }

        let guard = StateRestore::enter(&mut self.state, LifecycleState::Advancing);
        let before = self.metrics.effective_snapshot(week);
        let realized = self.metrics.apply_changes(week, &department, &changes)?;
        let after = self.metrics.effective_snapshot(week);

        let decision = &mut self.decisions[index];
        decision.status = DecisionStatus::Accepted;
        decision.realized = Some(realized.clone());
        self.contributions.push(ContributionRow {
            decision_id: decision.id.clone(),
            week,
            recommendation_version: decision.recommendation_version,
            agents: set
                .agents
                .iter()
                .filter(|a| !a.changes.is_empty())
                .map(|a| a.agent.clone())
                .collect(),
            deltas: update_delta(&before, &after),
        });
        let decision_id = decision.id.clone();
        self.open = None;
        self.clock.awaiting_action = false;
        guard.commit(LifecycleState::Idle);
        info!(week, %decision_id, applied = realized.len(), "decision accepted");

        let advance = self.advance()?;
        Ok(ActionOutcome::Accepted {
            decision_id,
            realized,
            advance,
        })
    }

    async fn rerequest(
        &mut self,
        feedback: Option<String>,
        focus: Vec<String>,
    ) -> Result<Analysis, EngineError> {
        let index = self.open.ok_or(EngineError::NoPendingAction)?;
        let decision = &self.decisions[index];
        let version = decision.recommendation_version + 1;
        let request = AdvisoryRequest::new(decision.week, &decision.department, &decision.content)
            .with_feedback(feedback)
            .with_focus(focus);

        let guard = StateRestore::enter(&mut self.state, LifecycleState::Analyzing);
        let advice = self.advisor.advise(&request).await?;
        let coerced = coerce(&advice, self.metrics.catalog(), &request.department, version);
        if let Some(log) = &self.log {
            log.append(request.week, version, &advice.discussion)?;
        }

        let decision = &mut self.decisions[index];
        decision.recommendation_version = version;
        decision.recommendations.push(coerced.set.clone());
        let analysis = Analysis {
            decision_id: decision.id.clone(),
            week: decision.week,
            department: decision.department.clone(),
            version,
            recommendations: coerced.set,
            discussion: advice.discussion,
            dropped: coerced.dropped,
        };
        guard.commit(LifecycleState::AwaitingAction);
        info!(
            week = analysis.week,
            decision_id = %analysis.decision_id,
            version,
            "recommendations revised"
        );
        Ok(analysis)
    }

    /// Move to the next week, or finish on the last one.
    pub fn advance(&mut self) -> Result<AdvanceOutcome, EngineError> {
        if !self.clock.running {
            return Err(EngineError::NotRunning);
        }
        if self.clock.awaiting_action {
            return Err(EngineError::ActionPending);
        }
        if self.state != LifecycleState::Idle {
            return Err(EngineError::InvalidState {
                operation: "advance",
                expected: "idle",
                actual: self.state,
            });
        }
        if self.clock.is_last_week() {
            self.clock.running = false;
            self.state = LifecycleState::Completed;
            let final_week = self.clock.current_week;
            info!(final_week, "simulation complete");
            return Ok(AdvanceOutcome::Completed {
                final_week,
                metrics: self.metrics.effective_snapshot(final_week),
            });
        }
        self.clock.current_week += 1;
        let view = self.week_view();
        info!(week = view.week, department = %self.department(), "week advanced");
        Ok(AdvanceOutcome::InProgress(view))
    }

    /// Stop the session from any state. Metrics are left untouched.
    pub fn end_session(&mut self) -> SessionStatus {
        if let Some(index) = self.open.take() {
            if let Some(decision) = self.decisions.get_mut(index) {
                decision.status = DecisionStatus::Abandoned;
            }
        }
        self.clock.running = false;
        self.clock.awaiting_action = false;
        self.state = LifecycleState::Completed;
        info!(week = self.clock.current_week, "session ended");
        self.status()
    }

    pub fn status(&self) -> SessionStatus {
        let open = self.open_decision();
        SessionStatus {
            state: self.state,
            current_week: self.clock.current_week,
            total_weeks: self.clock.total_weeks,
            running: self.clock.running,
            department: self.current_challenge().map(|c| c.department.clone()),
            awaiting_action: self.clock.awaiting_action,
            open_decision_id: open.map(|d| d.id.clone()),
            recommendation_version: open.map(|d| d.recommendation_version),
            current_challenge: self.current_challenge().cloned(),
        }
    }

    /// Every decision ever opened, oldest first.
    pub fn decision_history(&self) -> &[Decision] {
        &self.decisions
    }

    pub fn weekly_summary(&self) -> Vec<WeekSummary> {
        self.decisions
            .iter()
            .map(|d| WeekSummary {
                week: d.week,
                department: d.department.clone(),
                situation: self
                    .challenges
                    .get(d.week)
                    .map(|c| c.situation.clone())
                    .unwrap_or_default(),
                decision: d.content.clone(),
                status: d.status,
                recommendations: d.latest().cloned(),
            })
            .collect()
    }

    /// Current week against the baseline.
    pub fn impact(&self) -> BTreeMap<MetricKey, MetricImpact> {
        self.metrics.impact_at(self.clock.current_week)
    }

    pub fn contributions(&self) -> &[ContributionRow] {
        &self.contributions
    }

    /// Validate an arbitrary batch of wire-form changes for the current
    /// department without applying it.
    pub fn preview_changes(
        &self,
        changes: &BTreeMap<String, f64>,
    ) -> Result<(), ConstraintViolation> {
        let department = self.department();
        let resolved = self.metrics.resolve(changes, &department)?;
        self.metrics.check(&resolved, &department)
    }
}
