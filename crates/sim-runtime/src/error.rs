use crate::lifecycle::LifecycleState;
use persistence::PersistenceError;
use sim_ai::AdvisoryError;
use sim_core::{CatalogError, ConfigError, MetricKey};
use sim_econ::EconError;
use thiserror::Error;

/// Why a batch of proposed changes was refused. Reports the first offender.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConstraintViolation {
    #[error("metric key {0:?} is not of the form scope.metric")]
    MalformedKey(String),
    #[error("metric {0} has no declared bounds")]
    Undeclared(MetricKey),
    #[error("metric {metric} belongs to another department than {department}")]
    ForeignDepartment { metric: MetricKey, department: String },
    #[error("metric {metric}: change {change} is not finite")]
    NonFinite { metric: MetricKey, change: f64 },
    #[error("metric {metric}: change {change} +/- {uncertainty} leaves [{min}, {max}]")]
    OutOfBounds {
        metric: MetricKey,
        change: f64,
        uncertainty: f64,
        min: f64,
        max: f64,
    },
}

/// Every failure the engine reports to a front end.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("{operation} requires state {expected}, engine is {actual}")]
    InvalidState {
        operation: &'static str,
        expected: &'static str,
        actual: LifecycleState,
    },
    #[error("simulation clock is not running")]
    NotRunning,
    #[error("no decision is awaiting action")]
    NoPendingAction,
    #[error("unknown decision {got:?}, open decision is {expected:?}")]
    UnknownDecision { expected: String, got: String },
    #[error("a decision is still awaiting action")]
    ActionPending,
    #[error("validation failed: {0}")]
    Validation(#[from] ConstraintViolation),
    #[error("advisory collaborator failed: {0}")]
    CollaboratorFailure(#[from] AdvisoryError),
    #[error("persistence failed: {0}")]
    Persistence(#[from] PersistenceError),
    #[error("numeric error: {0}")]
    Numeric(#[from] EconError),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("constraint catalog error: {0}")]
    Catalog(#[from] CatalogError),
}
