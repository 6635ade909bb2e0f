#![deny(warnings)]

//! Metrics update and decision-lifecycle engine.
//!
//! [`MetricsManager`] owns the weekly snapshots and is the only writer;
//! [`DecisionLifecycle`] serializes submit, act and advance around the
//! advisory call; [`Session`] wires both to configuration files.

mod error;
mod lifecycle;
mod metrics;
mod session;

pub use error::{ConstraintViolation, EngineError};
pub use lifecycle::{
    ActionKind, ActionOutcome, ActionRequest, AdvanceOutcome, Analysis, DecisionLifecycle,
    LifecycleState, SessionStatus, WeekSummary, WeekView,
};
pub use metrics::MetricsManager;
pub use session::{Session, SessionConfig};
