#![deny(warnings)]

//! Advisory panel boundary.
//!
//! The panel that turns a decision into metric recommendations is an opaque,
//! non-deterministic collaborator. This crate defines its contract
//! ([`Advisor`]), the request it receives, how its free-form output is
//! extracted and coerced into a typed [`sim_core::RecommendationSet`], and a
//! retrying wrapper that bounds how long the engine waits on it.

mod boundary;
mod extract;
mod request;
mod retry;
mod scripted;
mod transcript;

pub use boundary::{coerce, Coerced, DropReason, DroppedKey};
pub use extract::{
    Extraction, ExtractionError, Extractor, FallbackExtractor, PatternExtractor,
    StructuredExtractor,
};
pub use request::{panel_for, AdvisoryRequest};
pub use retry::{RetryPolicy, RetryingAdvisor};
pub use scripted::ScriptedAdvisor;
pub use transcript::{DiscussionBackend, TranscriptAdvisor};

use serde::{Deserialize, Serialize};
use sim_core::AgentMessage;
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Proposals of one agent exactly as the panel produced them.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RawProposal {
    pub agent: String,
    /// `"scope.metric"` to a proposed percentage; values are untrusted.
    pub changes: BTreeMap<String, serde_json::Value>,
}

/// Untrusted panel output: the discussion and per-agent proposals.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Advice {
    #[serde(default)]
    pub discussion: Vec<AgentMessage>,
    #[serde(default)]
    pub proposals: Vec<RawProposal>,
}

impl Advice {
    /// Record an agent's proposals; a later entry for the same agent replaces it.
    pub fn propose(&mut self, agent: &str, changes: BTreeMap<String, serde_json::Value>) {
        match self.proposals.iter_mut().find(|p| p.agent == agent) {
            Some(p) => p.changes = changes,
            None => self.proposals.push(RawProposal {
                agent: agent.to_string(),
                changes,
            }),
        }
    }
}

/// Failures of an advisory call.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AdvisoryError {
    #[error("advisory call timed out after {0:?}")]
    Timeout(Duration),
    /// Worth retrying (rate limit, connection reset, ...).
    #[error("transient advisory failure: {0}")]
    Transient(String),
    #[error("advisory panel unavailable: {0}")]
    Unavailable(String),
    #[error("advisory output unusable: {0}")]
    Malformed(String),
    #[error("advisory call failed after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        last: Box<AdvisoryError>,
    },
}

impl AdvisoryError {
    pub fn is_transient(&self) -> bool {
        matches!(self, AdvisoryError::Timeout(_) | AdvisoryError::Transient(_))
    }
}

/// The external advisory collaborator.
pub trait Advisor {
    fn advise(
        &mut self,
        request: &AdvisoryRequest,
    ) -> impl Future<Output = Result<Advice, AdvisoryError>> + Send;
}
