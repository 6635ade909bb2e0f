use crate::extract::percent_from_value;
use crate::Advice;
use serde::{Deserialize, Serialize};
use sim_core::{ConstraintCatalog, MetricKey, RecommendationSet};
use std::collections::BTreeMap;
use tracing::warn;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Not of the form `scope.metric` or an unknown scope.
    Malformed,
    /// Well-formed but not declared in the constraint catalog.
    Undeclared,
    /// Value is not a finite number.
    NotNumeric,
}

/// A panel proposal discarded at the boundary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DroppedKey {
    pub agent: String,
    pub key: String,
    pub reason: DropReason,
}

/// Typed recommendations plus everything that was thrown away.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Coerced {
    pub set: RecommendationSet,
    pub dropped: Vec<DroppedKey>,
}

/// Re-validate untrusted panel output against the catalog.
///
/// Every key is resolved to a [`MetricKey`] for `department` and checked for
/// a declaration; anything else is dropped and logged. Agents whose proposals
/// are all dropped are still listed, with no changes.
pub fn coerce(
    advice: &Advice,
    catalog: &ConstraintCatalog,
    department: &str,
    version: u32,
) -> Coerced {
    let mut out = Coerced {
        set: RecommendationSet::new(version),
        dropped: Vec::new(),
    };
    for proposal in &advice.proposals {
        let mut changes = BTreeMap::new();
        for (raw_key, raw_value) in &proposal.changes {
            let mut reject = |reason| {
                warn!(
                    agent = %proposal.agent,
                    key = %raw_key,
                    ?reason,
                    "dropping advisory proposal"
                );
                out.dropped.push(DroppedKey {
                    agent: proposal.agent.clone(),
                    key: raw_key.clone(),
                    reason,
                });
            };
            let Ok(key) = MetricKey::parse(raw_key, department) else {
                reject(DropReason::Malformed);
                continue;
            };
            if catalog.spec_for(&key).is_none() {
                reject(DropReason::Undeclared);
                continue;
            }
            let Some(value) = percent_from_value(raw_value) else {
                reject(DropReason::NotNumeric);
                continue;
            };
            changes.insert(key, value);
        }
        out.set.insert(&proposal.agent, changes);
    }
    out
}
