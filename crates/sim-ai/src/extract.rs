//! Turning an agent's free-text message into proposed percentage changes.
//!
//! Two strategies share one contract: [`StructuredExtractor`] reads a JSON
//! object embedded in the message, [`PatternExtractor`] scans lines for
//! `metric: +X%` phrases. [`FallbackExtractor`] chains them so callers never
//! branch on the parsing strategy.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use sim_core::{ConstraintCatalog, Scope};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

/// Proposed changes found in one message, keyed `"scope.metric"`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Extraction {
    pub changes: BTreeMap<String, f64>,
}

impl Extraction {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("no recommendations found in message")]
    NotFound,
}

pub trait Extractor {
    fn extract(&self, content: &str) -> Result<Extraction, ExtractionError>;
}

/// Read a percentage from a JSON value: numbers, or strings such as `"+5%"`.
pub(crate) fn percent_from_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s
            .trim()
            .trim_end_matches('%')
            .trim()
            .trim_start_matches('+')
            .parse::<f64>()
            .ok(),
        _ => None,
    }
    .filter(|v| v.is_finite())
}

/// Finds the first JSON object in the message.
#[derive(Clone, Copy, Debug, Default)]
pub struct StructuredExtractor;

impl Extractor for StructuredExtractor {
    fn extract(&self, content: &str) -> Result<Extraction, ExtractionError> {
        for (start, _) in content.match_indices('{') {
            let mut stream =
                serde_json::Deserializer::from_str(&content[start..]).into_iter::<Value>();
            let Some(Ok(Value::Object(map))) = stream.next() else {
                continue;
            };
            let changes: BTreeMap<String, f64> = map
                .iter()
                .filter_map(|(k, v)| percent_from_value(v).map(|p| (k.trim().to_string(), p)))
                .collect();
            if !changes.is_empty() {
                return Ok(Extraction { changes });
            }
        }
        Err(ExtractionError::NotFound)
    }
}

static WIRE_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^[\s\-*]*(core|department)\.([a-z0-9_]+)\s*[:=]\s*([+-]?\d+(?:\.\d+)?)\s*%?")
        .expect("static pattern compiles")
});

/// Deterministic line scanner over a known metric vocabulary.
#[derive(Clone, Debug)]
pub struct PatternExtractor {
    vocabulary: Vec<(String, Regex)>,
}

impl PatternExtractor {
    /// Vocabulary of `"scope.metric"` keys; names are matched with `_`
    /// read as any separator, case-insensitively.
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let vocabulary = keys
            .into_iter()
            .filter_map(|key| {
                let key = key.as_ref();
                let (_, name) = key.split_once('.')?;
                let words: Vec<String> = name
                    .split('_')
                    .filter(|w| !w.is_empty())
                    .map(regex::escape)
                    .collect();
                if words.is_empty() {
                    return None;
                }
                let pattern = format!(
                    r"(?i)\b{}\b[^\n%\d+\-]*([+-]?\d+(?:\.\d+)?)\s*%",
                    words.join(r"[\s_\-]+")
                );
                Regex::new(&pattern).ok().map(|re| (key.to_string(), re))
            })
            .collect();
        Self { vocabulary }
    }

    /// Vocabulary drawn from the metrics declared for `department`.
    pub fn from_catalog(catalog: &ConstraintCatalog, department: &str) -> Self {
        let allowed = catalog.allowed_metrics(department);
        let keys = allowed
            .core
            .keys()
            .map(|m| format!("{}.{m}", Scope::Core.as_str()))
            .chain(
                allowed
                    .department
                    .keys()
                    .map(|m| format!("{}.{m}", Scope::Department.as_str())),
            );
        Self::new(keys)
    }
}

impl Extractor for PatternExtractor {
    fn extract(&self, content: &str) -> Result<Extraction, ExtractionError> {
        let mut changes = BTreeMap::new();
        for cap in WIRE_LINE.captures_iter(content) {
            if let Ok(v) = cap[3].parse::<f64>() {
                changes
                    .entry(format!("{}.{}", cap[1].to_lowercase(), cap[2].to_lowercase()))
                    .or_insert(v);
            }
        }
        for line in content.lines() {
            for (key, re) in &self.vocabulary {
                if changes.contains_key(key) {
                    continue;
                }
                if let Some(v) = re.captures(line).and_then(|c| c[1].parse::<f64>().ok()) {
                    changes.insert(key.clone(), v);
                }
            }
        }
        if changes.is_empty() {
            return Err(ExtractionError::NotFound);
        }
        debug!(found = changes.len(), "pattern extraction");
        Ok(Extraction { changes })
    }
}

/// Try `primary`; fall back to `secondary` when it finds nothing.
#[derive(Clone, Debug)]
pub struct FallbackExtractor<P, S> {
    primary: P,
    secondary: S,
}

impl<P, S> FallbackExtractor<P, S> {
    pub fn new(primary: P, secondary: S) -> Self {
        Self { primary, secondary }
    }
}

impl<P: Extractor, S: Extractor> Extractor for FallbackExtractor<P, S> {
    fn extract(&self, content: &str) -> Result<Extraction, ExtractionError> {
        match self.primary.extract(content) {
            Ok(found) if !found.is_empty() => Ok(found),
            _ => self.secondary.extract(content),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sim_core::ConstraintSpec;

    #[test]
    fn structured_reads_embedded_object() {
        let msg = "Here is my view.\n{\"core.revenue\": 15, \"department.operational_efficiency\": \"-5%\", \"note\": \"x\"}\nThanks";
        let e = StructuredExtractor.extract(msg).unwrap();
        assert_eq!(e.changes["core.revenue"], 15.0);
        assert_eq!(e.changes["department.operational_efficiency"], -5.0);
        assert!(!e.changes.contains_key("note"));
    }

    #[test]
    fn structured_skips_non_objects() {
        assert_eq!(
            StructuredExtractor.extract("budget {not json} and no numbers"),
            Err(ExtractionError::NotFound)
        );
    }

    #[test]
    fn pattern_reads_wire_keys_and_names() {
        let catalog = ConstraintCatalog::new()
            .with_core("customer_satisfaction", ConstraintSpec::new(-10.0, 10.0, 1.0))
            .with_department("SALES", "growth_rate", ConstraintSpec::new(-10.0, 10.0, 2.0));
        let p = PatternExtractor::from_catalog(&catalog, "sales");
        let msg = "METRIC ADJUSTMENTS:\n- core.revenue: +4.5%\n- Growth rate: +8% driven by promotions\n- Customer satisfaction drops -2% short term";
        let e = p.extract(msg).unwrap();
        assert_eq!(e.changes["core.revenue"], 4.5);
        assert_eq!(e.changes["department.growth_rate"], 8.0);
        assert_eq!(e.changes["core.customer_satisfaction"], -2.0);
    }

    #[test]
    fn pattern_without_matches_fails() {
        let p = PatternExtractor::new(["core.revenue"]);
        assert!(p.extract("We should think about revenue.").is_err());
    }

    #[test]
    fn fallback_uses_secondary() {
        let chain =
            FallbackExtractor::new(StructuredExtractor, PatternExtractor::new(["core.revenue"]));
        let e = chain.extract("Revenue up 3% next quarter").unwrap();
        assert_eq!(e.changes["core.revenue"], 3.0);
        let e = chain.extract("{\"core.revenue\": 9}").unwrap();
        assert_eq!(e.changes["core.revenue"], 9.0);
    }
}
