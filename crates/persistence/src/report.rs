use crate::PersistenceError;
use serde::{Deserialize, Serialize};
use sim_core::MetricKey;
use sim_econ::MetricImpact;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

/// What one accepted decision did to the metrics.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContributionRow {
    pub decision_id: String,
    pub week: u32,
    pub recommendation_version: u32,
    pub agents: Vec<String>,
    pub deltas: BTreeMap<MetricKey, MetricImpact>,
}

fn pct(v: f64) -> String {
    if v.is_infinite() {
        if v > 0.0 {
            "+inf%".into()
        } else {
            "-inf%".into()
        }
    } else {
        format!("{v:.2}%")
    }
}

/// Plain-text impact report: overall impact, then per-decision contributions.
pub fn render_impact_report(
    impact: &BTreeMap<MetricKey, MetricImpact>,
    contributions: &[ContributionRow],
) -> String {
    let mut out = String::new();
    out.push_str("Company Growth Strategy Impact Report\n");
    out.push_str("=================================\n\n");
    out.push_str("Overall Impact:\n--------------\n");
    if impact.is_empty() {
        out.push_str("(no tracked metrics)\n");
    }
    for (key, m) in impact {
        let _ = writeln!(out, "{key}:");
        let _ = writeln!(out, "  Initial Value: {:.2}", m.initial);
        let _ = writeln!(out, "  Final Value: {:.2}", m.final_value);
        let _ = writeln!(out, "  Absolute Change: {:.2}", m.absolute_change);
        let _ = writeln!(out, "  Percentage Change: {}\n", pct(m.percent_change));
    }
    out.push_str("Decision Contributions:\n------------------\n");
    if contributions.is_empty() {
        out.push_str("(no accepted decisions)\n");
    }
    for row in contributions {
        let _ = writeln!(
            out,
            "Week {} | {} | version {} | advisors: {}",
            row.week,
            row.decision_id,
            row.recommendation_version,
            if row.agents.is_empty() { "-".to_string() } else { row.agents.join(", ") }
        );
        for (key, d) in &row.deltas {
            let _ = writeln!(
                out,
                "  {key}: {:.2} -> {:.2} ({})",
                d.initial,
                d.final_value,
                pct(d.percent_change)
            );
        }
    }
    out
}

pub fn write_report(path: &Path, text: &str) -> Result<(), PersistenceError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| PersistenceError::io(parent, e))?;
    }
    fs::write(path, text).map_err(|e| PersistenceError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_lists_impact_and_contributions() {
        let key = MetricKey::core("revenue");
        let impact = BTreeMap::from([(key.clone(), MetricImpact::between(100.0, 110.0))]);
        let rows = vec![ContributionRow {
            decision_id: "decision_1".into(),
            week: 1,
            recommendation_version: 2,
            agents: vec!["CEO".into(), "Sales".into()],
            deltas: BTreeMap::from([(key, MetricImpact::between(100.0, 110.0))]),
        }];
        let text = render_impact_report(&impact, &rows);
        assert!(text.contains("core.revenue:"));
        assert!(text.contains("Percentage Change: 10.00%"));
        assert!(text.contains("Week 1 | decision_1 | version 2 | advisors: CEO, Sales"));
    }

    #[test]
    fn infinite_change_is_rendered() {
        let impact = BTreeMap::from([(MetricKey::core("x"), MetricImpact::between(0.0, -3.0))]);
        let text = render_impact_report(&impact, &[]);
        assert!(text.contains("-inf%"));
        assert!(text.contains("(no accepted decisions)"));
    }
}
