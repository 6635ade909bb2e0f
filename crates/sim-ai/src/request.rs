use serde::{Deserialize, Serialize};
use sim_core::normalize_department;

/// Everything the panel is told about one decision.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AdvisoryRequest {
    pub week: u32,
    pub department: String,
    pub decision_text: String,
    #[serde(default)]
    pub feedback: Option<String>,
    /// Items the user wants the panel to revisit.
    #[serde(default)]
    pub focus: Vec<String>,
}

impl AdvisoryRequest {
    pub fn new(week: u32, department: &str, decision_text: &str) -> Self {
        Self {
            week,
            department: normalize_department(department),
            decision_text: decision_text.trim().to_string(),
            feedback: None,
            focus: Vec::new(),
        }
    }

    pub fn with_feedback(mut self, feedback: Option<String>) -> Self {
        self.feedback = feedback.filter(|f| !f.trim().is_empty());
        self
    }

    pub fn with_focus(mut self, focus: Vec<String>) -> Self {
        self.focus = focus;
        self
    }

    pub fn panel(&self) -> Vec<&'static str> {
        panel_for(&self.department)
    }

    /// Task text handed to the discussion.
    pub fn prompt(&self) -> String {
        let mut out = format!(
            "Department: {}\nUser's Decision: {}\n\n",
            self.department, self.decision_text
        );
        match (&self.feedback, self.focus.is_empty()) {
            (Some(feedback), false) => {
                out.push_str("User's Feedback on Previous Recommendations:\n");
                out.push_str(feedback);
                out.push_str("\n\nSpecific Recommendations to Address:\n");
                for item in &self.focus {
                    out.push_str(&format!("- {item}\n"));
                }
                out.push_str(
                    "\nProvide updated analysis focusing on these specific points.\n\
                     Format your response with:\n\
                     FEEDBACK RESPONSE:\n- [Point-by-point response to user's concerns]\n\n\
                     UPDATED RECOMMENDATIONS:\n- [Modified recommendations]\n\n",
                );
            }
            (feedback, _) => {
                if let Some(feedback) = feedback {
                    out.push_str("User's Feedback:\n");
                    out.push_str(feedback);
                    out.push_str("\n\n");
                }
                out.push_str(
                    "Analyze this decision and provide specific recommendations. Focus on:\n\
                     1. Impact on core metrics (revenue, profit margin, satisfaction)\n\
                     2. Impact on department metrics (efficiency, growth, innovation)\n\
                     3. Implementation steps and timeline\n\n\
                     Format your response with:\n",
                );
            }
        }
        out.push_str(
            "METRIC ADJUSTMENTS:\n- [Metric Name]: [+/-X%] (with justification)\n\n\
             IMPLEMENTATION STEPS:\n1. [Step 1]\n2. [Step 2]\n\n\
             RISKS AND MITIGATION:\n- [Risk]: [Mitigation Strategy]\n",
        );
        out
    }
}

/// Advisors that sit on the panel for a department. The CEO always attends.
pub fn panel_for(department: &str) -> Vec<&'static str> {
    let mut panel = vec!["CEO"];
    let extra: &[&'static str] = match normalize_department(department).as_str() {
        "PRODUCT" => &["CTO", "COO"],
        "SALES" => &["Sales", "COO"],
        "MARKETING" => &["Marketing", "COO"],
        "HR" => &["HR", "COO"],
        "FINANCE" => &["CFO", "COO"],
        _ => &[],
    };
    panel.extend_from_slice(extra);
    panel
}
