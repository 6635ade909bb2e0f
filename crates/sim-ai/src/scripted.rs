use crate::{Advice, AdvisoryError, AdvisoryRequest, Advisor};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::debug;

/// Replays canned panel responses in order; used by tests and headless runs.
#[derive(Debug, Default)]
pub struct ScriptedAdvisor {
    script: VecDeque<Result<Advice, AdvisoryError>>,
    requests: Vec<AdvisoryRequest>,
    delay: Option<Duration>,
}

impl ScriptedAdvisor {
    pub fn new(script: impl IntoIterator<Item = Result<Advice, AdvisoryError>>) -> Self {
        Self {
            script: script.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn from_advice(advice: impl IntoIterator<Item = Advice>) -> Self {
        Self::new(advice.into_iter().map(Ok))
    }

    /// Wait this long before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push(&mut self, response: Result<Advice, AdvisoryError>) {
        self.script.push_back(response);
    }

    /// Every request received so far, including ones that timed out.
    pub fn requests(&self) -> &[AdvisoryRequest] {
        &self.requests
    }

    pub fn remaining(&self) -> usize {
        self.script.len()
    }
}

impl Advisor for ScriptedAdvisor {
    async fn advise(&mut self, request: &AdvisoryRequest) -> Result<Advice, AdvisoryError> {
        self.requests.push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        debug!(week = request.week, remaining = self.script.len(), "scripted advice");
        self.script
            .pop_front()
            .unwrap_or_else(|| Err(AdvisoryError::Unavailable("script exhausted".into())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replays_then_reports_unavailable() {
        let mut advisor = ScriptedAdvisor::from_advice([Advice::default()]);
        let req = AdvisoryRequest::new(2, "hr", "Hire two recruiters");
        assert!(advisor.advise(&req).await.is_ok());
        assert!(matches!(
            advisor.advise(&req).await,
            Err(AdvisoryError::Unavailable(_))
        ));
        assert_eq!(advisor.requests().len(), 2);
        assert_eq!(advisor.requests()[0].department, "HR");
    }
}
