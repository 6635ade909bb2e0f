use crate::extract::Extractor;
use crate::{Advice, AdvisoryError, AdvisoryRequest, Advisor};
use serde_json::Value;
use sim_core::AgentMessage;
use std::future::Future;
use tracing::debug;

/// The opaque multi-agent discussion: given a panel and a task, produce the
/// messages in the order they were spoken.
pub trait DiscussionBackend {
    fn discuss(
        &mut self,
        panel: &[&'static str],
        prompt: &str,
    ) -> impl Future<Output = Result<Vec<AgentMessage>, AdvisoryError>> + Send;
}

/// Advisor built from a discussion backend and an extractor; each message
/// becomes that agent's proposals.
#[derive(Debug)]
pub struct TranscriptAdvisor<B, E> {
    backend: B,
    extractor: E,
}

impl<B, E> TranscriptAdvisor<B, E> {
    pub fn new(backend: B, extractor: E) -> Self {
        Self { backend, extractor }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}

impl<B, E> Advisor for TranscriptAdvisor<B, E>
where
    B: DiscussionBackend + Send,
    E: Extractor + Send,
{
    async fn advise(&mut self, request: &AdvisoryRequest) -> Result<Advice, AdvisoryError> {
        let panel = request.panel();
        let prompt = request.prompt();
        let discussion = self.backend.discuss(&panel, &prompt).await?;
        if discussion.is_empty() {
            return Err(AdvisoryError::Malformed("discussion produced no messages".into()));
        }
        let mut advice = Advice::default();
        for message in &discussion {
            match self.extractor.extract(&message.content) {
                Ok(found) => {
                    let changes = found
                        .changes
                        .into_iter()
                        .map(|(k, v)| (k, Value::from(v)))
                        .collect();
                    advice.propose(&message.agent, changes);
                }
                Err(err) => debug!(agent = %message.agent, %err, "no proposals in message"),
            }
        }
        advice.discussion = discussion;
        Ok(advice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FallbackExtractor, PatternExtractor, StructuredExtractor};

    struct Canned {
        seen_panel: Vec<&'static str>,
    }

    impl DiscussionBackend for Canned {
        async fn discuss(
            &mut self,
            panel: &[&'static str],
            _prompt: &str,
        ) -> Result<Vec<AgentMessage>, AdvisoryError> {
            self.seen_panel = panel.to_vec();
            Ok(vec![
                AgentMessage::new("CEO", "Revenue should rise 4% with this."),
                AgentMessage::new("Sales", "{\"department.growth_rate\": 6}"),
                AgentMessage::new("COO", "No numbers from me."),
            ])
        }
    }

    #[tokio::test]
    async fn messages_become_per_agent_proposals() {
        let extractor = FallbackExtractor::new(
            StructuredExtractor,
            PatternExtractor::new(["core.revenue", "department.growth_rate"]),
        );
        let mut advisor = TranscriptAdvisor::new(Canned { seen_panel: vec![] }, extractor);
        let advice = advisor
            .advise(&AdvisoryRequest::new(1, "sales", "Discount bundle"))
            .await
            .unwrap();
        assert_eq!(advisor.backend().seen_panel, ["CEO", "Sales", "COO"]);
        assert_eq!(advice.discussion.len(), 3);
        assert_eq!(advice.proposals.len(), 2);
        assert_eq!(advice.proposals[0].agent, "CEO");
        assert_eq!(advice.proposals[0].changes["core.revenue"], Value::from(4.0));
        assert_eq!(advice.proposals[1].changes["department.growth_rate"], Value::from(6.0));
    }
}
