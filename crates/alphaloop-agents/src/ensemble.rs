use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};

use alphaloop_gateways::{ChatMessage, ChatOutcome, ChatRequest, LlmProvider};
use alphaloop_models::{AnalystOpinion, AnalystOutcome, LlmConfig, MarketContext};

use crate::error::AgentError;
use crate::parser;
use crate::prompts;

/// One market analyst persona.
#[async_trait]
pub trait Analyst: Send + Sync {
    fn id(&self) -> &str;
    async fn analyze(&self, context: &MarketContext) -> Result<AnalystOpinion, AgentError>;
}

/// Analyst backed by a single chat completion with a persona prompt.
pub struct LlmAnalyst {
    id: String,
    provider: Arc<dyn LlmProvider>,
    config: LlmConfig,
}

impl LlmAnalyst {
    pub fn new(id: impl Into<String>, provider: Arc<dyn LlmProvider>, config: LlmConfig) -> Self {
        Self {
            id: id.into(),
            provider,
            config,
        }
    }
}

#[async_trait]
impl Analyst for LlmAnalyst {
    fn id(&self) -> &str {
        &self.id
    }

    async fn analyze(&self, context: &MarketContext) -> Result<AnalystOpinion, AgentError> {
        let mut request = ChatRequest::new(
            &self.config.model,
            vec![
                ChatMessage::system(prompts::analyst_system(&self.id)),
                ChatMessage::user(context.to_prompt()),
            ],
        );
        request.provider = self.config.provider_hints.clone();

        let reply = match self.provider.chat(&request).await? {
            ChatOutcome::Reply(reply) => reply,
            ChatOutcome::Rejected(rejection) => {
                return Err(AgentError::Parse(format!(
                    "analyst request rejected: {rejection:?}"
                )));
            }
        };

        let value = match &reply.parsed {
            Some(parsed) => parsed.clone(),
            None => parser::extract_value(&reply.content.unwrap_or_default())?,
        };
        let mut opinion: AnalystOpinion = serde_json::from_value(value)?;
        // The configured id wins over whatever the model self-reported.
        opinion.analyst_id = self.id.clone();
        Ok(opinion)
    }
}

/// Fans the snapshot out to every analyst concurrently.
///
/// A failing analyst never takes the panel down: its error is captured as
/// a failure outcome and arbitration continues with whoever answered.
pub struct AnalystEnsemble {
    analysts: Vec<Arc<dyn Analyst>>,
}

impl AnalystEnsemble {
    pub fn new(analysts: Vec<Arc<dyn Analyst>>) -> Self {
        Self { analysts }
    }

    pub fn is_empty(&self) -> bool {
        self.analysts.is_empty()
    }

    /// Run the full panel; outcomes come back in roster order.
    pub async fn run(&self, context: &MarketContext) -> Vec<AnalystOutcome> {
        let mut handles = Vec::with_capacity(self.analysts.len());
        for analyst in &self.analysts {
            let analyst = Arc::clone(analyst);
            let context = context.clone();
            let id = analyst.id().to_string();
            handles.push((
                id,
                tokio::spawn(async move { analyst.analyze(&context).await }),
            ));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for (id, handle) in handles {
            let outcome = match handle.await {
                Ok(Ok(opinion)) => AnalystOutcome::Opinion(opinion),
                Ok(Err(e)) => {
                    warn!(analyst = %id, error = %e, "analyst failed");
                    AnalystOutcome::Failure {
                        analyst_id: id,
                        error: e.to_string(),
                        timestamp: Utc::now(),
                    }
                }
                Err(e) => {
                    warn!(analyst = %id, error = %e, "analyst task panicked");
                    AnalystOutcome::Failure {
                        analyst_id: id,
                        error: format!("task failure: {e}"),
                        timestamp: Utc::now(),
                    }
                }
            };
            outcomes.push(outcome);
        }

        let failures = outcomes.iter().filter(|o| o.is_failure()).count();
        info!(panel = outcomes.len(), failures, "ensemble pass complete");
        outcomes
    }
}
