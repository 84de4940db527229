use std::sync::Arc;

use tracing::{debug, info, warn};

use alphaloop_gateways::{
    AssistantMessage, CapabilityRejection, ChatMessage, ChatOutcome, ChatRequest, IndicatorQuery,
    IndicatorSource, LlmProvider, ToolCall,
};
use alphaloop_models::{DecisionSet, LlmConfig, MarketContext};

use crate::error::AgentError;
use crate::parser;
use crate::prompts;

/// Tool rounds allowed before the pass gives up and holds.
const MAX_ROUNDS: usize = 6;

/// Single-model decision pass: one conversation with a tool loop, a
/// strict-schema repair pass, and an all-hold floor.
///
/// The only errors that escape [`DecisionSynthesizer::decide`] are provider
/// transport failures on the primary conversation. Everything downstream of
/// a successful reply — unparseable content, a failed repair pass, the
/// round cap — degrades to a hold set instead.
pub struct DecisionSynthesizer {
    provider: Arc<dyn LlmProvider>,
    indicators: Arc<dyn IndicatorSource>,
    config: LlmConfig,
}

impl DecisionSynthesizer {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        indicators: Arc<dyn IndicatorSource>,
        config: LlmConfig,
    ) -> Self {
        Self {
            provider,
            indicators,
            config,
        }
    }

    pub async fn decide(
        &self,
        context: &MarketContext,
        assets: &[String],
    ) -> Result<DecisionSet, AgentError> {
        let mut allow_tools = self.config.allow_tools;
        let mut allow_structured = self.config.allow_structured;
        let mut messages = vec![
            ChatMessage::system(prompts::SYNTHESIZER_SYSTEM),
            ChatMessage::user(context.to_prompt()),
        ];

        for round in 0..MAX_ROUNDS {
            let request = self.build_request(&messages, allow_tools, allow_structured);
            match self.provider.chat(&request).await? {
                ChatOutcome::Rejected(CapabilityRejection::Tools) => {
                    // Downgrade consumes a round so a flapping provider
                    // cannot spin the loop forever.
                    warn!(round, "model rejected tool calling, downgrading");
                    allow_tools = false;
                }
                ChatOutcome::Rejected(CapabilityRejection::StructuredOutput) => {
                    warn!(round, "model rejected structured output, downgrading");
                    allow_structured = false;
                }
                ChatOutcome::Reply(reply) if !reply.tool_calls.is_empty() => {
                    let calls = reply.tool_calls.clone();
                    debug!(round, calls = calls.len(), "dispatching tool calls");
                    messages.push(reply.into_message());
                    for call in &calls {
                        messages.push(self.dispatch_tool_call(call).await);
                    }
                }
                ChatOutcome::Reply(reply) => {
                    return Ok(self.finish(reply, assets).await);
                }
            }
        }

        info!("tool loop cap reached without a final reply, holding");
        Ok(DecisionSet::all_hold(assets, "tool loop cap reached"))
    }

    fn build_request(
        &self,
        messages: &[ChatMessage],
        allow_tools: bool,
        allow_structured: bool,
    ) -> ChatRequest {
        let mut request = ChatRequest::new(&self.config.model, messages.to_vec());
        if allow_tools {
            request.tools = Some(prompts::indicator_tools());
            request.tool_choice = Some("auto".to_string());
        }
        if allow_structured {
            request.response_format = Some(prompts::decision_response_format());
        }
        if self.config.reasoning_enabled {
            request.reasoning =
                Some(serde_json::json!({ "effort": self.config.reasoning_effort }));
        }
        request.provider = self.config.provider_hints.clone();
        request
    }

    /// Execute one tool call; failures become a JSON error payload the
    /// model can read, never a pipeline error.
    async fn dispatch_tool_call(&self, call: &ToolCall) -> ChatMessage {
        let call_id = call.id.clone().unwrap_or_default();
        let name = call.function.name.as_str();

        let content = if name != "get_indicator" {
            serde_json::json!({"error": format!("unknown tool: {name}")}).to_string()
        } else {
            match serde_json::from_str::<IndicatorQuery>(&call.function.arguments) {
                Err(e) => serde_json::json!({"error": format!("bad arguments: {e}")}).to_string(),
                Ok(query) => match self.indicators.fetch_indicator(&query).await {
                    Ok(value) => value.to_string(),
                    Err(e) => {
                        warn!(indicator = %query.indicator, error = %e, "tool call failed");
                        serde_json::json!({"error": e.to_string()}).to_string()
                    }
                },
            }
        };

        ChatMessage::tool_reply(&call_id, name, content)
    }

    /// Turn a final assistant reply into a decision set, repairing or
    /// degrading as needed.
    async fn finish(&self, reply: AssistantMessage, assets: &[String]) -> DecisionSet {
        if let Some(parsed) = &reply.parsed {
            if let Some(set) = DecisionSet::from_raw(parsed, assets) {
                return set;
            }
        }

        let content = reply.content.unwrap_or_default();
        if let Some(set) = parse_content(&content, assets) {
            return set;
        }

        info!("decision payload unparseable, running repair pass");
        match self.sanitize(&content, assets).await {
            Some(set) => set,
            None => DecisionSet::all_hold(assets, "Parse error: unrecoverable decision payload"),
        }
    }

    /// Strict-schema repair pass on the sanitizer model.
    ///
    /// Re-checks the local parse first so feeding an already-valid payload
    /// through is a no-op, then asks the sanitizer model to re-emit the
    /// payload at temperature zero. Transport failures here are swallowed:
    /// the caller falls back to holding.
    pub async fn sanitize(&self, raw: &str, assets: &[String]) -> Option<DecisionSet> {
        if let Some(set) = parse_content(raw, assets) {
            return Some(set);
        }

        let mut request = ChatRequest::new(
            &self.config.sanitizer_model,
            vec![
                ChatMessage::system(prompts::SANITIZER_SYSTEM),
                ChatMessage::user(raw),
            ],
        );
        request.response_format = Some(prompts::decision_response_format());
        request.temperature = Some(0.0);

        match self.provider.chat(&request).await {
            Ok(ChatOutcome::Reply(reply)) => {
                if let Some(parsed) = &reply.parsed {
                    if let Some(set) = DecisionSet::from_raw(parsed, assets) {
                        return Some(set);
                    }
                }
                parse_content(&reply.content.unwrap_or_default(), assets)
            }
            Ok(ChatOutcome::Rejected(rejection)) => {
                warn!(?rejection, "sanitizer model rejected the repair request");
                None
            }
            Err(e) => {
                warn!(error = %e, "repair pass failed");
                None
            }
        }
    }
}

fn parse_content(content: &str, assets: &[String]) -> Option<DecisionSet> {
    let value = parser::extract_value(content).ok()?;
    DecisionSet::from_raw(&value, assets)
}
