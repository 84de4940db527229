//! Test doubles for the decision pipeline: a scripted chat provider and a
//! canned indicator source. Panics in here are deliberate — a test that
//! runs off the end of its script is a broken test.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use alphaloop_gateways::{
    AssistantMessage, ChatOutcome, ChatRequest, GatewayError, IndicatorBundle, IndicatorQuery,
    IndicatorSource, LlmProvider, ToolCall, ToolFunction,
};
use alphaloop_models::{
    AccountDashboard, AnalystOpinion, AnalystOutcome, ContextInstructions, Invocation,
    MarketContext, TradeAction, TradeDecision,
};

/// Provider that plays back a fixed script of outcomes and records every
/// request it saw.
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<ChatOutcome, GatewayError>>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedProvider {
    pub fn new(script: Vec<Result<ChatOutcome, GatewayError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// The nth request the provider received.
    pub fn request(&self, index: usize) -> ChatRequest {
        self.requests.lock().unwrap()[index].clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatOutcome, GatewayError> {
        self.requests.lock().unwrap().push(request.clone());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("scripted provider ran out of outcomes"))
    }
}

/// Indicator source returning canned values keyed by indicator name.
#[derive(Default)]
pub struct StaticIndicators {
    pub values: HashMap<String, serde_json::Value>,
}

#[async_trait]
impl IndicatorSource for StaticIndicators {
    async fn fetch_indicator(
        &self,
        query: &IndicatorQuery,
    ) -> Result<serde_json::Value, GatewayError> {
        Ok(self
            .values
            .get(&query.indicator)
            .cloned()
            .unwrap_or_else(|| serde_json::json!({"value": 50.0})))
    }

    async fn fetch_asset_indicators(
        &self,
        _asset: &str,
        _interval: &str,
    ) -> Result<IndicatorBundle, GatewayError> {
        Ok(IndicatorBundle::new())
    }
}

pub fn reply_with_content(content: &str) -> ChatOutcome {
    ChatOutcome::Reply(AssistantMessage {
        content: Some(content.to_string()),
        ..Default::default()
    })
}

pub fn reply_with_tool_call(id: &str, name: &str, arguments: &str) -> ChatOutcome {
    ChatOutcome::Reply(AssistantMessage {
        content: None,
        tool_calls: vec![ToolCall {
            id: Some(id.to_string()),
            kind: Some("function".to_string()),
            function: ToolFunction {
                name: name.to_string(),
                arguments: arguments.to_string(),
            },
        }],
        parsed: None,
    })
}

/// A successful analyst outcome; `recommendation` adds a long entry with
/// the given asset and confidence.
pub fn opinion_outcome(id: &str, recommendation: Option<(&str, f64)>) -> AnalystOutcome {
    AnalystOutcome::Opinion(AnalystOpinion {
        analyst_id: id.to_string(),
        reasoning: "scripted".to_string(),
        recommendation: recommendation.map(|(asset, confidence)| TradeDecision {
            asset: asset.to_string(),
            action: TradeAction::Buy,
            allocation_usd: 500.0,
            tp_price: Some(70000.0),
            sl_price: Some(60000.0),
            exit_plan: "tp/sl".to_string(),
            rationale: "scripted".to_string(),
            confidence: Some(confidence),
        }),
        rl_validation: None,
    })
}

/// Minimal one-instrument snapshot for exercising the pipeline.
pub fn sample_context() -> MarketContext {
    MarketContext {
        invocation: Invocation {
            count: 1,
            current_time: Utc::now(),
        },
        account: AccountDashboard::default(),
        market_data: Vec::new(),
        instructions: ContextInstructions {
            instruments: vec!["BTC".to_string()],
            note: String::new(),
        },
    }
}
