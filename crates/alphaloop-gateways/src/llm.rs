use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::audit::AuditLog;
use crate::error::GatewayError;

const MAX_ATTEMPTS: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_secs(5);

/// One turn in the provider conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain("user", content)
    }

    /// Result of executing one tool call, echoed back to the model.
    pub fn tool_reply(call_id: &str, name: &str, content: impl Into<String>) -> Self {
        Self {
            role: "tool".to_string(),
            content: Some(content.into()),
            tool_call_id: Some(call_id.to_string()),
            name: Some(name.to_string()),
            tool_calls: None,
        }
    }

    fn plain(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content.into()),
            tool_call_id: None,
            name: None,
            tool_calls: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    pub function: ToolFunction,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolFunction {
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

/// Assistant reply: final content, tool calls to execute, or a
/// provider-parsed structured payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AssistantMessage {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub parsed: Option<serde_json::Value>,
}

impl AssistantMessage {
    /// Re-encode as a conversation turn so the tool loop can continue.
    pub fn into_message(self) -> ChatMessage {
        ChatMessage {
            role: "assistant".to_string(),
            content: self.content,
            tool_call_id: None,
            name: None,
            tool_calls: (!self.tool_calls.is_empty()).then_some(self.tool_calls),
        }
    }
}

/// A single chat-completion request.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            tools: None,
            tool_choice: None,
            response_format: None,
            reasoning: None,
            provider: None,
            temperature: None,
        }
    }

    fn to_payload(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Capability the provider refused to honor for this model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityRejection {
    Tools,
    StructuredOutput,
}

/// Structured result of one chat attempt. A rejection is not an error: the
/// caller downgrades the corresponding capability and resends.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatOutcome {
    Reply(AssistantMessage),
    Rejected(CapabilityRejection),
}

/// Map a provider error body to a capability rejection.
///
/// Best-effort heuristic, not a contract: routers report unsupported tool
/// calling and structured outputs only through free-text error messages, so
/// this matches the substrings observed in practice. Anything unmatched
/// stays a hard error.
pub fn classify_rejection(status: u16, body: &str) -> Option<CapabilityRejection> {
    if !(400..500).contains(&status) {
        return None;
    }

    let err: serde_json::Value = serde_json::from_str(body).unwrap_or_default();
    let message = err["error"]["message"].as_str().unwrap_or_default().to_lowercase();
    let raw = err["error"]["metadata"]["raw"].as_str().unwrap_or_default().to_lowercase();
    let provider = err["error"]["metadata"]["provider_name"]
        .as_str()
        .unwrap_or_default()
        .to_lowercase();

    if message.contains("no endpoints found") && message.contains("tool") {
        return Some(CapabilityRejection::Tools);
    }
    if status == 422 && provider.starts_with("xai") && raw.contains("deserialize") {
        return Some(CapabilityRejection::Tools);
    }
    if matches!(status, 400 | 422) {
        let text = body.to_lowercase();
        if text.contains("response_format") || text.contains("structured") {
            return Some(CapabilityRejection::StructuredOutput);
        }
    }

    None
}

/// Chat-completion provider seam. Mockable for tests.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatOutcome, GatewayError>;
}

/// OpenRouter-style HTTP provider.
pub struct OpenRouterClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    referer: Option<String>,
    app_title: Option<String>,
    audit: Option<AuditLog>,
}

impl OpenRouterClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
        audit: Option<AuditLog>,
    ) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
            referer: None,
            app_title: None,
            audit,
        })
    }

    pub fn with_attribution(mut self, referer: Option<String>, app_title: Option<String>) -> Self {
        self.referer = referer;
        self.app_title = app_title;
        self
    }

    async fn send_once(&self, payload: &serde_json::Value) -> Result<ChatOutcome, GatewayError> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut builder = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(payload);
        if let Some(referer) = &self.referer {
            builder = builder.header("HTTP-Referer", referer);
        }
        if let Some(title) = &self.app_title {
            builder = builder.header("X-Title", title);
        }

        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if let Some(audit) = &self.audit {
            let parsed = serde_json::from_str(&body)
                .unwrap_or_else(|_| serde_json::Value::String(body.clone()));
            audit.response(payload["model"].as_str().unwrap_or_default(), &parsed);
        }

        if !status.is_success() {
            if let Some(rejection) = classify_rejection(status.as_u16(), &body) {
                warn!(status = status.as_u16(), ?rejection, "provider rejected capability");
                return Ok(ChatOutcome::Rejected(rejection));
            }
            return Err(GatewayError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let completion: ChatCompletion = serde_json::from_str(&body)?;
        let message = completion
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::Shape("completion had no choices".to_string()))?
            .message;
        Ok(ChatOutcome::Reply(message))
    }
}

#[async_trait]
impl LlmProvider for OpenRouterClient {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatOutcome, GatewayError> {
        let payload = request.to_payload();
        let mut attempt = 0;
        loop {
            attempt += 1;
            debug!(model = %request.model, attempt, "sending chat request");
            if let Some(audit) = &self.audit {
                audit.request(&request.model, attempt, &payload);
            }

            match self.send_once(&payload).await {
                Err(e) if e.is_transient() && attempt < MAX_ATTEMPTS => {
                    warn!(error = %e, attempt, "transient provider error, retrying");
                    tokio::time::sleep(RETRY_DELAY).await;
                }
                other => return other,
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: AssistantMessage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_omits_absent_capabilities() {
        let request = ChatRequest::new("m", vec![ChatMessage::system("s")]);
        let payload = request.to_payload();
        assert!(payload.get("tools").is_none());
        assert!(payload.get("response_format").is_none());
        assert!(payload.get("reasoning").is_none());
        assert_eq!(payload["model"], "m");
    }

    #[test]
    fn payload_includes_set_capabilities() {
        let mut request = ChatRequest::new("m", vec![ChatMessage::user("u")]);
        request.tools = Some(serde_json::json!([{"type": "function"}]));
        request.tool_choice = Some("auto".to_string());
        request.temperature = Some(0.3);
        let payload = request.to_payload();
        assert!(payload["tools"].is_array());
        assert_eq!(payload["tool_choice"], "auto");
        assert_eq!(payload["temperature"], 0.3);
    }

    #[test]
    fn classifies_missing_tool_endpoints() {
        let body = r#"{"error": {"message": "No endpoints found that support tool use"}}"#;
        assert_eq!(classify_rejection(404, body), Some(CapabilityRejection::Tools));
    }

    #[test]
    fn classifies_xai_tool_schema_rejection() {
        let body = r#"{"error": {"message": "bad request", "metadata": {"provider_name": "xAI", "raw": "failed to deserialize tools"}}}"#;
        assert_eq!(classify_rejection(422, body), Some(CapabilityRejection::Tools));
    }

    #[test]
    fn classifies_structured_output_rejection() {
        let body = r#"{"error": {"message": "response_format is not supported for this model"}}"#;
        assert_eq!(
            classify_rejection(400, body),
            Some(CapabilityRejection::StructuredOutput)
        );
    }

    #[test]
    fn server_errors_are_not_rejections() {
        let body = r#"{"error": {"message": "response_format exploded"}}"#;
        assert_eq!(classify_rejection(502, body), None);
    }

    #[test]
    fn unrelated_client_errors_are_not_rejections() {
        let body = r#"{"error": {"message": "invalid api key"}}"#;
        assert_eq!(classify_rejection(401, body), None);
    }

    #[test]
    fn assistant_message_reencodes_tool_calls() {
        let msg = AssistantMessage {
            content: None,
            tool_calls: vec![ToolCall {
                id: Some("c1".to_string()),
                kind: Some("function".to_string()),
                function: ToolFunction {
                    name: "fetch_indicator".to_string(),
                    arguments: "{}".to_string(),
                },
            }],
            parsed: None,
        };
        let turn = msg.into_message();
        assert_eq!(turn.role, "assistant");
        assert_eq!(turn.tool_calls.as_ref().map(|t| t.len()), Some(1));
    }
}
