use serde::{Deserialize, Serialize};

/// Top-level configuration, loaded from TOML.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub trading: TradingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub judge: JudgePolicy,
    #[serde(default)]
    pub analysts: Vec<AnalystConfig>,
    #[serde(default)]
    pub gateways: GatewayConfig,
    #[serde(default)]
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TradingMode {
    /// Decisions are executed immediately.
    Auto,
    /// Entry decisions become proposals awaiting operator approval.
    Manual,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    /// Single-model tool-calling synthesizer.
    Synthesizer,
    /// Multi-persona analyst ensemble arbitrated by the judge.
    Ensemble,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradingConfig {
    pub mode: TradingMode,
    pub instruments: Vec<String>,
    /// Analysis interval, e.g. "5m", "1h", "1d".
    pub interval: String,
    pub decision_source: DecisionSource,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            mode: TradingMode::Manual,
            instruments: vec!["BTC".to_string()],
            interval: "5m".to_string(),
            decision_source: DecisionSource::Synthesizer,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LlmConfig {
    pub model: String,
    /// Fast model used by the strict-schema repair pass.
    pub sanitizer_model: String,
    pub reasoning_enabled: bool,
    pub reasoning_effort: String,
    /// Capability toggles; the synthesizer also downgrades these at runtime
    /// when the provider rejects a request.
    pub allow_tools: bool,
    pub allow_structured: bool,
    /// Opaque provider routing hints forwarded verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_hints: Option<serde_json::Value>,
    pub request_timeout_seconds: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "deepseek/deepseek-chat-v3.1".to_string(),
            sanitizer_model: "openai/gpt-5".to_string(),
            reasoning_enabled: false,
            reasoning_effort: "high".to_string(),
            allow_tools: true,
            allow_structured: true,
            provider_hints: None,
            request_timeout_seconds: 60,
        }
    }
}

/// Arbitration policy. The instrument allow-list is a policy parameter, not
/// an architectural constraint; `None` means every configured instrument is
/// eligible.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JudgePolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instruments: Option<Vec<String>>,
    /// Minimum winner confidence before the judge may endorse an entry.
    pub min_confidence: f64,
}

impl Default for JudgePolicy {
    fn default() -> Self {
        Self {
            instruments: None,
            min_confidence: 70.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalystConfig {
    pub id: String,
    pub name: String,
    pub enabled: bool,
}

pub fn default_analysts() -> Vec<AnalystConfig> {
    ["technical", "ml", "risk", "quant"]
        .iter()
        .map(|id| AnalystConfig {
            id: id.to_string(),
            name: format!("{id} analyst"),
            enabled: true,
        })
        .collect()
}

/// External endpoints. API keys are never stored in the file: the config
/// names the environment variables that hold them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewayConfig {
    pub openrouter_base_url: String,
    pub openrouter_api_key_env: String,
    pub taapi_base_url: String,
    pub taapi_api_key_env: String,
    /// Minimum spacing between indicator requests, per the provider's
    /// rate limit.
    pub taapi_min_spacing_seconds: u64,
    pub hyperliquid_info_url: String,
    /// Local signing agent that forwards order actions to the venue.
    pub hyperliquid_exchange_url: String,
    pub account_address: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            openrouter_base_url: "https://openrouter.ai/api/v1".to_string(),
            openrouter_api_key_env: "OPENROUTER_API_KEY".to_string(),
            taapi_base_url: "https://api.taapi.io".to_string(),
            taapi_api_key_env: "TAAPI_API_KEY".to_string(),
            taapi_min_spacing_seconds: 15,
            hyperliquid_info_url: "https://api.hyperliquid.xyz".to_string(),
            hyperliquid_exchange_url: "http://127.0.0.1:3001/exchange".to_string(),
            account_address: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PathsConfig {
    pub journal: String,
    pub audit_log: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            journal: "data/journal.jsonl".to_string(),
            audit_log: "data/llm_requests.jsonl".to_string(),
        }
    }
}

/// Parse an interval string ("5m", "1h", "2d") into seconds. Unknown shapes
/// fall back to five minutes.
pub fn interval_seconds(interval: &str) -> u64 {
    let (digits, unit) = interval.split_at(interval.len().saturating_sub(1));
    let n: u64 = match digits.parse() {
        Ok(n) => n,
        Err(_) => return 300,
    };
    match unit {
        "m" => n * 60,
        "h" => n * 3600,
        "d" => n * 86_400,
        _ => 300,
    }
}
