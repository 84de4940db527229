//! Outward-facing gateways: LLM chat completions, technical indicators,
//! the exchange, and the on-disk journal and audit trails.
//!
//! Each external system sits behind a trait so the decision pipeline and
//! its tests never touch the network directly.

pub mod audit;
pub mod error;
pub mod exchange;
pub mod indicators;
pub mod journal;
pub mod llm;

pub use audit::AuditLog;
pub use error::GatewayError;
pub use exchange::{ExchangeGateway, HyperliquidClient, OrderResult};
pub use indicators::{
    IndicatorBundle, IndicatorQuery, IndicatorSource, IndicatorValue, TaapiClient,
};
pub use journal::Journal;
pub use llm::{
    AssistantMessage, CapabilityRejection, ChatMessage, ChatOutcome, ChatRequest, LlmProvider,
    OpenRouterClient, ToolCall, ToolFunction,
};
