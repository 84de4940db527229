pub mod config;
pub mod context;
pub mod decision;
pub mod ensemble;
pub mod journal;
pub mod market;
pub mod proposal;
pub mod trade;

pub use config::{
    default_analysts, interval_seconds, AnalystConfig, AppConfig, DecisionSource, GatewayConfig,
    JudgePolicy, LlmConfig, PathsConfig, TradingConfig, TradingMode,
};
pub use context::{
    AccountDashboard, ContextInstructions, IntradaySeries, IntradaySnapshot, Invocation,
    LongTermSnapshot, MarketContext, MarketSection,
};
pub use decision::{DecisionSet, TradeAction, TradeDecision};
pub use ensemble::{AnalystOpinion, AnalystOutcome, FinalAction, JudgeVerdict, RlValidation};
pub use journal::{JournalEvent, JournalRecord, TradeRecord};
pub use market::{EnrichedPosition, Fill, OpenOrder, OrderKind, Position, UserState};
pub use proposal::{ProposalState, TradeProposal};
pub use trade::ActiveTrade;
