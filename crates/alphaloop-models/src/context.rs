use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::market::{EnrichedPosition, Fill, OpenOrder};
use crate::trade::ActiveTrade;

/// Immutable per-cycle snapshot serialized into the decision prompt.
/// Built once per cycle and discarded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarketContext {
    pub invocation: Invocation,
    pub account: AccountDashboard,
    pub market_data: Vec<MarketSection>,
    pub instructions: ContextInstructions,
}

impl MarketContext {
    /// Render the snapshot as the user prompt body.
    pub fn to_prompt(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Invocation {
    pub count: u64,
    pub current_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AccountDashboard {
    pub total_return_pct: f64,
    pub balance: f64,
    pub account_value: f64,
    pub risk_metric: f64,
    pub positions: Vec<EnrichedPosition>,
    pub active_trades: Vec<ActiveTrade>,
    pub open_orders: Vec<OpenOrder>,
    pub recent_journal: Vec<serde_json::Value>,
    pub recent_fills: Vec<Fill>,
}

/// Latest-value and short-series view of one asset's indicators.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct MarketSection {
    pub asset: String,
    pub current_price: f64,
    pub intraday: IntradaySnapshot,
    pub long_term: LongTermSnapshot,
    pub open_interest: Option<f64>,
    pub funding_rate: Option<f64>,
    pub funding_annualized_pct: Option<f64>,
    pub recent_mid_prices: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct IntradaySnapshot {
    pub ema20: Option<f64>,
    pub macd: Option<f64>,
    pub rsi7: Option<f64>,
    pub rsi14: Option<f64>,
    pub series: IntradaySeries,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct IntradaySeries {
    pub ema20: Vec<f64>,
    pub macd: Vec<f64>,
    pub rsi7: Vec<f64>,
    pub rsi14: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct LongTermSnapshot {
    pub ema20: Option<f64>,
    pub ema50: Option<f64>,
    pub atr3: Option<f64>,
    pub atr14: Option<f64>,
    pub macd_series: Vec<f64>,
    pub rsi_series: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContextInstructions {
    pub instruments: Vec<String>,
    pub note: String,
}
