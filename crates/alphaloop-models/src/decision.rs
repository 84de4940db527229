use std::fmt;
use std::str::FromStr;

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Per-asset action recommended by a decision pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeAction {
    Buy,
    Sell,
    Hold,
}

impl TradeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeAction::Buy => "buy",
            TradeAction::Sell => "sell",
            TradeAction::Hold => "hold",
        }
    }

    pub fn is_entry(&self) -> bool {
        matches!(self, TradeAction::Buy | TradeAction::Sell)
    }
}

impl fmt::Display for TradeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TradeAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buy" | "long" => Ok(TradeAction::Buy),
            "sell" | "short" => Ok(TradeAction::Sell),
            "hold" => Ok(TradeAction::Hold),
            other => Err(format!("unknown trade action: {other}")),
        }
    }
}

impl Serialize for TradeAction {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

// Models emit the action in whatever case their prompt happened to use,
// so parsing is case-insensitive.
impl<'de> Deserialize<'de> for TradeAction {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(D::Error::custom)
    }
}

/// A structured buy/sell/hold recommendation for one asset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradeDecision {
    pub asset: String,
    pub action: TradeAction,
    pub allocation_usd: f64,
    pub tp_price: Option<f64>,
    pub sl_price: Option<f64>,
    pub exit_plan: String,
    pub rationale: String,
    pub confidence: Option<f64>,
}

impl TradeDecision {
    /// A zero-size hold for `asset`, used when a decision pass degrades.
    pub fn hold(asset: &str, rationale: &str) -> Self {
        Self {
            asset: asset.to_string(),
            action: TradeAction::Hold,
            allocation_usd: 0.0,
            tp_price: None,
            sl_price: None,
            exit_plan: String::new(),
            rationale: rationale.to_string(),
            confidence: None,
        }
    }
}

/// Output of one decision pass: free-form reasoning plus one decision per asset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DecisionSet {
    pub reasoning: String,
    pub trade_decisions: Vec<TradeDecision>,
}

impl DecisionSet {
    /// All-hold set covering every requested asset, tagged with the failure mode.
    pub fn all_hold(assets: &[String], tag: &str) -> Self {
        Self {
            reasoning: tag.to_string(),
            trade_decisions: assets.iter().map(|a| TradeDecision::hold(a, tag)).collect(),
        }
    }

    /// True when every decision is a hold whose rationale mentions a parse error.
    pub fn is_parse_error_fallback(&self) -> bool {
        !self.trade_decisions.is_empty()
            && self.trade_decisions.iter().all(|d| {
                d.action == TradeAction::Hold && d.rationale.to_lowercase().contains("parse error")
            })
    }

    /// Decode a raw LLM payload and align it 1:1 with the requested assets.
    ///
    /// Accepts decisions as objects or positional 7-tuples (the two shapes
    /// providers actually emit), fills normalization defaults, and returns
    /// `None` unless every requested asset is represented. Decisions for
    /// unknown assets are dropped. The returned set preserves request order.
    pub fn from_raw(value: &serde_json::Value, assets: &[String]) -> Option<Self> {
        let raw: RawDecisionSet = serde_json::from_value(value.clone()).ok()?;
        let decisions: Vec<TradeDecision> = raw
            .trade_decisions?
            .into_iter()
            .filter_map(|d| d.normalize())
            .collect();

        let mut aligned = Vec::with_capacity(assets.len());
        for asset in assets {
            let found = decisions.iter().find(|d| &d.asset == asset)?;
            aligned.push(found.clone());
        }

        Some(Self {
            reasoning: raw.reasoning.unwrap_or_default(),
            trade_decisions: aligned,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawDecisionSet {
    reasoning: Option<String>,
    trade_decisions: Option<Vec<RawDecision>>,
}

/// The same logical decision arrives either as an object or as a positional
/// array, depending on the provider. One decoder, explicit fallback.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawDecision {
    Object(RawDecisionObject),
    Positional(Vec<serde_json::Value>),
}

#[derive(Debug, Deserialize)]
struct RawDecisionObject {
    asset: String,
    action: TradeAction,
    allocation_usd: Option<f64>,
    tp_price: Option<f64>,
    sl_price: Option<f64>,
    exit_plan: Option<String>,
    rationale: Option<String>,
    confidence: Option<f64>,
}

impl RawDecision {
    fn normalize(self) -> Option<TradeDecision> {
        match self {
            RawDecision::Object(o) => Some(TradeDecision {
                asset: o.asset,
                action: o.action,
                allocation_usd: o.allocation_usd.unwrap_or(0.0),
                tp_price: o.tp_price,
                sl_price: o.sl_price,
                exit_plan: o.exit_plan.unwrap_or_default(),
                rationale: o.rationale.unwrap_or_default(),
                confidence: o.confidence,
            }),
            RawDecision::Positional(items) => {
                if items.len() < 7 {
                    return None;
                }
                let asset = items[0].as_str()?.to_string();
                let action: TradeAction = items[1].as_str()?.parse().ok()?;
                Some(TradeDecision {
                    asset,
                    action,
                    allocation_usd: loose_f64(&items[2]).unwrap_or(0.0),
                    tp_price: loose_f64(&items[3]),
                    sl_price: loose_f64(&items[4]),
                    exit_plan: items[5].as_str().unwrap_or_default().to_string(),
                    rationale: items[6].as_str().unwrap_or_default().to_string(),
                    confidence: None,
                })
            }
        }
    }
}

/// Numbers sometimes arrive as strings; nulls sometimes arrive as "null".
fn loose_f64(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) if s != "null" => s.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn assets() -> Vec<String> {
        vec!["BTC".to_string(), "ETH".to_string()]
    }

    #[test]
    fn action_parsing_is_case_insensitive() {
        assert_eq!("BUY".parse::<TradeAction>().unwrap(), TradeAction::Buy);
        assert_eq!("Sell".parse::<TradeAction>().unwrap(), TradeAction::Sell);
        assert_eq!("hold".parse::<TradeAction>().unwrap(), TradeAction::Hold);
        assert!("flat".parse::<TradeAction>().is_err());
    }

    #[test]
    fn action_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&TradeAction::Buy).unwrap(), "\"buy\"");
    }

    #[test]
    fn from_raw_fills_normalization_defaults() {
        let payload = json!({
            "reasoning": "momentum",
            "trade_decisions": [
                {"asset": "BTC", "action": "buy"},
                {"asset": "ETH", "action": "hold"},
            ]
        });

        let set = DecisionSet::from_raw(&payload, &assets()).unwrap();
        let btc = &set.trade_decisions[0];
        assert_eq!(btc.allocation_usd, 0.0);
        assert_eq!(btc.tp_price, None);
        assert_eq!(btc.sl_price, None);
        assert_eq!(btc.exit_plan, "");
        assert_eq!(btc.rationale, "");
    }

    #[test]
    fn from_raw_decodes_positional_tuples() {
        let payload = json!({
            "reasoning": "r",
            "trade_decisions": [
                ["BTC", "buy", "1000", 70000.0, "null", "scalp", "breakout"],
                ["ETH", "hold", 0, null, null, "", ""],
            ]
        });

        let set = DecisionSet::from_raw(&payload, &assets()).unwrap();
        assert_eq!(set.trade_decisions[0].allocation_usd, 1000.0);
        assert_eq!(set.trade_decisions[0].tp_price, Some(70000.0));
        assert_eq!(set.trade_decisions[0].sl_price, None);
        assert_eq!(set.trade_decisions[1].action, TradeAction::Hold);
    }

    #[test]
    fn from_raw_preserves_request_order() {
        let payload = json!({
            "reasoning": "r",
            "trade_decisions": [
                {"asset": "ETH", "action": "hold"},
                {"asset": "BTC", "action": "buy"},
            ]
        });

        let set = DecisionSet::from_raw(&payload, &assets()).unwrap();
        assert_eq!(set.trade_decisions[0].asset, "BTC");
        assert_eq!(set.trade_decisions[1].asset, "ETH");
    }

    #[test]
    fn from_raw_rejects_missing_asset() {
        let payload = json!({
            "reasoning": "r",
            "trade_decisions": [{"asset": "BTC", "action": "buy"}]
        });
        assert!(DecisionSet::from_raw(&payload, &assets()).is_none());
    }

    #[test]
    fn from_raw_drops_unknown_assets() {
        let payload = json!({
            "reasoning": "r",
            "trade_decisions": [
                {"asset": "BTC", "action": "buy"},
                {"asset": "ETH", "action": "hold"},
                {"asset": "DOGE", "action": "buy"},
            ]
        });

        let set = DecisionSet::from_raw(&payload, &assets()).unwrap();
        assert_eq!(set.trade_decisions.len(), 2);
    }

    #[test]
    fn all_hold_covers_every_asset() {
        let set = DecisionSet::all_hold(&assets(), "tool loop cap");
        assert_eq!(set.trade_decisions.len(), 2);
        assert!(set
            .trade_decisions
            .iter()
            .all(|d| d.action == TradeAction::Hold && d.rationale == "tool loop cap"));
    }

    #[test]
    fn parse_error_fallback_detection() {
        let set = DecisionSet::all_hold(&assets(), "Parse error");
        assert!(set.is_parse_error_fallback());
        let set = DecisionSet::all_hold(&assets(), "no signal");
        assert!(!set.is_parse_error_fallback());
    }

    #[test]
    fn roundtrip_decision_set() {
        let set = DecisionSet {
            reasoning: "r".to_string(),
            trade_decisions: vec![TradeDecision {
                asset: "BTC".to_string(),
                action: TradeAction::Sell,
                allocation_usd: 500.0,
                tp_price: Some(60000.0),
                sl_price: Some(66000.0),
                exit_plan: "tp or 4h close above ema50".to_string(),
                rationale: "lower highs".to_string(),
                confidence: Some(72.0),
            }],
        };
        let json = serde_json::to_string(&set).unwrap();
        let back: DecisionSet = serde_json::from_str(&json).unwrap();
        assert_eq!(set, back);
    }
}
