use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Account summary as reported by the exchange.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct UserState {
    pub balance: f64,
    pub total_value: f64,
    pub positions: Vec<Position>,
}

/// Raw open position from the exchange. Signed size: negative is short.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub asset: String,
    pub size: f64,
    pub entry_price: f64,
    pub liquidation_price: f64,
    pub unrealized_pnl: f64,
    pub leverage: f64,
}

/// Position joined with a fresh mark price for the prompt and dashboard.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnrichedPosition {
    pub asset: String,
    pub quantity: f64,
    pub entry_price: f64,
    pub current_price: f64,
    pub liquidation_price: f64,
    pub unrealized_pnl: f64,
    pub leverage: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrderKind {
    Limit,
    Trigger,
}

/// Resting exchange order (limit, or a TP/SL trigger).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OpenOrder {
    pub asset: String,
    pub oid: u64,
    pub is_buy: bool,
    pub size: f64,
    pub price: f64,
    pub trigger_price: Option<f64>,
    pub kind: OrderKind,
}

/// Recent execution on the account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Fill {
    pub timestamp: DateTime<Utc>,
    pub asset: String,
    pub is_buy: bool,
    pub size: f64,
    pub price: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_order_roundtrip() {
        let order = OpenOrder {
            asset: "BTC".to_string(),
            oid: 7,
            is_buy: false,
            size: 0.5,
            price: 66000.0,
            trigger_price: Some(66000.0),
            kind: OrderKind::Trigger,
        };
        let json = serde_json::to_string(&order).unwrap();
        let back: OpenOrder = serde_json::from_str(&json).unwrap();
        assert_eq!(order, back);
    }
}
