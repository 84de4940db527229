//! In-memory exchange double for engine tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use alphaloop_gateways::{ExchangeGateway, GatewayError, OrderResult};
use alphaloop_models::{Fill, OpenOrder, UserState};

/// Scripted venue: fixed prices, a user state you can set, and failure
/// switches for the protective legs.
pub struct MockExchange {
    pub prices: HashMap<String, f64>,
    pub state: Mutex<UserState>,
    pub orders: Mutex<Vec<OpenOrder>>,
    pub fail_tp: AtomicBool,
    pub fail_sl: AtomicBool,
    pub fail_entry: AtomicBool,
    next_oid: AtomicU64,
    pub placed: Mutex<Vec<String>>,
}

impl MockExchange {
    pub fn new(prices: &[(&str, f64)]) -> Self {
        Self {
            prices: prices.iter().map(|(a, p)| (a.to_string(), *p)).collect(),
            state: Mutex::new(UserState {
                balance: 10_000.0,
                total_value: 10_000.0,
                positions: Vec::new(),
            }),
            orders: Mutex::new(Vec::new()),
            fail_tp: AtomicBool::new(false),
            fail_sl: AtomicBool::new(false),
            fail_entry: AtomicBool::new(false),
            next_oid: AtomicU64::new(100),
            placed: Mutex::new(Vec::new()),
        }
    }

    fn filled(&self, price: f64) -> OrderResult {
        let oid = self.next_oid.fetch_add(1, Ordering::SeqCst);
        OrderResult(serde_json::json!({
            "status": "ok",
            "response": {"data": {"statuses": [
                {"filled": {"oid": oid, "avgPx": price.to_string()}}
            ]}}
        }))
    }

    fn resting(&self) -> OrderResult {
        let oid = self.next_oid.fetch_add(1, Ordering::SeqCst);
        OrderResult(serde_json::json!({
            "status": "ok",
            "response": {"data": {"statuses": [{"resting": {"oid": oid}}]}}
        }))
    }

    fn record(&self, entry: String) {
        self.placed.lock().unwrap().push(entry);
    }

    pub fn placements(&self) -> Vec<String> {
        self.placed.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExchangeGateway for MockExchange {
    async fn user_state(&self) -> Result<UserState, GatewayError> {
        Ok(self.state.lock().unwrap().clone())
    }

    async fn current_price(&self, asset: &str) -> Result<f64, GatewayError> {
        self.prices
            .get(asset)
            .copied()
            .ok_or_else(|| GatewayError::Shape(format!("no mid price for {asset}")))
    }

    async fn open_orders(&self) -> Result<Vec<OpenOrder>, GatewayError> {
        Ok(self.orders.lock().unwrap().clone())
    }

    async fn recent_fills(&self, _limit: usize) -> Result<Vec<Fill>, GatewayError> {
        Ok(Vec::new())
    }

    async fn open_interest(&self, _asset: &str) -> Result<Option<f64>, GatewayError> {
        Ok(Some(1_000_000.0))
    }

    async fn funding_rate(&self, _asset: &str) -> Result<Option<f64>, GatewayError> {
        Ok(Some(0.0000125))
    }

    async fn place_buy_order(&self, asset: &str, size: f64) -> Result<OrderResult, GatewayError> {
        if self.fail_entry.load(Ordering::SeqCst) {
            return Err(GatewayError::Exchange("insufficient margin".to_string()));
        }
        self.record(format!("buy {asset} {size}"));
        let price = self.prices.get(asset).copied().unwrap_or(0.0);
        Ok(self.filled(price))
    }

    async fn place_sell_order(&self, asset: &str, size: f64) -> Result<OrderResult, GatewayError> {
        if self.fail_entry.load(Ordering::SeqCst) {
            return Err(GatewayError::Exchange("insufficient margin".to_string()));
        }
        self.record(format!("sell {asset} {size}"));
        let price = self.prices.get(asset).copied().unwrap_or(0.0);
        Ok(self.filled(price))
    }

    async fn place_take_profit(
        &self,
        asset: &str,
        is_buy: bool,
        size: f64,
        trigger_price: f64,
    ) -> Result<OrderResult, GatewayError> {
        if self.fail_tp.load(Ordering::SeqCst) {
            return Err(GatewayError::Exchange("tp rejected".to_string()));
        }
        self.record(format!("tp {asset} buy={is_buy} {size} @{trigger_price}"));
        Ok(self.resting())
    }

    async fn place_stop_loss(
        &self,
        asset: &str,
        is_buy: bool,
        size: f64,
        trigger_price: f64,
    ) -> Result<OrderResult, GatewayError> {
        if self.fail_sl.load(Ordering::SeqCst) {
            return Err(GatewayError::Exchange("sl rejected".to_string()));
        }
        self.record(format!("sl {asset} buy={is_buy} {size} @{trigger_price}"));
        Ok(self.resting())
    }

    async fn cancel_all_orders(&self, asset: &str) -> Result<usize, GatewayError> {
        self.record(format!("cancel {asset}"));
        Ok(0)
    }
}
