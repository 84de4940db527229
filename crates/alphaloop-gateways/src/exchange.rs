use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, warn};

use alphaloop_models::{Fill, OpenOrder, OrderKind, Position, UserState};

use crate::error::GatewayError;

/// Raw exchange response to an order placement.
///
/// Venues differ on the exact envelope, so the payload is kept as-is and
/// the interesting parts are extracted lazily.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderResult(pub serde_json::Value);

impl OrderResult {
    /// Order ids of every resting or filled leg in the response.
    pub fn order_ids(&self) -> Vec<u64> {
        let statuses = &self.0["response"]["data"]["statuses"];
        let Some(items) = statuses.as_array() else {
            return Vec::new();
        };
        items
            .iter()
            .filter_map(|status| {
                status["resting"]["oid"]
                    .as_u64()
                    .or_else(|| status["filled"]["oid"].as_u64())
            })
            .collect()
    }

    /// First error string the venue reported, if any leg was rejected.
    pub fn first_error(&self) -> Option<String> {
        let statuses = self.0["response"]["data"]["statuses"].as_array()?;
        statuses
            .iter()
            .find_map(|status| status["error"].as_str().map(str::to_string))
    }

    /// Average fill price of the first filled leg.
    pub fn fill_price(&self) -> Option<f64> {
        let statuses = self.0["response"]["data"]["statuses"].as_array()?;
        statuses
            .iter()
            .find_map(|status| status["filled"]["avgPx"].as_str())
            .and_then(|px| px.parse().ok())
    }
}

/// Perpetual-futures venue seam: account reads, market reads, and order
/// placement.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    async fn user_state(&self) -> Result<UserState, GatewayError>;
    async fn current_price(&self, asset: &str) -> Result<f64, GatewayError>;
    async fn open_orders(&self) -> Result<Vec<OpenOrder>, GatewayError>;
    async fn recent_fills(&self, limit: usize) -> Result<Vec<Fill>, GatewayError>;
    async fn open_interest(&self, asset: &str) -> Result<Option<f64>, GatewayError>;
    async fn funding_rate(&self, asset: &str) -> Result<Option<f64>, GatewayError>;

    async fn place_buy_order(&self, asset: &str, size: f64) -> Result<OrderResult, GatewayError>;
    async fn place_sell_order(&self, asset: &str, size: f64) -> Result<OrderResult, GatewayError>;
    async fn place_take_profit(
        &self,
        asset: &str,
        is_buy: bool,
        size: f64,
        trigger_price: f64,
    ) -> Result<OrderResult, GatewayError>;
    async fn place_stop_loss(
        &self,
        asset: &str,
        is_buy: bool,
        size: f64,
        trigger_price: f64,
    ) -> Result<OrderResult, GatewayError>;
    async fn cancel_all_orders(&self, asset: &str) -> Result<usize, GatewayError>;
}

/// Hyperliquid HTTP client.
///
/// Reads go through the public `/info` endpoint; placements go through a
/// local signing agent that exposes the same JSON action shapes.
pub struct HyperliquidClient {
    http: reqwest::Client,
    info_url: String,
    exchange_url: String,
    account_address: String,
}

impl HyperliquidClient {
    pub fn new(
        base_url: impl Into<String>,
        exchange_url: impl Into<String>,
        account_address: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let base = base_url.into();
        Ok(Self {
            http: reqwest::Client::builder().timeout(timeout).build()?,
            info_url: format!("{base}/info"),
            exchange_url: exchange_url.into(),
            account_address: account_address.into(),
        })
    }

    async fn info(&self, request: serde_json::Value) -> Result<serde_json::Value, GatewayError> {
        let response = self.http.post(&self.info_url).json(&request).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(GatewayError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(serde_json::from_str(&body)?)
    }

    async fn action(&self, action: serde_json::Value) -> Result<OrderResult, GatewayError> {
        debug!(?action, "submitting exchange action");
        let response = self
            .http
            .post(&self.exchange_url)
            .json(&serde_json::json!({ "action": action }))
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(GatewayError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let result = OrderResult(serde_json::from_str(&body)?);
        if let Some(error) = result.first_error() {
            return Err(GatewayError::Exchange(error));
        }
        Ok(result)
    }

    fn order_action(
        asset: &str,
        is_buy: bool,
        size: f64,
        order_type: serde_json::Value,
        trigger_price: Option<f64>,
    ) -> serde_json::Value {
        serde_json::json!({
            "type": "order",
            "orders": [{
                "coin": asset,
                "isBuy": is_buy,
                "sz": size,
                "limitPx": trigger_price,
                "orderType": order_type,
                "reduceOnly": trigger_price.is_some(),
            }],
        })
    }
}

fn parse_f64(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[async_trait]
impl ExchangeGateway for HyperliquidClient {
    async fn user_state(&self) -> Result<UserState, GatewayError> {
        let raw = self
            .info(serde_json::json!({
                "type": "clearinghouseState",
                "user": self.account_address,
            }))
            .await?;

        let total_value = parse_f64(&raw["marginSummary"]["accountValue"])
            .ok_or_else(|| GatewayError::Shape("missing accountValue".into()))?;
        let balance = parse_f64(&raw["withdrawable"]).unwrap_or(total_value);

        let mut positions = Vec::new();
        if let Some(entries) = raw["assetPositions"].as_array() {
            for entry in entries {
                let pos = &entry["position"];
                let Some(asset) = pos["coin"].as_str() else {
                    continue;
                };
                let size = parse_f64(&pos["szi"]).unwrap_or(0.0);
                if size == 0.0 {
                    continue;
                }
                positions.push(Position {
                    asset: asset.to_string(),
                    size,
                    entry_price: parse_f64(&pos["entryPx"]).unwrap_or(0.0),
                    liquidation_price: parse_f64(&pos["liquidationPx"]).unwrap_or(0.0),
                    unrealized_pnl: parse_f64(&pos["unrealizedPnl"]).unwrap_or(0.0),
                    leverage: parse_f64(&pos["leverage"]["value"]).unwrap_or(1.0),
                });
            }
        }

        Ok(UserState {
            balance,
            total_value,
            positions,
        })
    }

    async fn current_price(&self, asset: &str) -> Result<f64, GatewayError> {
        let mids = self.info(serde_json::json!({ "type": "allMids" })).await?;
        parse_f64(&mids[asset])
            .ok_or_else(|| GatewayError::Shape(format!("no mid price for {asset}")))
    }

    async fn open_orders(&self) -> Result<Vec<OpenOrder>, GatewayError> {
        let raw = self
            .info(serde_json::json!({
                "type": "frontendOpenOrders",
                "user": self.account_address,
            }))
            .await?;
        let Some(items) = raw.as_array() else {
            return Ok(Vec::new());
        };

        let mut orders = Vec::new();
        for item in items {
            let Some(asset) = item["coin"].as_str() else {
                continue;
            };
            let trigger_price = parse_f64(&item["triggerPx"]).filter(|px| *px > 0.0);
            orders.push(OpenOrder {
                asset: asset.to_string(),
                oid: item["oid"].as_u64().unwrap_or(0),
                is_buy: item["side"].as_str() == Some("B"),
                size: parse_f64(&item["sz"]).unwrap_or(0.0),
                price: parse_f64(&item["limitPx"]).unwrap_or(0.0),
                trigger_price,
                kind: if trigger_price.is_some() {
                    OrderKind::Trigger
                } else {
                    OrderKind::Limit
                },
            });
        }
        Ok(orders)
    }

    async fn recent_fills(&self, limit: usize) -> Result<Vec<Fill>, GatewayError> {
        let raw = self
            .info(serde_json::json!({
                "type": "userFills",
                "user": self.account_address,
            }))
            .await?;
        let Some(items) = raw.as_array() else {
            return Ok(Vec::new());
        };

        let mut fills = Vec::new();
        for item in items.iter().take(limit) {
            let Some(asset) = item["coin"].as_str() else {
                continue;
            };
            let timestamp = item["time"]
                .as_i64()
                .and_then(DateTime::from_timestamp_millis)
                .unwrap_or_else(Utc::now);
            fills.push(Fill {
                timestamp,
                asset: asset.to_string(),
                is_buy: item["side"].as_str() == Some("B"),
                size: parse_f64(&item["sz"]).unwrap_or(0.0),
                price: parse_f64(&item["px"]).unwrap_or(0.0),
            });
        }
        Ok(fills)
    }

    async fn open_interest(&self, asset: &str) -> Result<Option<f64>, GatewayError> {
        let raw = self
            .info(serde_json::json!({ "type": "metaAndAssetCtxs" }))
            .await?;
        let universe = raw[0]["universe"].as_array().cloned().unwrap_or_default();
        let contexts = raw[1].as_array().cloned().unwrap_or_default();
        for (meta, ctx) in universe.iter().zip(contexts.iter()) {
            if meta["name"].as_str() == Some(asset) {
                return Ok(parse_f64(&ctx["openInterest"]));
            }
        }
        warn!(asset, "asset missing from venue universe");
        Ok(None)
    }

    async fn funding_rate(&self, asset: &str) -> Result<Option<f64>, GatewayError> {
        let raw = self
            .info(serde_json::json!({ "type": "metaAndAssetCtxs" }))
            .await?;
        let universe = raw[0]["universe"].as_array().cloned().unwrap_or_default();
        let contexts = raw[1].as_array().cloned().unwrap_or_default();
        for (meta, ctx) in universe.iter().zip(contexts.iter()) {
            if meta["name"].as_str() == Some(asset) {
                return Ok(parse_f64(&ctx["funding"]));
            }
        }
        Ok(None)
    }

    async fn place_buy_order(&self, asset: &str, size: f64) -> Result<OrderResult, GatewayError> {
        let action = Self::order_action(
            asset,
            true,
            size,
            serde_json::json!({"market": {}}),
            None,
        );
        self.action(action).await
    }

    async fn place_sell_order(&self, asset: &str, size: f64) -> Result<OrderResult, GatewayError> {
        let action = Self::order_action(
            asset,
            false,
            size,
            serde_json::json!({"market": {}}),
            None,
        );
        self.action(action).await
    }

    async fn place_take_profit(
        &self,
        asset: &str,
        is_buy: bool,
        size: f64,
        trigger_price: f64,
    ) -> Result<OrderResult, GatewayError> {
        let order_type = serde_json::json!({
            "trigger": {"isMarket": true, "triggerPx": trigger_price, "tpsl": "tp"},
        });
        self.action(Self::order_action(asset, is_buy, size, order_type, Some(trigger_price)))
            .await
    }

    async fn place_stop_loss(
        &self,
        asset: &str,
        is_buy: bool,
        size: f64,
        trigger_price: f64,
    ) -> Result<OrderResult, GatewayError> {
        let order_type = serde_json::json!({
            "trigger": {"isMarket": true, "triggerPx": trigger_price, "tpsl": "sl"},
        });
        self.action(Self::order_action(asset, is_buy, size, order_type, Some(trigger_price)))
            .await
    }

    async fn cancel_all_orders(&self, asset: &str) -> Result<usize, GatewayError> {
        let orders = self.open_orders().await?;
        let oids: Vec<u64> = orders
            .into_iter()
            .filter(|order| order.asset == asset)
            .map(|order| order.oid)
            .collect();
        if oids.is_empty() {
            return Ok(0);
        }
        let cancels: Vec<serde_json::Value> = oids
            .iter()
            .map(|oid| serde_json::json!({"coin": asset, "oid": oid}))
            .collect();
        self.action(serde_json::json!({"type": "cancel", "cancels": cancels}))
            .await?;
        Ok(oids.len())
    }
}
