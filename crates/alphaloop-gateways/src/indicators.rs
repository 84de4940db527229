use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::GatewayError;

/// Indicators pulled for every asset on the intraday and configured
/// timeframes.
const INTRADAY_INTERVAL: &str = "5m";

/// Tool-call arguments for a single indicator lookup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndicatorQuery {
    pub indicator: String,
    pub symbol: String,
    pub interval: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backtrack: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub other_params: Option<serde_json::Map<String, serde_json::Value>>,
}

/// One indicator payload as the provider shipped it.
///
/// The same logical value arrives as a bare number, a series, or an object
/// (MACD et al.) depending on indicator and backtrack settings. This is the
/// single decoder for all of those shapes; anything else falls through to
/// the `Other` variant and reads as empty.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum IndicatorValue {
    Scalar(f64),
    Many(Vec<serde_json::Value>),
    Object(serde_json::Map<String, serde_json::Value>),
    Other(serde_json::Value),
}

impl IndicatorValue {
    /// Most recent reading, if any.
    pub fn latest(&self) -> Option<f64> {
        match self {
            IndicatorValue::Scalar(v) => Some(*v),
            IndicatorValue::Many(items) => items.last().and_then(scalar_of),
            IndicatorValue::Object(obj) => object_scalar(obj),
            IndicatorValue::Other(_) => None,
        }
    }

    /// Full series view; a scalar reads as a one-element series.
    pub fn series(&self) -> Vec<f64> {
        match self {
            IndicatorValue::Scalar(v) => vec![*v],
            IndicatorValue::Many(items) => items.iter().filter_map(scalar_of).collect(),
            IndicatorValue::Object(obj) => object_scalar(obj).into_iter().collect(),
            IndicatorValue::Other(_) => Vec::new(),
        }
    }
}

fn scalar_of(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::Object(obj) => object_scalar(obj),
        _ => None,
    }
}

fn object_scalar(obj: &serde_json::Map<String, serde_json::Value>) -> Option<f64> {
    obj.get("valueMACD")
        .or_else(|| obj.get("value"))
        .and_then(|v| v.as_f64())
}

/// `timeframe -> indicator name -> value` for one asset.
pub type IndicatorBundle = HashMap<String, HashMap<String, IndicatorValue>>;

/// Technical-indicator source seam.
#[async_trait]
pub trait IndicatorSource: Send + Sync {
    /// Ad hoc single-indicator lookup, driven by LLM tool calls.
    async fn fetch_indicator(
        &self,
        query: &IndicatorQuery,
    ) -> Result<serde_json::Value, GatewayError>;

    /// Bulk fetch of the standard indicator set for one asset on the
    /// intraday timeframe plus `interval`.
    async fn fetch_asset_indicators(
        &self,
        asset: &str,
        interval: &str,
    ) -> Result<IndicatorBundle, GatewayError>;
}

/// TAAPI-style HTTP indicator client.
///
/// The upstream free tier allows one request per 15 seconds, so bulk
/// results are memoized in a moka cache and all outbound requests are
/// spaced by a fixed minimum interval.
pub struct TaapiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    cache: Cache<String, IndicatorBundle>,
    min_spacing: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl TaapiClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
        cache_ttl: Duration,
        min_spacing: Duration,
    ) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
            cache: Cache::builder()
                .max_capacity(256)
                .time_to_live(cache_ttl)
                .build(),
            min_spacing,
            last_request: Mutex::new(None),
        })
    }

    /// Block until the rate-limit spacing allows another request.
    async fn pace(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(at) = *last {
            let elapsed = at.elapsed();
            if elapsed < self.min_spacing {
                let wait = self.min_spacing - elapsed;
                info!(wait_ms = wait.as_millis() as u64, "pacing indicator request");
                tokio::time::sleep(wait).await;
            }
        }
        *last = Some(Instant::now());
    }

    async fn bulk(
        &self,
        symbol: &str,
        interval: &str,
    ) -> Result<HashMap<String, IndicatorValue>, GatewayError> {
        self.pace().await;

        let construct = serde_json::json!({
            "secret": self.api_key,
            "construct": {
                "exchange": "binance",
                "symbol": symbol,
                "interval": interval,
                "indicators": [
                    {"id": "ema20", "indicator": "ema", "period": 20},
                    {"id": "ema50", "indicator": "ema", "period": 50},
                    {"id": "rsi7", "indicator": "rsi", "period": 7},
                    {"id": "rsi14", "indicator": "rsi", "period": 14},
                    {"id": "macd", "indicator": "macd"},
                    {"id": "atr3", "indicator": "atr", "period": 3},
                    {"id": "atr14", "indicator": "atr", "period": 14},
                ],
            },
        });

        let response = self
            .http
            .post(format!("{}/bulk", self.base_url))
            .json(&construct)
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

        let parsed: BulkResponse = serde_json::from_str(&body)?;
        Ok(parsed
            .data
            .into_iter()
            .map(|item| (item.id, item.result))
            .collect())
    }
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    #[serde(default)]
    data: Vec<BulkItem>,
}

#[derive(Debug, Deserialize)]
struct BulkItem {
    id: String,
    result: IndicatorValue,
}

#[async_trait]
impl IndicatorSource for TaapiClient {
    async fn fetch_indicator(
        &self,
        query: &IndicatorQuery,
    ) -> Result<serde_json::Value, GatewayError> {
        self.pace().await;

        let mut params: Vec<(String, String)> = vec![
            ("secret".to_string(), self.api_key.clone()),
            ("exchange".to_string(), "binance".to_string()),
            ("symbol".to_string(), query.symbol.clone()),
            ("interval".to_string(), query.interval.clone()),
        ];
        if let Some(period) = query.period {
            params.push(("period".to_string(), period.to_string()));
        }
        if let Some(backtrack) = query.backtrack {
            params.push(("backtrack".to_string(), backtrack.to_string()));
        }
        if let Some(extra) = &query.other_params {
            for (key, value) in extra {
                let rendered = match value {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                params.push((key.clone(), rendered));
            }
        }

        debug!(indicator = %query.indicator, symbol = %query.symbol, "fetching indicator");
        let response = self
            .http
            .get(format!("{}/{}", self.base_url, query.indicator))
            .query(&params)
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
        Ok(serde_json::from_str(&body)?)
    }

    async fn fetch_asset_indicators(
        &self,
        asset: &str,
        interval: &str,
    ) -> Result<IndicatorBundle, GatewayError> {
        let key = format!("{asset}:{interval}");
        if let Some(cached) = self.cache.get(&key).await {
            return Ok(cached);
        }

        let symbol = format!("{asset}/USDT");
        let mut bundle: IndicatorBundle = HashMap::new();
        bundle.insert(
            INTRADAY_INTERVAL.to_string(),
            self.bulk(&symbol, INTRADAY_INTERVAL).await?,
        );
        if interval != INTRADAY_INTERVAL {
            bundle.insert(interval.to_string(), self.bulk(&symbol, interval).await?);
        }

        self.cache.insert(key, bundle.clone()).await;
        Ok(bundle)
    }
}
