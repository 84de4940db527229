use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use alphaloop_agents::{AnalystEnsemble, DecisionSynthesizer, Judge};
use alphaloop_gateways::{ExchangeGateway, IndicatorSource, IndicatorValue, Journal};
use alphaloop_models::{
    interval_seconds, AccountDashboard, AppConfig, ContextInstructions, DecisionSet,
    DecisionSource, EnrichedPosition, FinalAction, IntradaySeries, IntradaySnapshot, Invocation,
    JournalEvent, JournalRecord, JudgeVerdict, LongTermSnapshot, MarketContext, MarketSection,
    TradeDecision, TradeProposal, TradingMode,
};

use crate::error::EngineError;
use crate::ledger::ProposalLedger;
use crate::risk::risk_metric;
use crate::state::{CyclePhase, StateHub};

/// Mid prices kept per asset for the prompt.
const PRICE_HISTORY_LEN: usize = 60;
/// Journal lines surfaced to the model each cycle.
const JOURNAL_TAIL: usize = 20;
/// Hourly funding, annualized.
const FUNDING_PERIODS_PER_YEAR: f64 = 24.0 * 365.0;

const BASE_NOTE: &str =
    "Emit exactly one decision per instrument. Reply with the JSON object only.";
const STRICT_NOTE: &str = "Emit exactly one decision per instrument. Your previous reply could \
     not be parsed; respond with ONLY the JSON object, no prose, no markdown fences.";

/// The decision loop: snapshot, reconcile, decide, dispatch, sleep.
///
/// One cycle failing never stops the loop; the error is logged and the
/// next tick starts fresh.
pub struct CycleOrchestrator {
    config: AppConfig,
    hub: Arc<StateHub>,
    exchange: Arc<dyn ExchangeGateway>,
    indicators: Arc<dyn IndicatorSource>,
    journal: Journal,
    synthesizer: DecisionSynthesizer,
    ensemble: AnalystEnsemble,
    judge: Judge,
    ledger: Arc<ProposalLedger>,
    cancel: CancellationToken,

    baseline_value: Option<f64>,
    last_value: Option<f64>,
    cycle_returns: Vec<f64>,
    price_history: HashMap<String, VecDeque<f64>>,
}

impl CycleOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: AppConfig,
        hub: Arc<StateHub>,
        exchange: Arc<dyn ExchangeGateway>,
        indicators: Arc<dyn IndicatorSource>,
        journal: Journal,
        synthesizer: DecisionSynthesizer,
        ensemble: AnalystEnsemble,
        judge: Judge,
        ledger: Arc<ProposalLedger>,
    ) -> Self {
        Self {
            config,
            hub,
            exchange,
            indicators,
            journal,
            synthesizer,
            ensemble,
            judge,
            ledger,
            cancel: CancellationToken::new(),
            baseline_value: None,
            last_value: None,
            cycle_returns: Vec::new(),
            price_history: HashMap::new(),
        }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run until cancelled, then drain in-flight executions.
    pub async fn run(&mut self) {
        let tick = Duration::from_secs(interval_seconds(&self.config.trading.interval));
        info!(
            interval = %self.config.trading.interval,
            mode = ?self.config.trading.mode,
            source = ?self.config.trading.decision_source,
            "engine starting"
        );

        loop {
            if let Err(e) = self.run_cycle().await {
                error!(error = %e, "cycle failed");
            }

            self.set_phase(CyclePhase::Sleep);
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(tick) => {}
            }
        }

        info!("engine stopping, draining in-flight executions");
        self.ledger.drain().await;
        self.set_phase(CyclePhase::Idle);
    }

    fn set_phase(&self, phase: CyclePhase) {
        self.hub.with(|shared| shared.phase = phase);
    }

    /// One full decision cycle. A failure is recorded on the shared state
    /// as the system-error flag so watch subscribers see it; the next
    /// clean cycle clears the flag.
    pub async fn run_cycle(&mut self) -> Result<(), EngineError> {
        let result = self.cycle().await;
        match &result {
            Ok(()) => self.hub.with(|shared| shared.system_error = None),
            Err(e) => {
                let message = e.to_string();
                self.hub.with(|shared| shared.system_error = Some(message));
            }
        }
        result
    }

    async fn cycle(&mut self) -> Result<(), EngineError> {
        let cycle = self.hub.with(|shared| {
            shared.cycle_count += 1;
            shared.phase = CyclePhase::FetchState;
            shared.cycle_count
        });
        info!(cycle, "cycle starting");

        let user_state = self.exchange.user_state().await?;
        let instruments = self.config.trading.instruments.clone();
        let mut prices = HashMap::new();
        for asset in &instruments {
            let price = self.exchange.current_price(asset).await?;
            prices.insert(asset.clone(), price);
            let history = self
                .price_history
                .entry(asset.clone())
                .or_insert_with(VecDeque::new);
            history.push_back(price);
            while history.len() > PRICE_HISTORY_LEN {
                history.pop_front();
            }
        }

        self.set_phase(CyclePhase::EnrichPositions);
        let positions = self.enrich_positions(&user_state, &prices);
        let total_return_pct = self.track_returns(user_state.total_value);

        self.set_phase(CyclePhase::LoadJournal);
        let recent_journal: Vec<serde_json::Value> = self
            .journal
            .recent(JOURNAL_TAIL)?
            .iter()
            .filter_map(|record| serde_json::to_value(record).ok())
            .collect();

        self.set_phase(CyclePhase::FetchOrders);
        let open_orders = self.exchange.open_orders().await?;

        self.set_phase(CyclePhase::Reconcile);
        self.reconcile(&user_state, &open_orders)?;

        self.set_phase(CyclePhase::FetchFills);
        let fills = self.exchange.recent_fills(20).await?;

        self.set_phase(CyclePhase::BuildContext);
        let account = AccountDashboard {
            total_return_pct,
            balance: user_state.balance,
            account_value: user_state.total_value,
            risk_metric: risk_metric(&self.cycle_returns),
            positions,
            active_trades: self.hub.snapshot().active_trades,
            open_orders,
            recent_journal,
            recent_fills: fills,
        };
        self.publish_dashboard(&account);
        let mut market_data = Vec::with_capacity(instruments.len());
        for asset in &instruments {
            market_data.push(self.market_section(asset, prices[asset]).await?);
        }
        let context = MarketContext {
            invocation: Invocation {
                count: cycle,
                current_time: Utc::now(),
            },
            account,
            market_data,
            instructions: ContextInstructions {
                instruments: instruments.clone(),
                note: BASE_NOTE.to_string(),
            },
        };

        self.set_phase(CyclePhase::SynthesizeDecision);
        let decisions = self.decide(context, &instruments).await?;

        self.set_phase(CyclePhase::Dispatch);
        self.dispatch(&decisions, &prices)?;

        self.set_phase(CyclePhase::Persist);
        self.hub.with(|shared| {
            shared.last_reasoning = Some(decisions.reasoning.clone());
            shared.last_cycle_at = Some(Utc::now());
        });
        Ok(())
    }

    /// Drop local trade records nothing on the exchange still backs.
    ///
    /// A trade counts as live while its asset has either an open position
    /// or a resting order: a flat position with a trigger order still
    /// resting is not stale.
    fn reconcile(
        &self,
        user_state: &alphaloop_models::UserState,
        open_orders: &[alphaloop_models::OpenOrder],
    ) -> Result<(), EngineError> {
        let removed = self.hub.with(|shared| {
            let stale: Vec<String> = shared
                .active_trades
                .keys()
                .filter(|asset| {
                    let has_position = user_state
                        .positions
                        .iter()
                        .any(|p| &&p.asset == asset && p.size != 0.0);
                    let has_order = open_orders.iter().any(|o| &&o.asset == asset);
                    !has_position && !has_order
                })
                .cloned()
                .collect();
            for asset in &stale {
                shared.active_trades.remove(asset);
            }
            stale
        });

        if !removed.is_empty() {
            warn!(?removed, "reconciled trades with no exchange backing");
            self.journal
                .append(&JournalRecord::now(JournalEvent::Reconcile {
                    removed_assets: removed,
                    note: "no position or resting order on exchange".to_string(),
                }))?;
        }
        Ok(())
    }

    fn enrich_positions(
        &self,
        user_state: &alphaloop_models::UserState,
        prices: &HashMap<String, f64>,
    ) -> Vec<EnrichedPosition> {
        user_state
            .positions
            .iter()
            .map(|p| EnrichedPosition {
                asset: p.asset.clone(),
                quantity: p.size,
                entry_price: p.entry_price,
                current_price: prices.get(&p.asset).copied().unwrap_or(p.entry_price),
                liquidation_price: p.liquidation_price,
                unrealized_pnl: p.unrealized_pnl,
                leverage: p.leverage,
            })
            .collect()
    }

    /// Update the return series and report the return since baseline.
    fn track_returns(&mut self, value: f64) -> f64 {
        let baseline = *self.baseline_value.get_or_insert(value);
        if let Some(prev) = self.last_value {
            if prev > 0.0 {
                self.cycle_returns.push((value - prev) / prev);
            }
        }
        self.last_value = Some(value);
        if baseline > 0.0 {
            (value - baseline) / baseline * 100.0
        } else {
            0.0
        }
    }

    /// Mirror the dashboard onto the shared state so watch subscribers see
    /// the same account picture the model does.
    fn publish_dashboard(&self, account: &AccountDashboard) {
        self.hub.with(|shared| {
            shared.balance = account.balance;
            shared.account_value = account.account_value;
            shared.total_return_pct = account.total_return_pct;
            shared.risk_metric = account.risk_metric;
            shared.positions = account.positions.clone();
            shared.open_orders = account.open_orders.clone();
            shared.recent_fills = account.recent_fills.clone();
        });
    }

    async fn market_section(
        &self,
        asset: &str,
        current_price: f64,
    ) -> Result<MarketSection, EngineError> {
        let interval = &self.config.trading.interval;
        let bundle = self.indicators.fetch_asset_indicators(asset, interval).await?;
        let intraday = bundle.get("5m");
        let long_term = bundle.get(interval.as_str()).or(intraday);

        let latest = |frame: Option<&HashMap<String, IndicatorValue>>, key: &str| {
            frame.and_then(|m| m.get(key)).and_then(|v| v.latest())
        };
        let series = |frame: Option<&HashMap<String, IndicatorValue>>, key: &str| {
            frame.and_then(|m| m.get(key)).map(|v| v.series()).unwrap_or_default()
        };

        // Funding and open interest are prompt garnish: a failed lookup
        // must not sink the cycle.
        let open_interest = match self.exchange.open_interest(asset).await {
            Ok(value) => value,
            Err(e) => {
                warn!(asset, error = %e, "open interest unavailable");
                None
            }
        };
        let funding_rate = match self.exchange.funding_rate(asset).await {
            Ok(value) => value,
            Err(e) => {
                warn!(asset, error = %e, "funding rate unavailable");
                None
            }
        };

        Ok(MarketSection {
            asset: asset.to_string(),
            current_price,
            intraday: IntradaySnapshot {
                ema20: latest(intraday, "ema20"),
                macd: latest(intraday, "macd"),
                rsi7: latest(intraday, "rsi7"),
                rsi14: latest(intraday, "rsi14"),
                series: IntradaySeries {
                    ema20: series(intraday, "ema20"),
                    macd: series(intraday, "macd"),
                    rsi7: series(intraday, "rsi7"),
                    rsi14: series(intraday, "rsi14"),
                },
            },
            long_term: LongTermSnapshot {
                ema20: latest(long_term, "ema20"),
                ema50: latest(long_term, "ema50"),
                atr3: latest(long_term, "atr3"),
                atr14: latest(long_term, "atr14"),
                macd_series: series(long_term, "macd"),
                rsi_series: series(long_term, "rsi14"),
            },
            open_interest,
            funding_rate,
            funding_annualized_pct: funding_rate.map(|f| f * FUNDING_PERIODS_PER_YEAR * 100.0),
            recent_mid_prices: self
                .price_history
                .get(asset)
                .map(|h| h.iter().copied().collect())
                .unwrap_or_default(),
        })
    }

    async fn decide(
        &self,
        context: MarketContext,
        instruments: &[String],
    ) -> Result<DecisionSet, EngineError> {
        match self.config.trading.decision_source {
            DecisionSource::Synthesizer => {
                let set = self.synthesizer.decide(&context, instruments).await?;
                if !set.is_parse_error_fallback() {
                    return Ok(set);
                }
                // One stricter retry before accepting the hold fallback.
                info!("decision pass degraded to parse-error holds, retrying strictly");
                let mut strict = context;
                strict.instructions.note = STRICT_NOTE.to_string();
                Ok(self.synthesizer.decide(&strict, instruments).await?)
            }
            DecisionSource::Ensemble => {
                let outcomes = self.ensemble.run(&context).await;
                let verdict = self.judge.arbitrate(&outcomes).await;
                Ok(decisions_from_verdict(&verdict, instruments))
            }
        }
    }

    fn dispatch(
        &self,
        decisions: &DecisionSet,
        prices: &HashMap<String, f64>,
    ) -> Result<(), EngineError> {
        for decision in &decisions.trade_decisions {
            if !decision.action.is_entry() {
                self.journal
                    .append(&JournalRecord::now(JournalEvent::Hold {
                        asset: decision.asset.clone(),
                        rationale: decision.rationale.clone(),
                    }))?;
                continue;
            }

            let price = prices.get(&decision.asset).copied().unwrap_or(0.0);
            let proposal = TradeProposal::from_decision(decision, price);
            match self.config.trading.mode {
                TradingMode::Auto => {
                    info!(asset = %decision.asset, action = %decision.action, "auto-dispatching");
                    self.ledger.dispatch(proposal);
                }
                TradingMode::Manual => {
                    info!(asset = %decision.asset, action = %decision.action, "proposing");
                    self.ledger.submit(proposal);
                }
            }
        }
        Ok(())
    }
}

/// Flatten a judge verdict into one decision per instrument: the winning
/// recommendation for its asset, holds everywhere else.
fn decisions_from_verdict(verdict: &JudgeVerdict, instruments: &[String]) -> DecisionSet {
    let decisions = instruments
        .iter()
        .map(|asset| {
            if verdict.final_action != FinalAction::Hold {
                if let Some(rec) = &verdict.final_recommendation {
                    if &rec.asset == asset {
                        return rec.clone();
                    }
                }
            }
            TradeDecision::hold(asset, &verdict.reasoning)
        })
        .collect();
    DecisionSet {
        reasoning: verdict.reasoning.clone(),
        trade_decisions: decisions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alphaloop_models::{FinalAction, TradeAction};

    fn verdict(action: FinalAction, asset: Option<&str>) -> JudgeVerdict {
        JudgeVerdict {
            winner: asset.map(|_| "technical".to_string()),
            reasoning: "panel call".to_string(),
            final_action: action,
            final_recommendation: asset.map(|a| TradeDecision {
                asset: a.to_string(),
                action: TradeAction::Buy,
                allocation_usd: 500.0,
                tp_price: None,
                sl_price: None,
                exit_plan: String::new(),
                rationale: "winner".to_string(),
                confidence: Some(80.0),
            }),
            warnings: Vec::new(),
        }
    }

    #[test]
    fn verdict_flattens_to_one_decision_per_instrument() {
        let instruments = vec!["BTC".to_string(), "ETH".to_string()];
        let set = decisions_from_verdict(&verdict(FinalAction::Buy, Some("BTC")), &instruments);
        assert_eq!(set.trade_decisions.len(), 2);
        assert_eq!(set.trade_decisions[0].action, TradeAction::Buy);
        assert_eq!(set.trade_decisions[1].action, TradeAction::Hold);
        assert_eq!(set.trade_decisions[1].rationale, "panel call");
    }

    #[test]
    fn hold_verdict_holds_everywhere() {
        let instruments = vec!["BTC".to_string()];
        let set = decisions_from_verdict(&verdict(FinalAction::Hold, None), &instruments);
        assert!(set.trade_decisions.iter().all(|d| d.action == TradeAction::Hold));
    }
}
