//! alphaloop - LLM-driven decision loop for a perpetual-futures account.
//!
//! Wires the gateways, agents and engine together from an [`AppConfig`].
//!
//! # Library Usage
//!
//! ```rust,no_run
//! use alphaloop::models::AppConfig;
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = AppConfig::default();
//! let engine = alphaloop::build_engine(&config)?;
//! # Ok(()) }
//! ```

pub use alphaloop_agents as agents;
pub use alphaloop_engine as engine;
pub use alphaloop_gateways as gateways;
pub use alphaloop_models as models;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use alphaloop_agents::{Analyst, AnalystEnsemble, DecisionSynthesizer, Judge, LlmAnalyst};
use alphaloop_engine::{CycleOrchestrator, ProposalLedger, StateHub};
use alphaloop_gateways::{
    AuditLog, HyperliquidClient, Journal, LlmProvider, OpenRouterClient, TaapiClient,
};
use alphaloop_models::{interval_seconds, AppConfig};

/// A fully wired engine, ready to run.
pub struct Engine {
    pub hub: Arc<StateHub>,
    pub ledger: Arc<ProposalLedger>,
    pub orchestrator: CycleOrchestrator,
}

/// Build the engine from configuration. API keys come from the environment
/// variables the config names.
pub fn build_engine(config: &AppConfig) -> anyhow::Result<Engine> {
    let gw = &config.gateways;
    let timeout = Duration::from_secs(config.llm.request_timeout_seconds);

    let openrouter_key = std::env::var(&gw.openrouter_api_key_env)
        .with_context(|| format!("missing {}", gw.openrouter_api_key_env))?;
    let taapi_key = std::env::var(&gw.taapi_api_key_env)
        .with_context(|| format!("missing {}", gw.taapi_api_key_env))?;

    let audit = AuditLog::new(&config.paths.audit_log);
    let provider: Arc<dyn LlmProvider> = Arc::new(OpenRouterClient::new(
        &gw.openrouter_base_url,
        openrouter_key,
        timeout,
        Some(audit),
    )?);

    let indicators = Arc::new(TaapiClient::new(
        &gw.taapi_base_url,
        taapi_key,
        timeout,
        Duration::from_secs(interval_seconds(&config.trading.interval)),
        Duration::from_secs(gw.taapi_min_spacing_seconds),
    )?);
    let exchange = Arc::new(HyperliquidClient::new(
        &gw.hyperliquid_info_url,
        &gw.hyperliquid_exchange_url,
        &gw.account_address,
        timeout,
    )?);

    let journal = Journal::new(&config.paths.journal);
    let hub = Arc::new(StateHub::new());
    let ledger = Arc::new(ProposalLedger::new(
        Arc::clone(&hub),
        Arc::clone(&exchange) as Arc<dyn alphaloop_gateways::ExchangeGateway>,
        journal.clone(),
    ));

    let synthesizer = DecisionSynthesizer::new(
        Arc::clone(&provider),
        Arc::clone(&indicators) as Arc<dyn alphaloop_gateways::IndicatorSource>,
        config.llm.clone(),
    );
    let analysts: Vec<Arc<dyn Analyst>> = config
        .analysts
        .iter()
        .filter(|a| a.enabled)
        .map(|a| {
            Arc::new(LlmAnalyst::new(
                a.id.clone(),
                Arc::clone(&provider),
                config.llm.clone(),
            )) as Arc<dyn Analyst>
        })
        .collect();
    let ensemble = AnalystEnsemble::new(analysts);
    let judge = Judge::new(
        Arc::clone(&provider),
        config.llm.model.clone(),
        config.judge.clone(),
    );

    let orchestrator = CycleOrchestrator::new(
        config.clone(),
        Arc::clone(&hub),
        exchange,
        indicators,
        journal,
        synthesizer,
        ensemble,
        judge,
        Arc::clone(&ledger),
    );

    Ok(Engine {
        hub,
        ledger,
        orchestrator,
    })
}
