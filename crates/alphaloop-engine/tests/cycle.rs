//! Full-cycle scenarios: mock venue, canned indicators, scripted models.

use std::sync::Arc;

use alphaloop_agents::test_support::{reply_with_content, ScriptedProvider, StaticIndicators};
use alphaloop_agents::{AnalystEnsemble, DecisionSynthesizer, Judge};
use alphaloop_engine::test_support::MockExchange;
use alphaloop_engine::{CycleOrchestrator, ProposalLedger, StateHub};
use alphaloop_gateways::{GatewayError, Journal};
use alphaloop_models::{
    ActiveTrade, AppConfig, DecisionSource, JudgePolicy, LlmConfig, OpenOrder, OrderKind,
    ProposalState, TradingMode,
};

fn decision_json(asset: &str, action: &str) -> String {
    serde_json::json!({
        "reasoning": "cycle test",
        "trade_decisions": [{
            "asset": asset,
            "action": action,
            "allocation_usd": 650.0,
            "tp_price": 70000.0,
            "sl_price": 60000.0,
            "exit_plan": "tp/sl",
            "rationale": "cycle test",
            "confidence": 82.0
        }]
    })
    .to_string()
}

struct Rig {
    orchestrator: CycleOrchestrator,
    hub: Arc<StateHub>,
    ledger: Arc<ProposalLedger>,
    exchange: Arc<MockExchange>,
    journal: Journal,
    _dir: tempfile::TempDir,
}

fn tracked_trade(asset: &str) -> ActiveTrade {
    ActiveTrade {
        asset: asset.to_string(),
        is_long: true,
        amount: 0.01,
        entry_price: 64000.0,
        tp_oid: Some(41),
        sl_oid: Some(42),
        exit_plan: "tp/sl".to_string(),
        opened_at: chrono::Utc::now(),
        from_proposal: None,
    }
}

fn resting_trigger(asset: &str) -> OpenOrder {
    OpenOrder {
        asset: asset.to_string(),
        oid: 42,
        is_buy: false,
        size: 0.01,
        price: 70000.0,
        trigger_price: Some(70000.0),
        kind: OrderKind::Trigger,
    }
}

fn rig(mode: TradingMode, script: Vec<Result<alphaloop_gateways::ChatOutcome, GatewayError>>) -> Rig {
    let dir = tempfile::tempdir().unwrap();
    let journal = Journal::new(dir.path().join("journal.jsonl"));

    let mut config = AppConfig::default();
    config.trading.mode = mode;
    config.trading.instruments = vec!["BTC".to_string()];
    config.trading.decision_source = DecisionSource::Synthesizer;

    let hub = Arc::new(StateHub::new());
    let exchange = Arc::new(MockExchange::new(&[("BTC", 65000.0)]));
    let indicators = Arc::new(StaticIndicators::default());
    let provider = Arc::new(ScriptedProvider::new(script));

    let ledger = Arc::new(ProposalLedger::new(
        Arc::clone(&hub),
        Arc::clone(&exchange) as Arc<dyn alphaloop_gateways::ExchangeGateway>,
        journal.clone(),
    ));
    let synthesizer = DecisionSynthesizer::new(
        Arc::clone(&provider) as Arc<dyn alphaloop_gateways::LlmProvider>,
        Arc::clone(&indicators) as Arc<dyn alphaloop_gateways::IndicatorSource>,
        LlmConfig::default(),
    );
    let judge = Judge::new(
        Arc::new(ScriptedProvider::new(vec![])),
        "judge-model",
        JudgePolicy::default(),
    );

    let orchestrator = CycleOrchestrator::new(
        config,
        Arc::clone(&hub),
        Arc::clone(&exchange) as Arc<dyn alphaloop_gateways::ExchangeGateway>,
        indicators,
        journal.clone(),
        synthesizer,
        AnalystEnsemble::new(vec![]),
        judge,
        Arc::clone(&ledger),
    );

    Rig {
        orchestrator,
        hub,
        ledger,
        exchange,
        journal,
        _dir: dir,
    }
}

#[tokio::test]
async fn manual_mode_turns_an_entry_into_a_pending_proposal() {
    let mut rig = rig(
        TradingMode::Manual,
        vec![Ok(reply_with_content(&decision_json("BTC", "buy")))],
    );

    rig.orchestrator.run_cycle().await.unwrap();

    let state = rig.hub.snapshot();
    assert_eq!(state.cycle_count, 1);
    assert_eq!(state.proposals.len(), 1);
    assert_eq!(state.proposals[0].state, ProposalState::Pending);
    assert!((state.proposals[0].size - 650.0 / 65000.0).abs() < 1e-12);
    assert!(state.active_trades.is_empty());
}

#[tokio::test]
async fn auto_mode_executes_immediately() {
    let mut rig = rig(
        TradingMode::Auto,
        vec![Ok(reply_with_content(&decision_json("BTC", "sell")))],
    );

    rig.orchestrator.run_cycle().await.unwrap();
    rig.ledger.drain().await;

    let state = rig.hub.snapshot();
    assert_eq!(state.active_trades.len(), 1);
    assert!(!state.active_trades[0].is_long);
    assert_eq!(state.proposals[0].state, ProposalState::Executed);

    let lines: Vec<String> = rig
        .journal
        .recent(10)
        .unwrap()
        .into_iter()
        .map(|r| r.event.discriminator().to_string())
        .collect();
    assert_eq!(lines, vec!["sell"]);
}

#[tokio::test]
async fn hold_decisions_are_journaled_not_proposed() {
    let mut rig = rig(
        TradingMode::Manual,
        vec![Ok(reply_with_content(&decision_json("BTC", "hold")))],
    );

    rig.orchestrator.run_cycle().await.unwrap();

    assert!(rig.hub.snapshot().proposals.is_empty());
    let records = rig.journal.recent(10).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].event.discriminator(), "hold");
}

#[tokio::test]
async fn parse_failure_triggers_one_strict_retry() {
    // Round 1: garbage reply, then garbage from the repair pass.
    // Round 2 (strict retry): a clean decision.
    let mut rig = rig(
        TradingMode::Manual,
        vec![
            Ok(reply_with_content("definitely not json")),
            Ok(reply_with_content("repair also fails")),
            Ok(reply_with_content(&decision_json("BTC", "buy"))),
        ],
    );

    rig.orchestrator.run_cycle().await.unwrap();

    let state = rig.hub.snapshot();
    assert_eq!(state.proposals.len(), 1);
    assert_eq!(state.proposals[0].confidence, 82.0);
}

#[tokio::test]
async fn reconciliation_purges_untracked_trades_once() {
    let mut rig = rig(
        TradingMode::Manual,
        vec![Ok(reply_with_content(&decision_json("BTC", "hold")))],
    );
    // Locally tracked, but the venue has neither a position nor an order.
    rig.hub.with(|shared| {
        shared
            .active_trades
            .insert("BTC".to_string(), tracked_trade("BTC"));
    });

    rig.orchestrator.run_cycle().await.unwrap();

    assert!(rig.hub.snapshot().active_trades.is_empty());
    let lines: Vec<String> = rig
        .journal
        .recent(10)
        .unwrap()
        .into_iter()
        .map(|r| r.event.discriminator().to_string())
        .collect();
    assert_eq!(
        lines.iter().filter(|l| l.as_str() == "reconcile").count(),
        1
    );
}

#[tokio::test]
async fn trade_backed_only_by_a_resting_order_survives_reconciliation() {
    let mut rig = rig(
        TradingMode::Manual,
        vec![Ok(reply_with_content(&decision_json("BTC", "hold")))],
    );
    // Position already flat, but a trigger order still rests on the book.
    rig.hub.with(|shared| {
        shared
            .active_trades
            .insert("BTC".to_string(), tracked_trade("BTC"));
    });
    rig.exchange.orders.lock().unwrap().push(resting_trigger("BTC"));

    rig.orchestrator.run_cycle().await.unwrap();

    let state = rig.hub.snapshot();
    assert_eq!(state.active_trades.len(), 1);
    assert_eq!(state.active_trades[0].asset, "BTC");
    let records = rig.journal.recent(10).unwrap();
    assert!(records
        .iter()
        .all(|r| r.event.discriminator() != "reconcile"));
}

#[tokio::test]
async fn failed_cycle_raises_the_error_flag_until_a_clean_one() {
    let mut rig = rig(
        TradingMode::Manual,
        vec![
            Err(GatewayError::Shape("connection dropped mid-reply".to_string())),
            Ok(reply_with_content(&decision_json("BTC", "hold"))),
        ],
    );
    let mut rx = rig.hub.subscribe();

    assert!(rig.orchestrator.run_cycle().await.is_err());
    let observed = rx.borrow_and_update().clone();
    assert!(observed
        .system_error
        .as_deref()
        .map(|e| e.contains("connection dropped"))
        .unwrap_or(false));

    rig.orchestrator.run_cycle().await.unwrap();
    assert_eq!(rig.hub.snapshot().system_error, None);
}

#[tokio::test]
async fn published_state_mirrors_the_account() {
    let mut rig = rig(
        TradingMode::Manual,
        vec![Ok(reply_with_content(&decision_json("BTC", "hold")))],
    );

    rig.orchestrator.run_cycle().await.unwrap();

    let state = rig.hub.snapshot();
    assert_eq!(state.balance, 10_000.0);
    assert_eq!(state.account_value, 10_000.0);
    assert_eq!(state.total_return_pct, 0.0);
    assert_eq!(state.last_reasoning.as_deref(), Some("cycle test"));
    assert!(state.last_cycle_at.is_some());
}

#[tokio::test]
async fn approving_the_proposal_completes_the_loop() {
    let mut rig = rig(
        TradingMode::Manual,
        vec![Ok(reply_with_content(&decision_json("BTC", "buy")))],
    );
    rig.orchestrator.run_cycle().await.unwrap();

    let id = rig.hub.snapshot().proposals[0].id;
    rig.ledger.approve(id).unwrap();
    rig.ledger.drain().await;

    let state = rig.hub.snapshot();
    assert_eq!(state.active_trades.len(), 1);
    assert_eq!(state.proposals[0].state, ProposalState::Executed);
    assert_eq!(state.active_trades[0].from_proposal, Some(id));
}
