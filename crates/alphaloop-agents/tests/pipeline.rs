//! End-to-end decision scenarios against scripted providers.

use std::sync::Arc;

use alphaloop_agents::test_support::{
    reply_with_content, reply_with_tool_call, sample_context, ScriptedProvider, StaticIndicators,
};
use alphaloop_agents::{AnalystEnsemble, DecisionSynthesizer, Judge, LlmAnalyst};
use alphaloop_models::{FinalAction, JudgePolicy, LlmConfig, TradeAction};

fn decision_json(asset: &str, action: &str) -> String {
    serde_json::json!({
        "reasoning": "scenario",
        "trade_decisions": [{
            "asset": asset,
            "action": action,
            "allocation_usd": 800.0,
            "tp_price": 70000.0,
            "sl_price": 60000.0,
            "exit_plan": "tp/sl",
            "rationale": "scenario",
            "confidence": 85.0
        }]
    })
    .to_string()
}

fn opinion_json(id: &str, asset: &str, confidence: f64) -> String {
    serde_json::json!({
        "analyst_id": id,
        "reasoning": "scenario",
        "recommendation": {
            "asset": asset,
            "action": "buy",
            "allocation_usd": 500.0,
            "tp_price": 70000.0,
            "sl_price": 60000.0,
            "exit_plan": "tp/sl",
            "rationale": "scenario",
            "confidence": confidence
        },
        "rl_validation": null
    })
    .to_string()
}

#[tokio::test]
async fn synthesizer_pulls_indicators_then_decides() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        Ok(reply_with_tool_call(
            "c1",
            "get_indicator",
            r#"{"indicator": "macd", "symbol": "BTC/USDT", "interval": "1h"}"#,
        )),
        Ok(reply_with_content(&decision_json("BTC", "buy"))),
    ]));
    let synth = DecisionSynthesizer::new(
        Arc::clone(&provider) as Arc<dyn alphaloop_gateways::LlmProvider>,
        Arc::new(StaticIndicators::default()),
        LlmConfig::default(),
    );

    let set = synth
        .decide(&sample_context(), &["BTC".to_string()])
        .await
        .unwrap();

    assert_eq!(provider.request_count(), 2);
    assert_eq!(set.trade_decisions[0].action, TradeAction::Buy);
    assert_eq!(set.trade_decisions[0].allocation_usd, 800.0);
}

#[tokio::test]
async fn ensemble_and_judge_pick_a_winner() {
    let technical = Arc::new(ScriptedProvider::new(vec![Ok(reply_with_content(
        &opinion_json("technical", "BTC", 88.0),
    ))]));
    let quant = Arc::new(ScriptedProvider::new(vec![Ok(reply_with_content(
        &opinion_json("quant", "BTC", 61.0),
    ))]));
    let ensemble = AnalystEnsemble::new(vec![
        Arc::new(LlmAnalyst::new("technical", technical, LlmConfig::default())),
        Arc::new(LlmAnalyst::new("quant", quant, LlmConfig::default())),
    ]);
    let outcomes = ensemble.run(&sample_context()).await;
    assert_eq!(outcomes.len(), 2);

    let verdict_json = serde_json::json!({
        "winner": "technical",
        "reasoning": "clearest structure",
        "final_action": "BUY",
        "final_recommendation": {
            "asset": "BTC",
            "action": "buy",
            "allocation_usd": 500.0,
            "tp_price": 70000.0,
            "sl_price": 60000.0,
            "exit_plan": "tp/sl",
            "rationale": "scenario",
            "confidence": 88.0
        },
        "warnings": []
    })
    .to_string();
    let judge = Judge::new(
        Arc::new(ScriptedProvider::new(vec![Ok(reply_with_content(
            &verdict_json,
        ))])),
        "judge-model",
        JudgePolicy::default(),
    );

    let verdict = judge.arbitrate(&outcomes).await;
    assert_eq!(verdict.final_action, FinalAction::Buy);
    assert_eq!(verdict.winner.as_deref(), Some("technical"));
    assert!(verdict.invariants_hold());
}

#[tokio::test]
async fn degraded_panel_still_reaches_a_verdict() {
    let technical = Arc::new(ScriptedProvider::new(vec![Ok(reply_with_content(
        "not json at all",
    ))]));
    let quant = Arc::new(ScriptedProvider::new(vec![Ok(reply_with_content(
        &opinion_json("quant", "BTC", 75.0),
    ))]));
    let ensemble = AnalystEnsemble::new(vec![
        Arc::new(LlmAnalyst::new("technical", technical, LlmConfig::default())),
        Arc::new(LlmAnalyst::new("quant", quant, LlmConfig::default())),
    ]);
    let outcomes = ensemble.run(&sample_context()).await;
    assert!(outcomes[0].is_failure());
    assert!(!outcomes[1].is_failure());

    let judge = Judge::new(
        Arc::new(ScriptedProvider::new(vec![Ok(reply_with_content(
            &serde_json::json!({
                "winner": "NONE",
                "reasoning": "panel too thin",
                "final_action": "HOLD",
                "final_recommendation": null,
                "warnings": ["technical analyst failed"]
            })
            .to_string(),
        ))])),
        "judge-model",
        JudgePolicy::default(),
    );
    let verdict = judge.arbitrate(&outcomes).await;
    assert_eq!(verdict.final_action, FinalAction::Hold);
    assert!(verdict.winner.is_none());
}
