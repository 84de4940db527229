use std::sync::Arc;

use tracing::{info, warn};

use alphaloop_gateways::{ChatMessage, ChatOutcome, ChatRequest, LlmProvider};
use alphaloop_models::{AnalystOutcome, FinalAction, JudgePolicy, JudgeVerdict};

use crate::parser;
use crate::prompts;

/// Arbiter over the analyst panel.
///
/// Arbitration is total: whatever goes wrong — transport, parsing, a
/// verdict that breaks its own invariants, a policy violation — the result
/// is a hold verdict carrying the reason, never an error.
pub struct Judge {
    provider: Arc<dyn LlmProvider>,
    model: String,
    policy: JudgePolicy,
}

impl Judge {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>, policy: JudgePolicy) -> Self {
        Self {
            provider,
            model: model.into(),
            policy,
        }
    }

    pub async fn arbitrate(&self, outcomes: &[AnalystOutcome]) -> JudgeVerdict {
        let failures: Vec<String> = outcomes
            .iter()
            .filter(|o| o.is_failure())
            .map(|o| format!("analyst {} failed", o.analyst_id()))
            .collect();
        if failures.len() == outcomes.len() {
            return JudgeVerdict::hold("no analyst produced an opinion", failures);
        }

        let mut request = ChatRequest::new(
            &self.model,
            vec![
                ChatMessage::system(prompts::JUDGE_SYSTEM),
                ChatMessage::user(prompts::judge_user_message(outcomes, &self.policy)),
            ],
        );
        request.temperature = Some(0.1);

        let reply = match self.provider.chat(&request).await {
            Ok(ChatOutcome::Reply(reply)) => reply,
            Ok(ChatOutcome::Rejected(rejection)) => {
                warn!(?rejection, "judge request rejected");
                return JudgeVerdict::hold(
                    "arbitration request rejected by provider",
                    failures,
                );
            }
            Err(e) => {
                warn!(error = %e, "judge request failed");
                return JudgeVerdict::hold(&format!("arbitration unavailable: {e}"), failures);
            }
        };

        let value = match &reply.parsed {
            Some(parsed) => parsed.clone(),
            None => match parser::extract_value(&reply.content.unwrap_or_default()) {
                Ok(value) => value,
                Err(e) => {
                    warn!(error = %e, "judge verdict unparseable");
                    return JudgeVerdict::hold("arbitration verdict unparseable", failures);
                }
            },
        };
        let verdict: JudgeVerdict = match serde_json::from_value(value) {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!(error = %e, "judge verdict had wrong shape");
                return JudgeVerdict::hold("arbitration verdict unparseable", failures);
            }
        };

        let verdict = self.enforce_policy(verdict.normalized(), outcomes);
        info!(action = ?verdict.final_action, winner = ?verdict.winner, "arbitration complete");
        verdict
    }

    /// Policy gates applied after the model has spoken.
    fn enforce_policy(&self, verdict: JudgeVerdict, outcomes: &[AnalystOutcome]) -> JudgeVerdict {
        if verdict.final_action == FinalAction::Hold {
            return verdict;
        }

        if let Some(winner) = &verdict.winner {
            let known = outcomes
                .iter()
                .any(|o| !o.is_failure() && o.analyst_id() == winner);
            if !known {
                return demote(verdict, "winner is not a member of the panel");
            }
        }

        let Some(rec) = &verdict.final_recommendation else {
            // normalized() guarantees this, but the policy gate must not
            // depend on it.
            return demote(verdict, "entry verdict without a recommendation");
        };

        if let Some(allowed) = &self.policy.instruments {
            if !allowed.contains(&rec.asset) {
                return demote(verdict, "instrument outside the judge allow-list");
            }
        }

        if rec.confidence.unwrap_or(0.0) < self.policy.min_confidence {
            return demote(verdict, "winner confidence below policy minimum");
        }

        verdict
    }
}

fn demote(verdict: JudgeVerdict, reason: &str) -> JudgeVerdict {
    let mut warnings = verdict.warnings;
    warnings.push(reason.to_string());
    JudgeVerdict::hold(&verdict.reasoning, warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{opinion_outcome, reply_with_content, ScriptedProvider};
    use chrono::Utc;

    fn verdict_json(winner: &str, action: &str, asset: &str, confidence: f64) -> String {
        serde_json::json!({
            "winner": winner,
            "reasoning": "strongest case",
            "final_action": action,
            "final_recommendation": {
                "asset": asset,
                "action": action.to_lowercase(),
                "allocation_usd": 500.0,
                "tp_price": 70000.0,
                "sl_price": 60000.0,
                "exit_plan": "tp/sl",
                "rationale": "trend",
                "confidence": confidence
            },
            "warnings": []
        })
        .to_string()
    }

    fn panel() -> Vec<AnalystOutcome> {
        vec![
            opinion_outcome("technical", Some(("BTC", 82.0))),
            opinion_outcome("risk", None),
        ]
    }

    fn judge_with(script: Vec<Result<ChatOutcome, alphaloop_gateways::GatewayError>>, policy: JudgePolicy) -> Judge {
        Judge::new(Arc::new(ScriptedProvider::new(script)), "judge-model", policy)
    }

    #[tokio::test]
    async fn endorses_a_confident_winner() {
        let judge = judge_with(
            vec![Ok(reply_with_content(&verdict_json("technical", "BUY", "BTC", 82.0)))],
            JudgePolicy::default(),
        );
        let verdict = judge.arbitrate(&panel()).await;
        assert_eq!(verdict.final_action, FinalAction::Buy);
        assert_eq!(verdict.winner.as_deref(), Some("technical"));
        assert!(verdict.invariants_hold());
    }

    #[tokio::test]
    async fn all_failed_panel_holds_without_calling_the_model() {
        let judge = judge_with(vec![], JudgePolicy::default());
        let outcomes = vec![AnalystOutcome::Failure {
            analyst_id: "quant".to_string(),
            error: "timeout".to_string(),
            timestamp: Utc::now(),
        }];
        let verdict = judge.arbitrate(&outcomes).await;
        assert_eq!(verdict.final_action, FinalAction::Hold);
        assert_eq!(verdict.warnings.len(), 1);
    }

    #[tokio::test]
    async fn low_confidence_winner_is_demoted() {
        let judge = judge_with(
            vec![Ok(reply_with_content(&verdict_json("technical", "BUY", "BTC", 40.0)))],
            JudgePolicy::default(),
        );
        let verdict = judge.arbitrate(&panel()).await;
        assert_eq!(verdict.final_action, FinalAction::Hold);
        assert!(verdict
            .warnings
            .iter()
            .any(|w| w.contains("confidence below")));
    }

    #[tokio::test]
    async fn instrument_allow_list_is_enforced() {
        let policy = JudgePolicy {
            instruments: Some(vec!["ETH".to_string()]),
            ..Default::default()
        };
        let judge = judge_with(
            vec![Ok(reply_with_content(&verdict_json("technical", "BUY", "BTC", 90.0)))],
            policy,
        );
        let verdict = judge.arbitrate(&panel()).await;
        assert_eq!(verdict.final_action, FinalAction::Hold);
    }

    #[tokio::test]
    async fn unknown_winner_is_demoted() {
        let judge = judge_with(
            vec![Ok(reply_with_content(&verdict_json("ghost", "SELL", "BTC", 90.0)))],
            JudgePolicy::default(),
        );
        let verdict = judge.arbitrate(&panel()).await;
        assert_eq!(verdict.final_action, FinalAction::Hold);
    }

    #[tokio::test]
    async fn invariant_violations_are_normalized() {
        // BUY with a null recommendation breaks the verdict invariants.
        let broken = serde_json::json!({
            "winner": "technical",
            "reasoning": "r",
            "final_action": "BUY",
            "final_recommendation": null,
            "warnings": []
        })
        .to_string();
        let judge = judge_with(vec![Ok(reply_with_content(&broken))], JudgePolicy::default());
        let verdict = judge.arbitrate(&panel()).await;
        assert_eq!(verdict.final_action, FinalAction::Hold);
        assert!(verdict.winner.is_none());
    }

    #[tokio::test]
    async fn transport_failure_holds() {
        let judge = judge_with(
            vec![Err(alphaloop_gateways::GatewayError::Status {
                status: 503,
                body: "down".to_string(),
            })],
            JudgePolicy::default(),
        );
        let verdict = judge.arbitrate(&panel()).await;
        assert_eq!(verdict.final_action, FinalAction::Hold);
        assert!(verdict.reasoning.contains("arbitration unavailable"));
    }
}
