//! Prompt and schema construction for the decision models.

use alphaloop_models::{AnalystOutcome, JudgePolicy};

pub const SYNTHESIZER_SYSTEM: &str = "\
You are the sole portfolio manager of a perpetual-futures account. You are \
given a full account and market snapshot as JSON. You may call the \
get_indicator tool to pull additional technical indicators before deciding.

For EVERY instrument listed in instructions.instruments you must emit exactly \
one decision. When you are done, reply with a single JSON object and nothing \
else:

{
  \"reasoning\": \"<your overall market read>\",
  \"trade_decisions\": [
    {
      \"asset\": \"BTC\",
      \"action\": \"buy\" | \"sell\" | \"hold\",
      \"allocation_usd\": <margin to commit, 0 for hold>,
      \"tp_price\": <take-profit price or null>,
      \"sl_price\": <stop-loss price or null>,
      \"exit_plan\": \"<when you would exit besides tp/sl>\",
      \"rationale\": \"<why this action>\",
      \"confidence\": <0-100 or null>
    }
  ]
}

Never risk more than the available balance. Prefer hold when the edge is \
unclear.";

pub const SANITIZER_SYSTEM: &str = "\
You repair malformed trading-decision payloads. The user message contains \
text that was supposed to be a JSON object with keys \"reasoning\" and \
\"trade_decisions\". Re-emit the same content as strictly valid JSON matching \
that schema. Do not invent decisions that are not present in the input. Reply \
with JSON only.";

pub const JUDGE_SYSTEM: &str = "\
You are the arbiter over a panel of market analysts. The user message \
contains their opinions (and any failures) as JSON. Pick at most one winning \
analyst and produce the account's final action.

Reply with a single JSON object:

{
  \"winner\": \"<analyst_id>\" | \"NONE\",
  \"reasoning\": \"<why>\",
  \"final_action\": \"BUY\" | \"SELL\" | \"HOLD\",
  \"final_recommendation\": <the winning trade decision object, or null>,
  \"warnings\": [\"...\"]
}

Rules: winner is NONE exactly when final_action is HOLD. A BUY or SELL must \
carry the winner's recommendation verbatim. When analysts disagree without a \
clearly stronger case, hold.";

/// Persona prompt for one ensemble analyst.
pub fn analyst_system(id: &str) -> String {
    let persona = match id {
        "technical" => {
            "You trade purely on price action and indicators: EMA structure, \
             MACD momentum, RSI extremes, ATR-scaled stops."
        }
        "ml" => {
            "You reason like a machine-learning signal desk: treat the \
             indicator series as features, estimate the probability the next \
             move continues the recent regime, and only trade when the \
             estimated edge is material."
        }
        "risk" => {
            "You are the risk officer: your first concern is drawdown, \
             liquidation distance and position sizing. You veto trades more \
             often than you take them."
        }
        "quant" => {
            "You are a quantitative analyst: compute expected value from the \
             given data, compare long, short and flat, and recommend the \
             branch with the best risk-adjusted payoff."
        }
        other => return format!(
            "You are the {other} analyst on a perpetual-futures desk.{COMMON}"
        ),
    };
    format!("{persona}{COMMON}")
}

const COMMON: &str = "\n\nYou receive a full account and market snapshot as \
JSON. Reply with a single JSON object:\n\n{\n  \"analyst_id\": \"<your \
id>\",\n  \"reasoning\": \"<your read>\",\n  \"recommendation\": <a trade \
decision object with asset, action, allocation_usd, tp_price, sl_price, \
exit_plan, rationale, confidence — or null for no trade>,\n  \
\"rl_validation\": {\"q_long\": n, \"q_short\": n, \"q_hold\": n, \"regret\": \
n, \"expected_value\": n, \"sharpe\": n}\n}\n\nJSON only, no prose around it.";

/// User message for the judge: the panel's outcomes plus the active policy.
pub fn judge_user_message(outcomes: &[AnalystOutcome], policy: &JudgePolicy) -> String {
    let payload = serde_json::json!({
        "analyst_outcomes": outcomes,
        "policy": {
            "instruments": policy.instruments,
            "min_confidence": policy.min_confidence,
        },
    });
    serde_json::to_string_pretty(&payload).unwrap_or_else(|_| "{}".to_string())
}

/// Tool table offered to the synthesizer.
pub fn indicator_tools() -> serde_json::Value {
    serde_json::json!([{
        "type": "function",
        "function": {
            "name": "get_indicator",
            "description": "Fetch one technical indicator for a symbol from the indicator service.",
            "parameters": {
                "type": "object",
                "properties": {
                    "indicator": {"type": "string", "description": "Indicator name, e.g. ema, rsi, macd, atr"},
                    "symbol": {"type": "string", "description": "Trading pair, e.g. BTC/USDT"},
                    "interval": {"type": "string", "description": "Candle interval, e.g. 5m, 1h, 1d"},
                    "period": {"type": "integer"},
                    "backtrack": {"type": "integer"}
                },
                "required": ["indicator", "symbol", "interval"]
            }
        }
    }])
}

/// Strict response schema for the decision payload.
pub fn decision_response_format() -> serde_json::Value {
    serde_json::json!({
        "type": "json_schema",
        "json_schema": {
            "name": "trade_decisions",
            "strict": true,
            "schema": {
                "type": "object",
                "additionalProperties": false,
                "required": ["reasoning", "trade_decisions"],
                "properties": {
                    "reasoning": {"type": "string"},
                    "trade_decisions": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "additionalProperties": false,
                            "required": [
                                "asset", "action", "allocation_usd", "tp_price",
                                "sl_price", "exit_plan", "rationale", "confidence"
                            ],
                            "properties": {
                                "asset": {"type": "string"},
                                "action": {"type": "string", "enum": ["buy", "sell", "hold"]},
                                "allocation_usd": {"type": "number"},
                                "tp_price": {"type": ["number", "null"]},
                                "sl_price": {"type": ["number", "null"]},
                                "exit_plan": {"type": "string"},
                                "rationale": {"type": "string"},
                                "confidence": {"type": ["number", "null"]}
                            }
                        }
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_personas_get_specialized_prompts() {
        let technical = analyst_system("technical");
        assert!(technical.contains("price action"));
        assert!(technical.contains("analyst_id"));
    }

    #[test]
    fn unknown_persona_gets_generic_prompt() {
        let other = analyst_system("astro");
        assert!(other.contains("astro analyst"));
        assert!(other.contains("analyst_id"));
    }

    #[test]
    fn tool_table_declares_get_indicator() {
        let tools = indicator_tools();
        assert_eq!(tools[0]["function"]["name"], "get_indicator");
    }

    #[test]
    fn response_format_is_strict() {
        let format = decision_response_format();
        assert_eq!(format["json_schema"]["strict"], true);
    }
}
