use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::decision::TradeDecision;

/// Q-value style self-validation an analyst attaches to its recommendation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RlValidation {
    #[serde(default)]
    pub q_long: f64,
    #[serde(default)]
    pub q_short: f64,
    #[serde(default)]
    pub q_hold: f64,
    #[serde(default)]
    pub regret: f64,
    #[serde(default)]
    pub expected_value: f64,
    #[serde(default)]
    pub sharpe: f64,
}

/// One persona's independent read of the market.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalystOpinion {
    pub analyst_id: String,
    pub reasoning: String,
    pub recommendation: Option<TradeDecision>,
    pub rl_validation: Option<RlValidation>,
}

/// An analyst either produced an opinion or failed; a single failure never
/// blocks the rest of the ensemble.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum AnalystOutcome {
    Opinion(AnalystOpinion),
    Failure {
        analyst_id: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl AnalystOutcome {
    pub fn analyst_id(&self) -> &str {
        match self {
            AnalystOutcome::Opinion(o) => &o.analyst_id,
            AnalystOutcome::Failure { analyst_id, .. } => analyst_id,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, AnalystOutcome::Failure { .. })
    }
}

/// The judge's terminal action for the cycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum FinalAction {
    Buy,
    Sell,
    Hold,
}

/// Arbitration result over the full set of analyst outcomes.
///
/// Invariants, restored by [`JudgeVerdict::normalized`] when the model breaks
/// them: `winner == None` exactly when `final_action == Hold`, and an entry
/// action always carries a recommendation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JudgeVerdict {
    #[serde(
        deserialize_with = "winner_from_wire",
        serialize_with = "winner_to_wire"
    )]
    pub winner: Option<String>,
    #[serde(default)]
    pub reasoning: String,
    pub final_action: FinalAction,
    #[serde(default)]
    pub final_recommendation: Option<TradeDecision>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl JudgeVerdict {
    /// Verdict used whenever arbitration cannot produce a trustworthy answer.
    pub fn hold(reasoning: &str, warnings: Vec<String>) -> Self {
        Self {
            winner: None,
            reasoning: reasoning.to_string(),
            final_action: FinalAction::Hold,
            final_recommendation: None,
            warnings,
        }
    }

    pub fn invariants_hold(&self) -> bool {
        let winner_matches = (self.winner.is_none()) == (self.final_action == FinalAction::Hold);
        let rec_matches = (self.final_action != FinalAction::Hold)
            == self.final_recommendation.is_some();
        winner_matches && rec_matches
    }

    /// Demote any invariant-violating verdict to a hold, keeping a warning.
    pub fn normalized(self) -> Self {
        if self.invariants_hold() {
            return self;
        }
        let mut warnings = self.warnings;
        warnings.push("verdict violated winner/action invariants; demoted to hold".to_string());
        Self::hold(&self.reasoning, warnings)
    }
}

// "NONE" is the wire sentinel for no winner.
fn winner_from_wire<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    let raw: Option<String> = Option::deserialize(d)?;
    Ok(raw.filter(|s| !s.eq_ignore_ascii_case("none") && !s.is_empty()))
}

fn winner_to_wire<S: Serializer>(winner: &Option<String>, s: S) -> Result<S::Ok, S::Error> {
    match winner {
        Some(w) => s.serialize_str(w),
        None => s.serialize_str("NONE"),
    }
}
