use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decision::{TradeAction, TradeDecision};

/// Lifecycle of a human-approval proposal. Transitions are one-way:
/// Pending -> Approved -> Executing -> Executed | Failed, or
/// Pending -> Rejected. Rejected/Executed/Failed are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProposalState {
    Pending,
    Approved,
    Executing,
    Executed,
    Rejected,
    Failed,
}

/// A trade decision waiting for operator approval in manual mode.
///
/// `entry_price` is captured at creation time and used only for display and
/// the risk/reward ratio; execution re-fetches a live price.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradeProposal {
    pub id: Uuid,
    pub asset: String,
    pub action: TradeAction,
    pub confidence: f64,
    pub entry_price: f64,
    pub tp_price: Option<f64>,
    pub sl_price: Option<f64>,
    pub size: f64,
    pub allocation_usd: f64,
    pub risk_reward: Option<f64>,
    pub rationale: String,
    pub exit_plan: String,
    pub state: ProposalState,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub executed_price: Option<f64>,
    pub failure_reason: Option<String>,
}

impl TradeProposal {
    /// Build a proposal from an entry decision and the price observed now.
    ///
    /// Risk/reward compares the TP and SL distances as fractions of the
    /// captured price; `None` when either leg is missing or the loss side
    /// is degenerate.
    pub fn from_decision(decision: &TradeDecision, current_price: f64) -> Self {
        let size = if current_price > 0.0 {
            decision.allocation_usd / current_price
        } else {
            0.0
        };

        let risk_reward = match (decision.tp_price, decision.sl_price) {
            (Some(tp), Some(sl)) if current_price > 0.0 => {
                let gain = (tp - current_price).abs() / current_price;
                let loss = (sl - current_price).abs() / current_price;
                (loss > 0.0).then(|| gain / loss)
            }
            _ => None,
        };

        Self {
            id: Uuid::new_v4(),
            asset: decision.asset.clone(),
            action: decision.action,
            confidence: decision.confidence.unwrap_or(75.0),
            entry_price: current_price,
            tp_price: decision.tp_price,
            sl_price: decision.sl_price,
            size,
            allocation_usd: decision.allocation_usd,
            risk_reward,
            rationale: decision.rationale.clone(),
            exit_plan: decision.exit_plan.clone(),
            state: ProposalState::Pending,
            created_at: Utc::now(),
            resolved_at: None,
            executed_price: None,
            failure_reason: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state == ProposalState::Pending
    }

    /// Pending -> Approved. False (no state change) otherwise.
    pub fn approve(&mut self) -> bool {
        if self.state != ProposalState::Pending {
            return false;
        }
        self.state = ProposalState::Approved;
        true
    }

    /// Pending -> Rejected. False (no state change) otherwise.
    pub fn reject(&mut self, reason: &str) -> bool {
        if self.state != ProposalState::Pending {
            return false;
        }
        self.state = ProposalState::Rejected;
        self.failure_reason = Some(reason.to_string());
        self.resolved_at = Some(Utc::now());
        true
    }

    /// Approved -> Executing.
    pub fn begin_execution(&mut self) -> bool {
        if self.state != ProposalState::Approved {
            return false;
        }
        self.state = ProposalState::Executing;
        true
    }

    /// Executing -> Executed, recording the realized entry price.
    pub fn mark_executed(&mut self, realized_price: f64) -> bool {
        if self.state != ProposalState::Executing {
            return false;
        }
        self.state = ProposalState::Executed;
        self.executed_price = Some(realized_price);
        self.resolved_at = Some(Utc::now());
        true
    }

    /// Approved or Executing -> Failed, keeping the error text.
    pub fn mark_failed(&mut self, error: &str) -> bool {
        if !matches!(self.state, ProposalState::Approved | ProposalState::Executing) {
            return false;
        }
        self.state = ProposalState::Failed;
        self.failure_reason = Some(error.to_string());
        self.resolved_at = Some(Utc::now());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buy_decision() -> TradeDecision {
        TradeDecision {
            asset: "BTC".to_string(),
            action: TradeAction::Buy,
            allocation_usd: 1000.0,
            tp_price: Some(70000.0),
            sl_price: Some(60000.0),
            exit_plan: "tp/sl".to_string(),
            rationale: "breakout".to_string(),
            confidence: None,
        }
    }

    #[test]
    fn sizing_and_risk_reward_from_captured_price() {
        let proposal = TradeProposal::from_decision(&buy_decision(), 65000.0);
        assert!((proposal.size - 1000.0 / 65000.0).abs() < 1e-9);
        assert!((proposal.risk_reward.unwrap() - 1.0).abs() < 1e-9);
        assert_eq!(proposal.state, ProposalState::Pending);
        assert_eq!(proposal.entry_price, 65000.0);
    }

    #[test]
    fn risk_reward_none_without_both_legs() {
        let mut decision = buy_decision();
        decision.sl_price = None;
        let proposal = TradeProposal::from_decision(&decision, 65000.0);
        assert_eq!(proposal.risk_reward, None);
    }

    #[test]
    fn zero_price_yields_zero_size() {
        let proposal = TradeProposal::from_decision(&buy_decision(), 0.0);
        assert_eq!(proposal.size, 0.0);
        assert_eq!(proposal.risk_reward, None);
    }

    #[test]
    fn lifecycle_happy_path() {
        let mut p = TradeProposal::from_decision(&buy_decision(), 65000.0);
        assert!(p.approve());
        assert!(p.begin_execution());
        assert!(p.mark_executed(65010.0));
        assert_eq!(p.state, ProposalState::Executed);
        assert_eq!(p.executed_price, Some(65010.0));
        assert!(p.resolved_at.is_some());
    }

    #[test]
    fn rejected_is_terminal() {
        let mut p = TradeProposal::from_decision(&buy_decision(), 65000.0);
        assert!(p.reject("operator declined"));
        assert!(!p.approve());
        assert!(!p.reject("again"));
        assert_eq!(p.state, ProposalState::Rejected);
        assert_eq!(p.failure_reason.as_deref(), Some("operator declined"));
    }

    #[test]
    fn executed_cannot_be_rejected() {
        let mut p = TradeProposal::from_decision(&buy_decision(), 65000.0);
        p.approve();
        p.begin_execution();
        p.mark_executed(65000.0);
        assert!(!p.reject("too late"));
        assert_eq!(p.state, ProposalState::Executed);
    }

    #[test]
    fn failure_keeps_error_text() {
        let mut p = TradeProposal::from_decision(&buy_decision(), 65000.0);
        p.approve();
        p.begin_execution();
        assert!(p.mark_failed("order rejected"));
        assert!(!p.mark_executed(65000.0));
        assert_eq!(p.failure_reason.as_deref(), Some("order rejected"));
    }
}
