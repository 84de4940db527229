use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Fields journaled for an executed entry (auto dispatch or approved proposal).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradeRecord {
    pub asset: String,
    pub allocation_usd: f64,
    pub amount: f64,
    pub entry_price: f64,
    pub tp_price: Option<f64>,
    pub tp_oid: Option<u64>,
    pub sl_price: Option<f64>,
    pub sl_oid: Option<u64>,
    pub exit_plan: String,
    pub rationale: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_proposal: Option<Uuid>,
}

/// Append-only fact written per decision, execution, hold, rejection and
/// reconciliation. The `action` field is the line discriminator; for
/// executed entries it carries the trade direction itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum JournalEvent {
    Buy(TradeRecord),
    Sell(TradeRecord),
    Hold {
        asset: String,
        rationale: String,
    },
    Reconcile {
        removed_assets: Vec<String>,
        note: String,
    },
    ProposalApproved {
        asset: String,
        proposal_id: Uuid,
    },
    ProposalRejected {
        asset: String,
        proposal_id: Uuid,
        reason: String,
        rationale: String,
    },
    ExecutionError {
        asset: String,
        error: String,
    },
    ManualClose {
        asset: String,
        quantity: f64,
        note: String,
    },
}

impl JournalEvent {
    pub fn discriminator(&self) -> &'static str {
        match self {
            JournalEvent::Buy(_) => "buy",
            JournalEvent::Sell(_) => "sell",
            JournalEvent::Hold { .. } => "hold",
            JournalEvent::Reconcile { .. } => "reconcile",
            JournalEvent::ProposalApproved { .. } => "proposal_approved",
            JournalEvent::ProposalRejected { .. } => "proposal_rejected",
            JournalEvent::ExecutionError { .. } => "execution_error",
            JournalEvent::ManualClose { .. } => "manual_close",
        }
    }
}

/// One NDJSON journal line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JournalRecord {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: JournalEvent,
}

impl JournalRecord {
    pub fn now(event: JournalEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
        }
    }
}
