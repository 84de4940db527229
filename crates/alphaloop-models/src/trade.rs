use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Local mirror of a position this system opened on the exchange.
///
/// At most one per asset; dispatch replaces any previous record for the same
/// asset, and reconciliation removes records the exchange no longer knows.
/// A `None` order id means that protective leg failed to place.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActiveTrade {
    pub asset: String,
    pub is_long: bool,
    pub amount: f64,
    pub entry_price: f64,
    pub tp_oid: Option<u64>,
    pub sl_oid: Option<u64>,
    pub exit_plan: String,
    pub opened_at: DateTime<Utc>,
    pub from_proposal: Option<Uuid>,
}
