use std::sync::Arc;

use chrono::Utc;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};
use uuid::Uuid;

use alphaloop_gateways::{ExchangeGateway, Journal};
use alphaloop_models::{
    ActiveTrade, JournalEvent, JournalRecord, TradeAction, TradeProposal, TradeRecord,
};

use crate::error::EngineError;
use crate::state::StateHub;

/// Owner of the proposal lifecycle and of order placement.
///
/// Approvals spawn the execution onto a task tracker so the approving
/// caller returns immediately; [`ProposalLedger::drain`] waits for every
/// in-flight execution before shutdown completes.
pub struct ProposalLedger {
    hub: Arc<StateHub>,
    exchange: Arc<dyn ExchangeGateway>,
    journal: Journal,
    tracker: TaskTracker,
}

impl ProposalLedger {
    pub fn new(hub: Arc<StateHub>, exchange: Arc<dyn ExchangeGateway>, journal: Journal) -> Self {
        Self {
            hub,
            exchange,
            journal,
            tracker: TaskTracker::new(),
        }
    }

    /// Register a pending proposal and return its id.
    pub fn submit(&self, proposal: TradeProposal) -> Uuid {
        let id = proposal.id;
        info!(asset = %proposal.asset, %id, "proposal submitted");
        self.hub.with(|shared| {
            shared.proposals.insert(id, proposal);
        });
        id
    }

    /// Approve a pending proposal and kick off its execution.
    pub fn approve(self: &Arc<Self>, id: Uuid) -> Result<(), EngineError> {
        let proposal = self.transition(id, "pending", |p| p.approve())?;
        self.journal
            .append(&JournalRecord::now(JournalEvent::ProposalApproved {
                asset: proposal.asset.clone(),
                proposal_id: id,
            }))?;
        self.spawn_execution(id);
        Ok(())
    }

    /// Reject a pending proposal. Callers may omit the reason.
    pub fn reject(&self, id: Uuid, reason: Option<&str>) -> Result<(), EngineError> {
        let reason = reason.unwrap_or("Rejected by user");
        let proposal = self.transition(id, "pending", |p| p.reject(reason))?;
        self.journal
            .append(&JournalRecord::now(JournalEvent::ProposalRejected {
                asset: proposal.asset.clone(),
                proposal_id: id,
                reason: reason.to_string(),
                rationale: proposal.rationale.clone(),
            }))?;
        Ok(())
    }

    /// Immediate execution path used in auto mode: the proposal is
    /// registered pre-approved, without an approval journal line.
    pub fn dispatch(self: &Arc<Self>, mut proposal: TradeProposal) -> Uuid {
        let id = proposal.id;
        proposal.approve();
        self.hub.with(|shared| {
            shared.proposals.insert(id, proposal);
        });
        self.spawn_execution(id);
        id
    }

    fn spawn_execution(self: &Arc<Self>, id: Uuid) {
        let ledger = Arc::clone(self);
        self.tracker.spawn(async move { ledger.execute(id).await });
    }

    fn transition(
        &self,
        id: Uuid,
        expected: &'static str,
        apply: impl FnOnce(&mut TradeProposal) -> bool,
    ) -> Result<TradeProposal, EngineError> {
        self.hub.with(|shared| {
            let proposal = shared
                .proposals
                .get_mut(&id)
                .ok_or(EngineError::UnknownProposal(id))?;
            if !apply(proposal) {
                return Err(EngineError::InvalidProposalState { id, expected });
            }
            Ok(proposal.clone())
        })
    }

    /// Run one approved proposal to a terminal state.
    async fn execute(&self, id: Uuid) {
        let proposal = match self.transition(id, "approved", |p| p.begin_execution()) {
            Ok(proposal) => proposal,
            Err(e) => {
                warn!(%id, error = %e, "execution skipped");
                return;
            }
        };

        match self.place(&proposal).await {
            Ok((trade, fill_price)) => {
                let record = TradeRecord {
                    asset: trade.asset.clone(),
                    allocation_usd: proposal.allocation_usd,
                    amount: trade.amount,
                    entry_price: fill_price,
                    tp_price: proposal.tp_price,
                    tp_oid: trade.tp_oid,
                    sl_price: proposal.sl_price,
                    sl_oid: trade.sl_oid,
                    exit_plan: trade.exit_plan.clone(),
                    rationale: proposal.rationale.clone(),
                    from_proposal: Some(id),
                };
                let event = match proposal.action {
                    TradeAction::Sell => JournalEvent::Sell(record),
                    _ => JournalEvent::Buy(record),
                };

                self.hub.with(|shared| {
                    shared.active_trades.insert(trade.asset.clone(), trade);
                    if let Some(p) = shared.proposals.get_mut(&id) {
                        p.mark_executed(fill_price);
                    }
                });
                if let Err(e) = self.journal.append(&JournalRecord::now(event)) {
                    warn!(%id, error = %e, "failed to journal execution");
                }
                info!(%id, asset = %proposal.asset, fill_price, "proposal executed");
            }
            Err(e) => {
                error!(%id, asset = %proposal.asset, error = %e, "execution failed");
                self.hub.with(|shared| {
                    if let Some(p) = shared.proposals.get_mut(&id) {
                        p.mark_failed(&e.to_string());
                    }
                });
                let event = JournalEvent::ExecutionError {
                    asset: proposal.asset.clone(),
                    error: e.to_string(),
                };
                if let Err(e) = self.journal.append(&JournalRecord::now(event)) {
                    warn!(%id, error = %e, "failed to journal execution error");
                }
            }
        }
    }

    /// Place the entry and both protective legs.
    ///
    /// The entry uses a live price, not the one captured at proposal time.
    /// TP and SL are independent and best-effort: a failed leg records a
    /// `None` order id and the trade still stands.
    async fn place(&self, proposal: &TradeProposal) -> Result<(ActiveTrade, f64), EngineError> {
        let live = self.exchange.current_price(&proposal.asset).await?;
        if live <= 0.0 {
            return Err(EngineError::Gateway(alphaloop_gateways::GatewayError::Shape(
                format!("non-positive price for {}", proposal.asset),
            )));
        }
        let size = proposal.allocation_usd / live;
        let is_long = proposal.action == TradeAction::Buy;

        let entry = if is_long {
            self.exchange.place_buy_order(&proposal.asset, size).await?
        } else {
            self.exchange.place_sell_order(&proposal.asset, size).await?
        };
        let fill_price = entry.fill_price().unwrap_or(live);

        // Protective legs close the position, so they sit on the opposite side.
        let closing_is_buy = !is_long;
        let tp_oid = match proposal.tp_price {
            Some(tp) => match self
                .exchange
                .place_take_profit(&proposal.asset, closing_is_buy, size, tp)
                .await
            {
                Ok(result) => result.order_ids().first().copied(),
                Err(e) => {
                    warn!(asset = %proposal.asset, error = %e, "take-profit placement failed");
                    None
                }
            },
            None => None,
        };
        let sl_oid = match proposal.sl_price {
            Some(sl) => match self
                .exchange
                .place_stop_loss(&proposal.asset, closing_is_buy, size, sl)
                .await
            {
                Ok(result) => result.order_ids().first().copied(),
                Err(e) => {
                    warn!(asset = %proposal.asset, error = %e, "stop-loss placement failed");
                    None
                }
            },
            None => None,
        };

        Ok((
            ActiveTrade {
                asset: proposal.asset.clone(),
                is_long,
                amount: size,
                entry_price: fill_price,
                tp_oid,
                sl_oid,
                exit_plan: proposal.exit_plan.clone(),
                opened_at: Utc::now(),
                from_proposal: Some(proposal.id),
            },
            fill_price,
        ))
    }

    /// Manually flatten an open trade: cancel its protective orders, close
    /// at market, drop the local record.
    pub async fn close_position(&self, asset: &str, note: &str) -> Result<(), EngineError> {
        let trade = self
            .hub
            .read(|shared| shared.active_trades.get(asset).cloned())
            .ok_or_else(|| EngineError::NoActiveTrade(asset.to_string()))?;

        self.exchange.cancel_all_orders(asset).await?;
        if trade.is_long {
            self.exchange.place_sell_order(asset, trade.amount).await?;
        } else {
            self.exchange.place_buy_order(asset, trade.amount).await?;
        }

        self.hub.with(|shared| {
            shared.active_trades.remove(asset);
        });
        self.journal
            .append(&JournalRecord::now(JournalEvent::ManualClose {
                asset: asset.to_string(),
                quantity: trade.amount,
                note: note.to_string(),
            }))?;
        info!(asset, amount = trade.amount, "position closed manually");
        Ok(())
    }

    /// Wait for every spawned execution to finish. Called once at shutdown.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}
