use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use uuid::Uuid;

use alphaloop_models::{ActiveTrade, EnrichedPosition, Fill, OpenOrder, TradeProposal};

/// Where the engine currently is in its cycle.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CyclePhase {
    #[default]
    Idle,
    FetchState,
    EnrichPositions,
    LoadJournal,
    FetchOrders,
    Reconcile,
    FetchFills,
    BuildContext,
    SynthesizeDecision,
    Dispatch,
    Persist,
    Sleep,
}

/// Mutable engine state. Only ever touched inside [`StateHub::with`].
#[derive(Debug, Default)]
pub struct EngineShared {
    pub cycle_count: u64,
    pub phase: CyclePhase,
    pub last_cycle_at: Option<DateTime<Utc>>,
    /// At most one per asset.
    pub active_trades: HashMap<String, ActiveTrade>,
    pub proposals: HashMap<Uuid, TradeProposal>,
    pub balance: f64,
    pub account_value: f64,
    pub total_return_pct: f64,
    pub risk_metric: f64,
    pub positions: Vec<EnrichedPosition>,
    pub open_orders: Vec<OpenOrder>,
    pub recent_fills: Vec<Fill>,
    pub last_reasoning: Option<String>,
    /// Last caught cycle failure; cleared by the next clean cycle.
    pub system_error: Option<String>,
}

/// Read-only projection published to observers after every mutation.
#[derive(Debug, Clone, Serialize, Default)]
pub struct SystemState {
    pub cycle_count: u64,
    pub phase: CyclePhase,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub active_trades: Vec<ActiveTrade>,
    pub proposals: Vec<TradeProposal>,
    pub balance: f64,
    pub account_value: f64,
    pub total_return_pct: f64,
    pub risk_metric: f64,
    pub positions: Vec<EnrichedPosition>,
    pub open_orders: Vec<OpenOrder>,
    pub recent_fills: Vec<Fill>,
    pub last_reasoning: Option<String>,
    pub system_error: Option<String>,
}

impl SystemState {
    fn project(shared: &EngineShared) -> Self {
        let mut active_trades: Vec<ActiveTrade> = shared.active_trades.values().cloned().collect();
        active_trades.sort_by(|a, b| a.asset.cmp(&b.asset));
        let mut proposals: Vec<TradeProposal> = shared.proposals.values().cloned().collect();
        proposals.sort_by_key(|p| p.created_at);
        Self {
            cycle_count: shared.cycle_count,
            phase: shared.phase,
            last_cycle_at: shared.last_cycle_at,
            active_trades,
            proposals,
            balance: shared.balance,
            account_value: shared.account_value,
            total_return_pct: shared.total_return_pct,
            risk_metric: shared.risk_metric,
            positions: shared.positions.clone(),
            open_orders: shared.open_orders.clone(),
            recent_fills: shared.recent_fills.clone(),
            last_reasoning: shared.last_reasoning.clone(),
            system_error: shared.system_error.clone(),
        }
    }

    pub fn pending_proposals(&self) -> impl Iterator<Item = &TradeProposal> {
        self.proposals.iter().filter(|p| p.is_pending())
    }
}

/// Single owner of the shared `{active_trades, proposals}` maps.
///
/// All mutation goes through [`StateHub::with`], which holds the lock only
/// for the closure and then publishes a fresh projection on the watch
/// channel. Critical sections must stay short and must not do IO.
pub struct StateHub {
    inner: Mutex<EngineShared>,
    tx: watch::Sender<SystemState>,
}

impl Default for StateHub {
    fn default() -> Self {
        Self::new()
    }
}

impl StateHub {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(SystemState::default());
        Self {
            inner: Mutex::new(EngineShared::default()),
            tx,
        }
    }

    /// Mutate the shared state and publish the resulting projection.
    pub fn with<R>(&self, f: impl FnOnce(&mut EngineShared) -> R) -> R {
        // A poisoned lock means some closure panicked mid-update; the maps
        // themselves are still structurally sound, so keep going.
        let mut guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let result = f(&mut guard);
        self.tx.send_replace(SystemState::project(&guard));
        result
    }

    /// Read without mutating. Still publishes nothing.
    pub fn read<R>(&self, f: impl FnOnce(&EngineShared) -> R) -> R {
        let guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&guard)
    }

    pub fn snapshot(&self) -> SystemState {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SystemState> {
        self.tx.subscribe()
    }
}
