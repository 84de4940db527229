//! The trading engine: shared state, the proposal ledger, and the cycle
//! orchestrator that drives decisions end to end.

pub mod error;
pub mod ledger;
pub mod orchestrator;
pub mod risk;
pub mod state;
pub mod test_support;

pub use error::EngineError;
pub use ledger::ProposalLedger;
pub use orchestrator::CycleOrchestrator;
pub use risk::risk_metric;
pub use state::{CyclePhase, EngineShared, StateHub, SystemState};
