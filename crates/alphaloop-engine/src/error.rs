use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("gateway error: {0}")]
    Gateway(#[from] alphaloop_gateways::GatewayError),

    #[error("agent error: {0}")]
    Agent(#[from] alphaloop_agents::AgentError),

    #[error("unknown proposal: {0}")]
    UnknownProposal(Uuid),

    #[error("proposal {id} is not {expected}")]
    InvalidProposalState { id: Uuid, expected: &'static str },

    #[error("no active trade for {0}")]
    NoActiveTrade(String),
}
