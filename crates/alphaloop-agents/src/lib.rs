//! Decision agents: the single-model synthesizer with its tool loop, the
//! analyst ensemble, and the judge that arbitrates the panel.

pub mod ensemble;
pub mod error;
pub mod judge;
pub mod parser;
pub mod prompts;
pub mod synthesizer;
pub mod test_support;

pub use ensemble::{Analyst, AnalystEnsemble, LlmAnalyst};
pub use error::AgentError;
pub use judge::Judge;
pub use synthesizer::DecisionSynthesizer;
