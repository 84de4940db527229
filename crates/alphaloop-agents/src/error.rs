use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("provider error: {0}")]
    Provider(#[from] alphaloop_gateways::GatewayError),

    #[error("response parse error: {0}")]
    Parse(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
