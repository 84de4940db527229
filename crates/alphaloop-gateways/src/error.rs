use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed provider response: {0}")]
    Shape(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("exchange error: {0}")]
    Exchange(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    /// Transient failures worth a bounded retry: timeouts, connection
    /// failures and 5xx responses.
    pub fn is_transient(&self) -> bool {
        match self {
            GatewayError::Http(e) => e.is_timeout() || e.is_connect(),
            GatewayError::Status { status, .. } => (500..600).contains(status),
            _ => false,
        }
    }
}
