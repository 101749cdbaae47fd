use thiserror::Error;

/// Errors produced by the relay and its status endpoint.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("identity lookup failed: {0}")]
    Whois(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for RelayError {
    fn from(e: serde_json::Error) -> Self {
        RelayError::Whois(format!("malformed whois output: {e}"))
    }
}

pub type RelayResult<T> = Result<T, RelayError>;
