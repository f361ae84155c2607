use thiserror::Error;

#[derive(Debug, Error)]
pub enum SpeedTestError {
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Probe failed: {0}")]
    Probe(String),

    #[error("Server {server} has not been probed successfully")]
    NotProbed { server: String },

    #[error("Invalid server address: {0}")]
    InvalidAddress(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, SpeedTestError>;
