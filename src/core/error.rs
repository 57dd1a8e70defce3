use thiserror::Error;

/// Errors raised by the flooding stack and its peripherals
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed frame or value that cannot be put on air
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Arithmetic or scheduling outside the representable tick range
    #[error("Timing error: {0}")]
    Timing(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// Radio driver failure; flooders abandon the current round on it
    #[error("Transceiver fault: {0}")]
    Transceiver(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn protocol(msg: impl Into<String>) -> Self {
        Error::Protocol(msg.into())
    }

    pub fn timing(msg: impl Into<String>) -> Self {
        Error::Timing(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    pub fn transceiver(msg: impl Into<String>) -> Self {
        Error::Transceiver(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Error::InvalidState(msg.into())
    }

    /// Whether this error only abandons the current round
    pub fn is_transceiver_fault(&self) -> bool {
        matches!(self, Error::Transceiver(_))
    }
}
