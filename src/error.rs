use thiserror::Error;

/// Crate-wide error type
#[derive(Error, Debug)]
pub enum OtgError {
    #[error("No transceiver configured")]
    NoTransceiver,

    #[error("Transceiver notifier registration failed: {0}")]
    NotifierRegistration(String),

    #[error("Clock error: {0}")]
    Clock(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Register window error: {0}")]
    Mmio(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl OtgError {
    /// Whether this error aborts controller bring-up
    pub fn is_fatal_at_bind(&self) -> bool {
        matches!(
            self,
            OtgError::NoTransceiver | OtgError::NotifierRegistration(_) | OtgError::Clock(_)
        )
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, OtgError>;
