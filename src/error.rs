/// Error types shared by the listener, calculator and control channel
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed {kind}: {reason}")]
    Malformed { kind: &'static str, reason: String },

    #[error("{packet} observation has {actual} fields, expected at least {expected}")]
    ShortObservation {
        packet: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("configuration error: {0}")]
    Config(String),
}

impl BridgeError {
    pub fn malformed(kind: &'static str, reason: impl Into<String>) -> Self {
        BridgeError::Malformed {
            kind,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
