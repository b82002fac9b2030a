use thiserror::Error;

#[derive(Debug, Error)]
pub enum FairAuditError {
    #[error("Invalid input: {field}: {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("Insufficient sample size for {context}: n={n} < {min}")]
    InsufficientSample {
        context: String,
        n: usize,
        min: usize,
    },

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<serde_json::Error> for FairAuditError {
    fn from(e: serde_json::Error) -> Self {
        FairAuditError::SerializationError(e.to_string())
    }
}
