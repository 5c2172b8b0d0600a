// storekeeper-core/src/error.rs
use thiserror::Error;

/// Errors produced by the store layer and the maintenance tasks.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Fatal: raised before any mutation when the database cannot be reached.
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("invalid update: {0}")]
    InvalidUpdate(String),

    /// Fatal: bad configuration (env vars, date ranges, clone endpoints).
    #[error("configuration error: {0}")]
    Config(String),

    #[error("payments API error: {0}")]
    PaymentsApi(String),

    /// Operator pressed Ctrl-C; no in-flight batch is rolled back.
    #[error("interrupted by operator")]
    Interrupted,
}

pub type Result<T> = std::result::Result<T, StoreError>;
