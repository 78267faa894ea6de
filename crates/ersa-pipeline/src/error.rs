use thiserror::Error;

/// Infrastructure failures in the data pipeline. Validation rejections are
/// not errors; they travel as typed `Rejection` values in the outcome.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Market data provider error: {0}")]
    Provider(String),

    #[error("Ledger error: {0}")]
    Ledger(#[from] ersa_ledger::LedgerError),

    #[error("Store not available: {0}")]
    Unavailable(String),

    #[error("Stored value could not be decoded: {0}")]
    Corrupt(String),
}
