use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Ledger not available: {0}")]
    Unavailable(String),

    #[error("Stored value could not be decoded: {0}")]
    Corrupt(String),

    #[error("Run not found: {0}")]
    RunNotFound(uuid::Uuid),
}
