use thiserror::Error;

pub type Result<T> = std::result::Result<T, CallbookError>;

#[derive(Error, Debug)]
pub enum CallbookError {
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(#[from] serde_yaml::Error),

    #[error("Invalid timestamp: {0}")]
    Timestamp(#[from] chrono::ParseError),

    #[error("Rebuild worker failed: {0}")]
    Worker(String),

    #[error("Lock poisoned: {0}")]
    LockPoisoned(&'static str),
}
