use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Database connection lock poisoned")]
    LockPoisoned,

    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: &'static str, secs: u64 },

    #[error("A cycle is already running")]
    CycleInProgress,

    #[error("Unknown window: {0}")]
    InvalidWindow(String),

    #[error("Failed to persist checkpoint {job_key}: {source}")]
    Checkpoint {
        job_key: String,
        #[source]
        source: Box<Error>,
    },
}
