use thiserror::Error;

/// Errors raised by the event store.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An error originating from the underlying SQLite database.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Trait data could not be serialized, or a stored row could not be read back.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The blocking task running the statement panicked or was cancelled.
    #[error("Storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, StorageError>;
