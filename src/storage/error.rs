//! Storage errors
//!
//! Backends report everything through [`StorageError`]. The engine never
//! inspects the variant; a storage failure aborts the rest of a pass (or
//! rejects a push) and the message ends up in the pass summary.

use std::fmt;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug)]
pub enum StorageError {
    /// The database could not be opened
    ConnectionFailed(String),

    QueryFailed(String),

    MigrationFailed(String),

    /// The configured backend is not available in this build
    InvalidConfig(String),

    /// A history entry or alert state row holds JSON that does not decode
    CorruptRecord(serde_json::Error),

    /// Database file access
    Io(std::io::Error),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::ConnectionFailed(msg) => write!(f, "cannot open store: {msg}"),
            StorageError::QueryFailed(msg) => write!(f, "store query failed: {msg}"),
            StorageError::MigrationFailed(msg) => write!(f, "store migration failed: {msg}"),
            StorageError::InvalidConfig(msg) => write!(f, "invalid storage configuration: {msg}"),
            StorageError::CorruptRecord(err) => write!(f, "corrupt stored record: {err}"),
            StorageError::Io(err) => write!(f, "store I/O error: {err}"),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StorageError::CorruptRecord(err) => Some(err),
            StorageError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err)
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::CorruptRecord(err)
    }
}

#[cfg(feature = "storage-sqlite")]
impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(err) => StorageError::Io(err),
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                StorageError::ConnectionFailed(err.to_string())
            }
            other => StorageError::QueryFailed(other.to_string()),
        }
    }
}

#[cfg(feature = "storage-sqlite")]
impl From<sqlx::migrate::MigrateError> for StorageError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        StorageError::MigrationFailed(err.to_string())
    }
}
