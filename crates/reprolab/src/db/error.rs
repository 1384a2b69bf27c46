use std::path::PathBuf;
use thiserror::Error;

/// Failures of the work record store.
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The database directory could not be created.
    #[error("Cannot prepare database directory '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Migration v{version} failed: {reason}")]
    Migration { version: u32, reason: String },

    /// A job or submission result could not be serialized into its column.
    #[error("Cannot encode result payload: {0}")]
    Encode(#[from] serde_json::Error),

    /// Another thread panicked while holding the connection.
    #[error("Database connection lock poisoned")]
    LockPoisoned,
}
