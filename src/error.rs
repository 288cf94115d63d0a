// src/error.rs

use thiserror::Error;

/// Core error types for LiHub
///
/// These are run-level failures. Problems with a single upload are reported
/// as a [`Rejection`](crate::maintain::Rejection) instead and never abort a batch.
#[derive(Error, Debug)]
pub enum Error {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Database initialization error
    #[error("Failed to initialize database: {0}")]
    InitError(String),

    /// Database not found
    #[error("Database not found at path: {0}")]
    DatabaseNotFound(String),

    /// Schema migration error
    #[error("Migration error: {0}")]
    Migration(String),

    /// A named record does not exist
    #[error("Not found: {0}")]
    NotFoundError(String),

    /// A record with the same identity already exists
    #[error("Conflict: {0}")]
    ConflictError(String),

    /// Malformed input data
    #[error("Parse error: {0}")]
    ParseError(String),

    /// The incoming directory could not be scanned
    #[error("Failed to read incoming directory {path}: {source}")]
    IncomingDir {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Another importer holds the incoming directory lock
    #[error("Import already running: lock file {0} exists (remove it if no importer is running)")]
    ImportLocked(String),

    /// Importing an OpenPGP key into a user keyring failed
    #[error("Key import failed: {0}")]
    KeyImport(String),
}

/// Result type alias using LiHub's Error type
pub type Result<T> = std::result::Result<T, Error>;
