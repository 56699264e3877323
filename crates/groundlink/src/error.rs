//! Error types for groundlink.
//!
//! This module defines the crate-wide error type. Per-packet failures
//! (framing, decoding, validation) are not errors of the pipeline itself and
//! live next to the component that produces them: see
//! [`DecodeError`](crate::decoder::DecodeError) and
//! [`ValidationError`](crate::validator::ValidationError).

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for groundlink operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Storage Errors ===
    /// Failed to open or create the database.
    #[error("failed to open database at {path}: {source}")]
    DatabaseOpen {
        /// Path to the database file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// A database query failed.
    #[error("database query failed: {0}")]
    DatabaseQuery(#[from] rusqlite::Error),

    /// Failed to run database migrations.
    #[error("database migration failed: {message}")]
    DatabaseMigration {
        /// Description of what went wrong.
        message: String,
    },

    /// A stored row could not be mapped back to a snapshot.
    #[error("corrupt record for packet {packet_id}: {message}")]
    CorruptRecord {
        /// Packet id of the offending row.
        packet_id: i64,
        /// Description of what went wrong.
        message: String,
    },

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === Transport Errors ===
    /// The byte source could not be opened.
    #[error("failed to open {source_name}: {message}")]
    TransportOpen {
        /// Human-readable name of the source.
        source_name: String,
        /// Description of what went wrong.
        message: String,
    },

    // === Session Errors ===
    /// A session is already connected.
    #[error("a link session is already connected")]
    AlreadyConnected,

    /// No session is connected.
    #[error("no link session is connected")]
    NotConnected,

    /// The persistence worker is gone.
    #[error("persistence worker is not running")]
    PersistenceClosed,

    // === I/O Errors ===
    /// File system or transport operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Generic Errors ===
    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for groundlink operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create a transport open error.
    #[must_use]
    pub fn transport_open(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TransportOpen {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    /// Create a configuration validation error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            message: message.into(),
        }
    }
}
