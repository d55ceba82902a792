//! Error types for the BDS sync pipeline
//!
//! This module defines all error types used throughout the crate.

use thiserror::Error;

/// Result type alias for sync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the sync pipeline
#[derive(Error, Debug)]
pub enum Error {
    /// Token exchange or a bearer-authenticated call returned a non-success status
    #[error("Authentication failed (status {status}): {body}")]
    Authentication {
        /// HTTP status code
        status: u16,
        /// Response body as returned by the provider
        body: String,
    },

    /// Dataset download returned a non-success status
    #[error("Download failed (status {status}): {body}")]
    Download {
        /// HTTP status code
        status: u16,
        /// Response body as returned by the provider
        body: String,
    },

    /// Download payload is not an archive with exactly one entry
    #[error("Malformed archive: {0}")]
    MalformedArchive(String),

    /// Failure while staging, copying, merging or dropping a batch
    #[error("Load into {table} failed: {message}")]
    Load {
        /// Destination table
        table: String,
        /// Error message
        message: String,
    },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Credential store read/replace errors
    #[error("Credential store error: {0}")]
    CredentialStore(String),

    /// Dataset or link not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// HTTP transport errors (connection, timeout, body decoding)
    #[error("HTTP error: {0}")]
    Http(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an authentication error
    pub fn auth(status: u16, body: impl Into<String>) -> Self {
        Self::Authentication {
            status,
            body: body.into(),
        }
    }

    /// Create a download error
    pub fn download(status: u16, body: impl Into<String>) -> Self {
        Self::Download {
            status,
            body: body.into(),
        }
    }

    /// Create a malformed archive error
    pub fn malformed_archive(msg: impl Into<String>) -> Self {
        Self::MalformedArchive(msg.into())
    }

    /// Create a load error for a destination table
    pub fn load(table: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Load {
            table: table.into(),
            message: message.to_string(),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a credential store error
    pub fn credential_store(msg: impl Into<String>) -> Self {
        Self::CredentialStore(msg.into())
    }

    /// Create a "not found" error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an HTTP transport error
    pub fn http(msg: impl Into<String>) -> Self {
        Self::Http(msg.into())
    }

    /// Whether this error must abort the whole run regardless of the
    /// dataset failure policy.
    ///
    /// Token, configuration and credential failures happen before (or
    /// outside) any single dataset, so there is nothing to continue with.
    pub fn is_fatal_for_run(&self) -> bool {
        matches!(
            self,
            Self::Authentication { .. } | Self::Config(_) | Self::CredentialStore(_)
        )
    }
}
