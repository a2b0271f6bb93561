//! Crate-wide error types.
//!
//! Library modules return [`Error`] through the [`Result`] alias. Module
//! specific errors ([`ConfigError`], [`WatchError`]) convert into it
//! automatically. The CLI binary uses `anyhow` on top of this.
//!
//! # Severities
//!
//! Errors fall into three buckets that decide how a scan reacts:
//!
//! - **Per-file**: stat, read or parse failures for a single file. Recorded
//!   against that file, the scan keeps going.
//! - **Per-directory**: a root that cannot be enumerated. Recorded as a
//!   scan-level error, remaining roots still scan.
//! - **Subsystem**: the catalog or the settings store is unavailable. There is
//!   no meaningful partial result, so the triggering operation fails.
//!   [`Error::is_subsystem`] identifies these.
//!
//! [`ConfigError`]: crate::config::ConfigError
//! [`WatchError`]: crate::scanner::WatchError

use std::path::PathBuf;

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level catalog error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Catalog database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The catalog repository rejected an operation
    #[error("Catalog unavailable: {0}")]
    Catalog(String),

    /// Tag parsing failed for one file
    #[error("Metadata error: {message}")]
    Metadata { path: PathBuf, message: String },

    /// File not found
    #[error("File not found: {0}")]
    NotFound(PathBuf),

    /// A root directory could not be listed
    #[error("Cannot enumerate {path}: {message}")]
    Enumeration { path: PathBuf, message: String },

    /// Settings could not be loaded or persisted
    #[error("Settings error: {0}")]
    Settings(#[from] crate::config::ConfigError),

    /// A filesystem watch could not be established
    #[error("Watch error: {0}")]
    Watch(#[from] crate::scanner::WatchError),

    /// A scan was requested while another one is running
    #[error("A scan is already in progress")]
    ScanInProgress,

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create a metadata error.
    pub fn metadata(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Metadata {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a not found error.
    pub fn not_found(path: impl Into<PathBuf>) -> Self {
        Self::NotFound(path.into())
    }

    /// Create an enumeration error for a directory that could not be read.
    pub fn enumeration(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Enumeration {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a catalog error.
    pub fn catalog(message: impl Into<String>) -> Self {
        Self::Catalog(message.into())
    }

    /// Add context to an error.
    pub fn context(self, ctx: impl Into<String>) -> Self {
        Self::WithContext {
            context: ctx.into(),
            source: Box::new(self),
        }
    }

    /// Whether this error means persistence is unavailable.
    ///
    /// Subsystem errors abort the operation that triggered them instead of
    /// being recorded against a single file or directory.
    pub fn is_subsystem(&self) -> bool {
        match self {
            Self::Database(_) | Self::Catalog(_) | Self::Settings(_) => true,
            Self::WithContext { source, .. } => source.is_subsystem(),
            _ => false,
        }
    }
}

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Add context to an error result.
    fn with_context(self, ctx: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn with_context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(ctx))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, std::io::Error> {
    fn with_context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::Io(e).context(ctx))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, sqlx::Error> {
    fn with_context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::Database(e).context(ctx))
    }
}
