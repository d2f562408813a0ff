use rusqlite;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    #[error("Usage error: {0}")]
    UsageError(String),
    #[error("Use of actor migration for '{key}' was removed in {component} {version}")]
    FieldRemoved {
        key: String,
        version: String,
        component: String,
    },
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("SQLite error: {0}")]
    RusqliteError(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
}

impl MigrationError {
    /// True for errors raised by calling code misusing the engine, as opposed to
    /// configuration or storage failures.
    pub fn is_usage(&self) -> bool {
        matches!(self, MigrationError::UsageError(_))
    }
}
