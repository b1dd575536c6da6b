//! Unified error types for vpnns

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for vpnns operations
#[derive(Error, Debug)]
pub enum Error {
    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // Config errors
    #[error("Failed to read config file '{path}': {source}")]
    ConfigRead { path: PathBuf, source: io::Error },

    #[error("Failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config validation failed: {0}")]
    ConfigValidation(String),

    // Tunnel config errors
    #[error("Failed to read tunnel config '{path}': {source}")]
    TunnelConfigRead { path: PathBuf, source: io::Error },

    #[error("Invalid tunnel config '{path}': {message}")]
    TunnelConfig { path: PathBuf, message: String },

    // External command errors
    #[error("Failed to execute '{command}': {source}")]
    CommandSpawn { command: String, source: io::Error },

    #[error("Command '{command}' failed: {message}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
        message: String,
    },

    #[error("Command '{command}' timed out after {secs} seconds")]
    CommandTimeout { command: String, secs: u64 },

    // Retry errors
    #[error("{operation} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        operation: String,
        attempts: u8,
        #[source]
        source: Box<Error>,
    },

    // Network errors
    #[error("Network error: {0}")]
    Network(String),

    // Locking
    #[error("Another vpnns run holds the lock '{0}'")]
    LockHeld(PathBuf),

    #[error("Failed to lock '{path}': {message}")]
    Lock { path: PathBuf, message: String },

    // Output
    #[error("Failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Process exit status for this error
    ///
    /// A failed external command passes its own exit code through, anything
    /// else exits with 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::CommandFailed {
                code: Some(code), ..
            } if *code != 0 => *code,
            Error::RetriesExhausted { source, .. } => source.exit_code(),
            _ => 1,
        }
    }
}

/// Result type alias for vpnns operations
pub type Result<T> = std::result::Result<T, Error>;
