//! Error types for the panopticon-scan crate.

use thiserror::Error;

use panopticon_store::StoreError;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("A scan is already in progress")]
    AlreadyRunning,

    #[error("Config error: {0}")]
    Config(String),

    #[error("Nmap not found at path: {path}")]
    ToolNotFound { path: String },

    #[error("Nmap exited with code {code}: {stderr}")]
    ToolFailed { code: i32, stderr: String },

    #[error("Failed to parse nmap XML output: {0}")]
    SnapshotParse(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, ScanError>;
