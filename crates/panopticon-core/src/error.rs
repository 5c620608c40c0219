use thiserror::Error;

/// Top-level error type for shared Panopticon concerns.
#[derive(Error, Debug)]
pub enum PanopticonError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to load configuration: {0}")]
    ConfigLoad(#[from] config::ConfigError),
}
