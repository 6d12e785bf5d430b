//! Ambient error type for infrastructure concerns (config loading, ID
//! parsing). Step/DAG/cache errors are specific enough that they live in
//! `flowgraph-engine` as their own taxonomy instead.

/// Result type alias using the core `Error`.
pub type Result<T> = std::result::Result<T, Error>;

/// Infrastructure-level errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid id: {0}")]
    InvalidId(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}
