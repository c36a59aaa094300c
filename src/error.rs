use config::ConfigError;

use crate::client::QueryError;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures surfaced to the process. The watchers recover from catalog errors
/// on their own, so these only arise while starting up or serving.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("http server error: {0}")]
    Server(#[from] hyper::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("bootstrap failed: {0}")]
    Bootstrap(String),
}
