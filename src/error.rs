use thiserror::Error;

use crate::ticket::TicketParseError;

/// Errors raised while building or invoking a chain.
#[derive(Error, Debug)]
pub enum Error {
    #[error("environment variable {0} is not set")]
    MissingEnv(String),

    #[error("missing configuration key: {0}")]
    MissingConfig(&'static str),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to parse config file: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{provider} API error {status}: {message}")]
    Api {
        provider: &'static str,
        status: u16,
        message: String,
    },

    #[error("embedding provider error: {0}")]
    Embedding(String),

    #[error("graph store error: {0}")]
    Store(String),

    #[error("stream decoding error: {0}")]
    Stream(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("vector index {0} does not exist")]
    IndexNotFound(String),

    #[error("vector index {index} has dimension {actual}, embedder produces {expected}")]
    DimensionMismatch {
        index: String,
        expected: usize,
        actual: usize,
    },

    #[error("template error: {0}")]
    Template(String),

    #[error(transparent)]
    TicketParse(#[from] TicketParseError),
}
