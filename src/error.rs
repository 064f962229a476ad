use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("{0} is not supported by this provider")]
    NotSupported(&'static str),

    #[error("Session error: {0}")]
    Session(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Connection pool error: {0}")]
    Connection(String),
}

impl Error {
    /// True for the capability-absent case providers signal from optional
    /// operations (`snapshot`, `historical`).
    #[must_use]
    pub const fn is_not_supported(&self) -> bool {
        matches!(self, Self::NotSupported(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
