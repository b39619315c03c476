use thiserror::Error;

pub type Result<T> = std::result::Result<T, QaError>;

#[derive(Error, Debug)]
pub enum QaError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Source unavailable ({locator}): {message}")]
    SourceUnavailable { locator: String, message: String },

    #[error("Collection already exists: {0}")]
    CollectionAlreadyExists(String),

    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    #[error("Embedding failure: {0}")]
    EmbeddingFailure(String),

    #[error("Inference stream failure: {0}")]
    InferenceStreamFailure(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl QaError {
    /// Stable name of the error kind, used on the wire by the query endpoint
    #[inline]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InvalidConfiguration(_) => "InvalidConfiguration",
            Self::SourceUnavailable { .. } => "SourceUnavailable",
            Self::CollectionAlreadyExists(_) => "CollectionAlreadyExists",
            Self::CollectionNotFound(_) => "CollectionNotFound",
            Self::EmbeddingFailure(_) => "EmbeddingFailure",
            Self::InferenceStreamFailure(_) => "InferenceStreamFailure",
            Self::Database(_) => "Database",
            Self::Io(_) => "Io",
            Self::Other(_) => "Other",
        }
    }
}

impl From<config::ConfigError> for QaError {
    #[inline]
    fn from(err: config::ConfigError) -> Self {
        Self::InvalidConfiguration(err.to_string())
    }
}

pub mod commands;
pub mod completion;
pub mod config;
pub mod database;
pub mod embeddings;
pub mod http;
pub mod inference;
pub mod ingest;
pub mod server;
pub mod source;

#[cfg(test)]
mod test_support;
