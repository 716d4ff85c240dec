use std::path::PathBuf;
use thiserror::Error;

use crate::summary::client::ChatError;

/// Errors surfaced by the paper pipeline.
#[derive(Error, Debug)]
pub enum PaperError {
    #[error("Failed to load PDF {}: {source}", path.display())]
    PdfLoad {
        path: PathBuf,
        #[source]
        source: lopdf::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Failed to parse feed: {0}")]
    FeedParse(String),

    #[error("Chat stage '{stage}' failed: {source}")]
    Chat {
        stage: &'static str,
        #[source]
        source: ChatError,
    },

    #[error("Tokenizer unavailable: {0}")]
    Tokenizer(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unsupported export format: {0}")]
    UnsupportedFormat(String),

    #[error("pandoc not found on PATH")]
    PandocMissing,
}
