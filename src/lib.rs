use thiserror::Error;

pub type Result<T> = std::result::Result<T, RepoQueryError>;

#[derive(Error, Debug)]
pub enum RepoQueryError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Index error: {0}")]
    Index(String),

    #[error("Vector dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    #[error("Index corruption: {0}")]
    IndexCorruption(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub mod chunker;
pub mod commands;
pub mod config;
pub mod embeddings;
pub mod index;
pub mod indexer;
pub mod llm;
pub mod markdown;
pub mod retriever;
pub mod scanner;
