use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Invalid argument: {name} must be non-negative, got {value}")]
    InvalidArgument { name: &'static str, value: i64 },

    #[error("Missing digest for input {path}; known inputs: {}", known.join(", "))]
    MissingDigest { path: String, known: Vec<String> },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, CacheError>;
