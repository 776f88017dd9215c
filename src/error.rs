use thiserror::Error;

#[derive(Error, Debug)]
pub enum FeedCacheError {
    #[error("Store error: {0}")]
    Store(String),

    #[error("Corrupt cache encoding: {0}")]
    CorruptEncoding(String),

    #[error("Unknown selector: {0}")]
    UnknownSelector(String),

    #[error("Record source error: {0}")]
    Source(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<redis::RedisError> for FeedCacheError {
    fn from(err: redis::RedisError) -> Self {
        FeedCacheError::Store(err.to_string())
    }
}

impl From<serde_json::Error> for FeedCacheError {
    fn from(err: serde_json::Error) -> Self {
        FeedCacheError::Internal(err.to_string())
    }
}

impl From<std::num::ParseIntError> for FeedCacheError {
    fn from(err: std::num::ParseIntError) -> Self {
        FeedCacheError::CorruptEncoding(err.to_string())
    }
}

impl From<chrono::ParseError> for FeedCacheError {
    fn from(err: chrono::ParseError) -> Self {
        FeedCacheError::CorruptEncoding(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FeedCacheError>;
