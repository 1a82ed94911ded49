use thiserror::Error;

#[derive(Error, Debug)]
pub enum BalancerError {
    #[error("invalid uri: {0}")]
    InvalidUri(String),

    #[error("partition error: {0}")]
    Partition(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("shutdown error: {0}")]
    Shutdown(String),
}

pub type Result<T> = std::result::Result<T, BalancerError>;
