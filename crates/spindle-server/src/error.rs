use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("catalog error: {0}")]
    Catalog(#[from] spindle_core::Error),

    /// A request the protocol cannot answer; the session is dropped.
    #[error("malformed request: {0}")]
    BadRequest(String),
}

pub type Result<T> = std::result::Result<T, ServerError>;
